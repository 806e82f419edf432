//! Reverse-lookup results and URL reconstruction from a scope.
use std::fmt;

use thiserror::Error;
use url::Url;

use crate::{core::convertors::ConvertorError, ports::scope::Scope};

/// Errors raised by `url_path_for` walks.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum UrlPathError {
    /// No node matched the name and parameter set. Recoverable: the walk
    /// moves on to the next node.
    #[error("No route exists for name {name:?} and params {:?}.", params.join(","))]
    NoMatch { name: String, params: Vec<String> },

    /// A node matched but a convertor refused to format a value.
    #[error("Invalid value for path parameter {param:?}: {source}")]
    InvalidParam {
        param: String,
        #[source]
        source: ConvertorError,
    },

    /// `url_for` was called on a connection whose scope carries no router.
    #[error("No router available for URL reconstruction")]
    NoRouter,

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl UrlPathError {
    pub fn no_match<'a>(name: &str, params: impl IntoIterator<Item = &'a str>) -> Self {
        UrlPathError::NoMatch {
            name: name.to_string(),
            params: params.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn is_no_match(&self) -> bool {
        matches!(self, UrlPathError::NoMatch { .. })
    }
}

/// Protocol family a reconstructed path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    WebSocket,
}

impl Protocol {
    fn scheme(self, secure: bool) -> &'static str {
        match (self, secure) {
            (Protocol::Http, false) => "http",
            (Protocol::Http, true) => "https",
            (Protocol::WebSocket, false) => "ws",
            (Protocol::WebSocket, true) => "wss",
        }
    }
}

/// A reconstructed path plus the protocol/host overrides needed to make it
/// absolute later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPath {
    pub path: String,
    pub protocol: Option<Protocol>,
    pub host: Option<String>,
}

impl UrlPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            protocol: None,
            host: None,
        }
    }

    pub fn with_protocol(mut self, protocol: Option<Protocol>) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_host(mut self, host: Option<String>) -> Self {
        self.host = host;
        self
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Resolve against `base_url`.
    ///
    /// The scheme follows `protocol` (upgraded to `https`/`wss` when the base
    /// is secure) or falls back to the base scheme; the network location is
    /// the `host` override or the base's; the base path is kept as a prefix.
    pub fn to_absolute(&self, base_url: &Url) -> Result<Url, url::ParseError> {
        let secure = matches!(base_url.scheme(), "https" | "wss");
        let scheme = match self.protocol {
            Some(protocol) => protocol.scheme(secure),
            None => base_url.scheme(),
        };
        let netloc = match &self.host {
            Some(host) => host.clone(),
            None => netloc(base_url),
        };
        let prefix = base_url.path().trim_end_matches('/');
        Url::parse(&format!("{scheme}://{netloc}{prefix}{}", self.path))
    }
}

impl fmt::Display for UrlPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl PartialEq<&str> for UrlPath {
    fn eq(&self, other: &&str) -> bool {
        self.path == *other
    }
}

fn netloc(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        _ => None,
    }
}

/// Full request URL rebuilt from a scope.
///
/// The authority comes from the `host` header, then from `scope.server`
/// (default ports omitted), and finally falls back to `localhost`.
pub fn url_from_scope(scope: &Scope) -> Result<Url, url::ParseError> {
    let authority = match (scope.header("host"), &scope.server) {
        (Some(host), _) => host,
        (None, Some(server)) if default_port(&scope.scheme) == Some(server.port) => {
            server.host.clone()
        }
        (None, Some(server)) => format!("{}:{}", server.host, server.port),
        (None, None) => "localhost".to_string(),
    };
    let mut raw = format!(
        "{}://{}{}{}",
        scope.scheme, authority, scope.root_path, scope.path
    );
    if !scope.query_string.is_empty() {
        raw.push('?');
        raw.push_str(&String::from_utf8_lossy(&scope.query_string));
    }
    Url::parse(&raw)
}
