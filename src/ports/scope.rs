//! Per-connection protocol metadata.
//!
//! A [`Scope`] is created by the server for every connection (HTTP request,
//! websocket session or lifespan run) and handed to the application. The
//! static attributes never change after creation; only the routing fields
//! (`path`, `root_path`, `path_params`, `endpoint`) are rewritten as control
//! descends through mounts and hosts.
use std::{collections::BTreeMap, fmt, sync::Arc};

use bytes::Bytes;
use http::Method;

use crate::core::{convertors::ParamValue, router::Router};

/// Ordered list of raw `(name, value)` header pairs as received on the wire.
pub type RawHeaders = Vec<(Bytes, Bytes)>;

/// Connection kind carried in `scope.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Http,
    WebSocket,
    Lifespan,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Http => "http",
            ScopeKind::WebSocket => "websocket",
            ScopeKind::Lifespan => "lifespan",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host/port pair used for `client` and `server`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Path parameters accumulated by successive matches, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathParams(BTreeMap<String, ParamValue>);

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<ParamValue> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge `other` on top of `self`; later matches win on name collisions.
    pub fn extend(&mut self, other: PathParams) {
        self.0.extend(other.0);
    }
}

impl<K, V> FromIterator<(K, V)> for PathParams
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for PathParams
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Connection metadata passed to every [`App`](crate::ports::app::App).
#[derive(Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    pub method: Option<Method>,
    pub scheme: String,
    pub path: String,
    pub root_path: String,
    /// Root path of the outermost application, kept stable across mounts.
    pub app_root_path: Option<String>,
    pub query_string: Bytes,
    pub headers: RawHeaders,
    pub client: Option<Address>,
    pub server: Option<Address>,
    pub subprotocols: Vec<String>,
    pub path_params: PathParams,
    /// Name of the matched endpoint, set by routing.
    pub endpoint: Option<String>,
    /// Root router, installed by the application for reverse lookups.
    pub router: Option<Arc<Router>>,
    /// Running inside an application: 404/405 escalate to `AppError::Http`.
    pub in_app: bool,
}

impl Scope {
    fn new(kind: ScopeKind, method: Option<Method>, scheme: &str, path: &str) -> Self {
        Self {
            kind,
            method,
            scheme: scheme.to_string(),
            path: path.to_string(),
            root_path: String::new(),
            app_root_path: None,
            query_string: Bytes::new(),
            headers: Vec::new(),
            client: None,
            server: None,
            subprotocols: Vec::new(),
            path_params: PathParams::new(),
            endpoint: None,
            router: None,
            in_app: false,
        }
    }

    pub fn http(method: Method, path: &str) -> Self {
        Self::new(ScopeKind::Http, Some(method), "http", path)
    }

    pub fn websocket(path: &str) -> Self {
        Self::new(ScopeKind::WebSocket, None, "ws", path)
    }

    pub fn lifespan() -> Self {
        Self::new(ScopeKind::Lifespan, None, "http", "")
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((
            Bytes::copy_from_slice(name.to_ascii_lowercase().as_bytes()),
            Bytes::copy_from_slice(value.as_bytes()),
        ));
        self
    }

    pub fn with_query_string(mut self, query: &str) -> Self {
        self.query_string = Bytes::copy_from_slice(query.as_bytes());
        self
    }

    pub fn with_root_path(mut self, root_path: &str) -> Self {
        self.root_path = root_path.to_string();
        self
    }

    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    pub fn with_client(mut self, client: Address) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_server(mut self, server: Address) -> Self {
        self.server = Some(server);
        self
    }

    pub fn with_subprotocols<I, S>(mut self, subprotocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subprotocols = subprotocols.into_iter().map(Into::into).collect();
        self
    }

    /// First value of a header, compared case-insensitively and decoded as latin-1.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| v.iter().map(|&b| b as char).collect())
    }

    pub fn method_str(&self) -> &str {
        self.method.as_ref().map(Method::as_str).unwrap_or("")
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("kind", &self.kind)
            .field("method", &self.method)
            .field("scheme", &self.scheme)
            .field("path", &self.path)
            .field("root_path", &self.root_path)
            .field("query_string", &self.query_string)
            .field("path_params", &self.path_params)
            .field("endpoint", &self.endpoint)
            .field("in_app", &self.in_app)
            .finish_non_exhaustive()
    }
}
