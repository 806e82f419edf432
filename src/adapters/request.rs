//! HTTP connection views over a scope.
//!
//! [`HttpConnection`] derives the URL, headers, query parameters and cookies
//! from the scope on first access and caches them. [`Request`] adds the
//! request body, read from the receive channel as a non-restartable stream.
use std::{collections::BTreeMap, ops::Deref};

use bytes::{Bytes, BytesMut};
use futures_util::{FutureExt, StreamExt, stream, stream::BoxStream};
use http::{HeaderMap, Method};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use url::Url;

use crate::{
    adapters::response::header_map,
    core::url::{UrlPathError, url_from_scope},
    ports::{
        app::{AppError, AppResult},
        channel::SharedReceiver,
        message::Message,
        scope::{Address, PathParams, Scope},
    },
};

/// Parse a `Cookie` header into name/value pairs.
///
/// Chunks without `=` are stored under the empty name; surrounding double
/// quotes are removed from values.
pub fn parse_cookies(header: &str) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for chunk in header.split(';') {
        let (key, value) = chunk.split_once('=').unwrap_or(("", chunk));
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() && value.is_empty() {
            continue;
        }
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        cookies.insert(key.to_string(), value.to_string());
    }
    cookies
}

/// Read-mostly view over an HTTP or websocket scope.
#[derive(Debug)]
pub struct HttpConnection {
    scope: Scope,
    url: OnceCell<Url>,
    base_url: OnceCell<Url>,
    headers: OnceCell<HeaderMap>,
    query_params: OnceCell<Vec<(String, String)>>,
    cookies: OnceCell<BTreeMap<String, String>>,
}

impl HttpConnection {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            url: OnceCell::new(),
            base_url: OnceCell::new(),
            headers: OnceCell::new(),
            query_params: OnceCell::new(),
            cookies: OnceCell::new(),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn into_scope(self) -> Scope {
        self.scope
    }

    pub fn url(&self) -> Result<&Url, url::ParseError> {
        self.url.get_or_try_init(|| url_from_scope(&self.scope))
    }

    /// URL of the application root: path `/`, no query, outermost root path.
    pub fn base_url(&self) -> Result<&Url, url::ParseError> {
        self.base_url.get_or_try_init(|| {
            let mut scope = self.scope.clone();
            scope.path = "/".to_string();
            scope.query_string = Bytes::new();
            if let Some(app_root) = &self.scope.app_root_path {
                scope.root_path = app_root.clone();
            }
            url_from_scope(&scope)
        })
    }

    pub fn headers(&self) -> &HeaderMap {
        self.headers.get_or_init(|| header_map(&self.scope.headers))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// Decoded query parameters in order of appearance, duplicates kept.
    pub fn query_params(&self) -> &[(String, String)] {
        self.query_params.get_or_init(|| {
            url::form_urlencoded::parse(&self.scope.query_string)
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params()
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        self.cookies.get_or_init(|| {
            self.header("cookie")
                .map(parse_cookies)
                .unwrap_or_default()
        })
    }

    pub fn path_params(&self) -> &PathParams {
        &self.scope.path_params
    }

    pub fn client(&self) -> Option<&Address> {
        self.scope.client.as_ref()
    }

    /// Absolute URL for a named route, resolved against [`Self::base_url`].
    pub fn url_for(&self, name: &str, params: PathParams) -> Result<Url, UrlPathError> {
        let router = self.scope.router.as_ref().ok_or(UrlPathError::NoRouter)?;
        let path = router.url_path_for(name, params)?;
        Ok(path.to_absolute(self.base_url()?)?)
    }
}

/// An HTTP request: connection view plus the body stream.
pub struct Request {
    conn: HttpConnection,
    method: Method,
    receive: SharedReceiver,
    body: Option<Bytes>,
    stream_started: bool,
    stream_consumed: bool,
    disconnected: bool,
}

impl Request {
    pub fn new(scope: Scope, receive: SharedReceiver) -> Self {
        let method = scope.method.clone().unwrap_or(Method::GET);
        Self {
            conn: HttpConnection::new(scope),
            method,
            receive,
            body: None,
            stream_started: false,
            stream_consumed: false,
            disconnected: false,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn receive(&self) -> &SharedReceiver {
        &self.receive
    }

    pub fn connection(&self) -> &HttpConnection {
        &self.conn
    }

    pub fn into_parts(self) -> (Scope, SharedReceiver) {
        (self.conn.into_scope(), self.receive)
    }

    /// Body already buffered by [`Self::body`], if any.
    pub fn buffered_body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Lazily read the body chunk by chunk.
    ///
    /// The stream can only be taken once. If [`Self::body`] already buffered
    /// the payload, the buffer is replayed instead. A disconnect while
    /// waiting for more chunks yields `AppError::ClientDisconnect`.
    pub fn stream(&mut self) -> BoxStream<'_, AppResult<Bytes>> {
        if let Some(body) = self.body.clone() {
            return stream::iter((!body.is_empty()).then_some(Ok(body))).boxed();
        }
        if self.stream_started {
            return stream::once(async { Err(AppError::StreamConsumed) }).boxed();
        }
        self.stream_started = true;

        stream::unfold(self, |req| async move {
            if req.stream_consumed {
                return None;
            }
            loop {
                let item = match req.receive.receive().await {
                    Ok(Message::HttpRequest { body, more_body }) => {
                        if !more_body {
                            req.stream_consumed = true;
                        }
                        if body.is_empty() {
                            if req.stream_consumed {
                                return None;
                            }
                            continue;
                        }
                        Ok(body)
                    }
                    Ok(Message::HttpDisconnect) => {
                        req.disconnected = true;
                        req.stream_consumed = true;
                        Err(AppError::ClientDisconnect)
                    }
                    Ok(other) => {
                        req.stream_consumed = true;
                        Err(AppError::protocol(format!(
                            "unexpected {} while reading request body",
                            other.kind()
                        )))
                    }
                    Err(err) => {
                        req.stream_consumed = true;
                        Err(err)
                    }
                };
                return Some((item, req));
            }
        })
        .boxed()
    }

    /// Buffer the whole body. Fails with `StreamConsumed` once
    /// [`Self::stream`] has been taken.
    pub async fn body(&mut self) -> AppResult<Bytes> {
        if let Some(body) = &self.body {
            return Ok(body.clone());
        }
        if self.stream_started {
            return Err(AppError::StreamConsumed);
        }
        let mut buffer = BytesMut::new();
        {
            let mut chunks = self.stream();
            while let Some(chunk) = chunks.next().await {
                buffer.extend_from_slice(&chunk?);
            }
        }
        let body = buffer.freeze();
        self.body = Some(body.clone());
        Ok(body)
    }

    pub async fn json<T: DeserializeOwned>(&mut self) -> AppResult<T> {
        let body = self.body().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Poll the receive channel once without waiting.
    ///
    /// A queued body chunk is consumed and discarded by this check.
    pub fn is_disconnected(&mut self) -> bool {
        if !self.disconnected {
            if let Some(Ok(Message::HttpDisconnect)) = self.receive.receive().now_or_never() {
                self.disconnected = true;
            }
        }
        self.disconnected
    }
}

impl Deref for Request {
    type Target = HttpConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::{adapters::channel::channel, ports::channel::MessageSender};

    async fn request_with(messages: Vec<Message>) -> Request {
        let (tx, rx) = channel(messages.len() + 1);
        for message in messages {
            tx.send(message).await.unwrap();
        }
        Request::new(Scope::http(Method::POST, "/submit"), rx)
    }

    #[tokio::test]
    async fn test_body_collects_chunks() {
        let mut req = request_with(vec![
            Message::request_body("hello ", true),
            Message::request_body("world", false),
        ])
        .await;
        assert_eq!(req.body().await.unwrap(), Bytes::from_static(b"hello world"));
        assert_eq!(req.body().await.unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn test_body_then_stream_replays() {
        let mut req = request_with(vec![Message::request_body("abc", false)]).await;
        req.body().await.unwrap();
        let chunks: Vec<_> = req.stream().collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap(), &Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn test_body_after_partial_stream_fails() {
        let mut req = request_with(vec![
            Message::request_body("a", true),
            Message::request_body("b", false),
        ])
        .await;
        {
            let mut chunks = req.stream();
            assert_eq!(chunks.next().await.unwrap().unwrap(), Bytes::from_static(b"a"));
        }
        assert!(matches!(req.body().await, Err(AppError::StreamConsumed)));
        let mut again = req.stream();
        assert!(matches!(again.next().await, Some(Err(AppError::StreamConsumed))));
    }

    #[tokio::test]
    async fn test_disconnect_is_not_end_of_stream() {
        let mut req = request_with(vec![
            Message::request_body("a", true),
            Message::HttpDisconnect,
        ])
        .await;
        assert!(matches!(req.body().await, Err(AppError::ClientDisconnect)));
        assert!(req.is_disconnected());
    }

    #[tokio::test]
    async fn test_json_body() {
        #[derive(Deserialize)]
        struct Payload {
            name: String,
        }
        let mut req = request_with(vec![Message::request_body(r#"{"name":"ada"}"#, false)]).await;
        let payload: Payload = req.json().await.unwrap();
        assert_eq!(payload.name, "ada");
    }

    #[tokio::test]
    async fn test_is_disconnected_does_not_block() {
        let (_tx, rx) = channel(1);
        let mut req = Request::new(Scope::http(Method::GET, "/"), rx);
        assert!(!req.is_disconnected());

        let (tx, rx) = channel(1);
        tx.send(Message::HttpDisconnect).await.unwrap();
        let mut req = Request::new(Scope::http(Method::GET, "/"), rx);
        assert!(req.is_disconnected());
    }

    #[test]
    fn test_connection_views_are_derived_from_scope() {
        let scope = Scope::http(Method::GET, "/items")
            .with_query_string("a=1&b=two&a=3")
            .with_header("host", "example.org")
            .with_header("cookie", "session=abc; theme=\"dark\"; flag");
        let conn = HttpConnection::new(scope);

        assert_eq!(conn.url().unwrap().as_str(), "http://example.org/items?a=1&b=two&a=3");
        assert_eq!(conn.base_url().unwrap().as_str(), "http://example.org/");
        assert_eq!(conn.query_param("a"), Some("1"));
        assert_eq!(conn.query_params().len(), 3);
        assert_eq!(conn.cookies().get("session").map(String::as_str), Some("abc"));
        assert_eq!(conn.cookies().get("theme").map(String::as_str), Some("dark"));
        assert_eq!(conn.cookies().get("").map(String::as_str), Some("flag"));
        assert_eq!(conn.header("host"), Some("example.org"));
    }

    #[test]
    fn test_url_for_without_router() {
        let conn = HttpConnection::new(Scope::http(Method::GET, "/"));
        assert_eq!(
            conn.url_for("home", PathParams::new()),
            Err(UrlPathError::NoRouter)
        );
    }
}
