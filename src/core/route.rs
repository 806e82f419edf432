//! Route nodes and their match results.
//!
//! Every node answers two questions: does it match a scope (`matches`), and
//! can it rebuild a path for a name and a set of parameters
//! (`url_path_for`). [`RouteNode`] is the tagged union a
//! [`Router`](crate::core::router::Router) owns.
use std::{collections::BTreeSet, fmt};

use http::StatusCode;
use thiserror::Error;

use crate::{
    adapters::response::Response,
    core::{
        endpoint::{Endpoint, WebSocketEndpoint},
        mount::{Host, Mount},
        path::{CompiledPath, PathCompileError, compile_path},
        url::{Protocol, UrlPath, UrlPathError},
    },
    ports::{
        app::{AppError, AppResult, SharedApp},
        channel::{SharedReceiver, SharedSender},
        scope::{PathParams, Scope, ScopeKind},
    },
};

/// Errors raised while assembling the route tree.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RouteBuildError {
    #[error(transparent)]
    Path(#[from] PathCompileError),

    #[error("Mount requires either an app or a list of routes")]
    MissingMountTarget,
}

/// Scope changes a matching node applies before handing control down.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeUpdate {
    /// Ancestor parameters merged with the ones this node captured.
    pub path_params: PathParams,
    pub endpoint: Option<String>,
    pub path: Option<String>,
    pub root_path: Option<String>,
    pub app_root_path: Option<String>,
}

impl ScopeUpdate {
    pub fn with_params(scope: &Scope, matched: PathParams) -> Self {
        let mut path_params = scope.path_params.clone();
        path_params.extend(matched);
        Self {
            path_params,
            ..Self::default()
        }
    }

    pub fn apply(self, scope: &mut Scope) {
        scope.path_params = self.path_params;
        if let Some(endpoint) = self.endpoint {
            scope.endpoint = Some(endpoint);
        }
        if let Some(path) = self.path {
            scope.path = path;
        }
        if let Some(root_path) = self.root_path {
            scope.root_path = root_path;
        }
        if let Some(app_root_path) = self.app_root_path {
            scope.app_root_path = Some(app_root_path);
        }
    }
}

/// Outcome of matching one node against a scope.
#[derive(Debug, Clone, PartialEq)]
pub enum Match {
    None,
    /// Path matched but the method did not.
    Partial(ScopeUpdate),
    Full(ScopeUpdate),
}

impl Match {
    pub fn is_none(&self) -> bool {
        matches!(self, Match::None)
    }
}

fn normalize_methods<I, S>(methods: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set: BTreeSet<String> = methods
        .into_iter()
        .map(|m| m.as_ref().to_ascii_uppercase())
        .collect();
    if set.contains("GET") {
        set.insert("HEAD".to_string());
    }
    set
}

/// Check that `params` names exactly the template's parameters.
fn same_param_names(compiled: &CompiledPath, params: &PathParams) -> bool {
    let given: BTreeSet<&str> = params.names().collect();
    given == compiled.param_names()
}

/// HTTP leaf route.
#[derive(Clone)]
pub struct Route {
    path: String,
    compiled: CompiledPath,
    app: SharedApp,
    methods: Option<BTreeSet<String>>,
    name: Option<String>,
    include_in_schema: bool,
}

impl Route {
    /// Build a route for `path` (must start with `/`).
    ///
    /// Handler endpoints default to `GET` (and therefore `HEAD`); raw apps
    /// accept every method until [`Route::with_methods`] narrows them.
    pub fn new(path: &str, endpoint: Endpoint) -> Result<Self, RouteBuildError> {
        if !path.starts_with('/') {
            return Err(PathCompileError::MissingLeadingSlash(path.to_string()).into());
        }
        let compiled = compile_path(path)?;
        let methods = endpoint.is_handler().then(|| normalize_methods(["GET"]));
        let name = endpoint.default_name().map(str::to_string);
        Ok(Self {
            path: path.to_string(),
            compiled,
            app: endpoint.into_app(),
            methods,
            name,
            include_in_schema: true,
        })
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.methods = Some(normalize_methods(methods));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn include_in_schema(mut self, include: bool) -> Self {
        self.include_in_schema = include;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn methods(&self) -> Option<&BTreeSet<String>> {
        self.methods.as_ref()
    }

    pub fn is_in_schema(&self) -> bool {
        self.include_in_schema
    }

    /// `Allow` header value, e.g. `"GET, HEAD"`.
    pub fn allow_header(&self) -> Option<String> {
        self.methods
            .as_ref()
            .map(|m| m.iter().map(String::as_str).collect::<Vec<_>>().join(", "))
    }

    fn allows(&self, scope: &Scope) -> bool {
        match &self.methods {
            Some(methods) => methods.contains(scope.method_str()),
            None => true,
        }
    }

    pub fn matches(&self, scope: &Scope) -> Match {
        if scope.kind != ScopeKind::Http {
            return Match::None;
        }
        let Some(matched) = self.compiled.match_path(&scope.path) else {
            return Match::None;
        };
        let mut update = ScopeUpdate::with_params(scope, matched);
        update.endpoint = self.name.clone();
        if self.allows(scope) {
            Match::Full(update)
        } else {
            Match::Partial(update)
        }
    }

    pub fn url_path_for(&self, name: &str, mut params: PathParams) -> Result<UrlPath, UrlPathError> {
        if self.name.as_deref() != Some(name) || !same_param_names(&self.compiled, &params) {
            return Err(UrlPathError::no_match(name, params.names()));
        }
        let path = self.compiled.replace_params(&mut params)?;
        Ok(UrlPath::new(path).with_protocol(Some(Protocol::Http)))
    }

    /// Run the endpoint, or answer 405 when the method is not allowed.
    pub async fn handle(&self, scope: Scope, receive: SharedReceiver, send: SharedSender) -> AppResult<()> {
        if self.allows(&scope) {
            return self.app.call(scope, receive, send).await;
        }
        let allow = self.allow_header().unwrap_or_default();
        tracing::debug!(path = %scope.path, method = %scope.method_str(), allow = %allow, "Method not allowed");
        if scope.in_app {
            return Err(AppError::http_with_headers(
                StatusCode::METHOD_NOT_ALLOWED,
                vec![("allow".to_string(), allow)],
            ));
        }
        Response::plain_text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
            .with_header("allow", &allow)
            .send(&scope, &send)
            .await
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("methods", &self.methods)
            .finish()
    }
}

/// Websocket leaf route. Has no method concept, so it never matches partially.
#[derive(Clone)]
pub struct WebSocketRoute {
    path: String,
    compiled: CompiledPath,
    app: SharedApp,
    name: Option<String>,
}

impl WebSocketRoute {
    pub fn new(path: &str, endpoint: WebSocketEndpoint) -> Result<Self, RouteBuildError> {
        if !path.starts_with('/') {
            return Err(PathCompileError::MissingLeadingSlash(path.to_string()).into());
        }
        let compiled = compile_path(path)?;
        let name = endpoint.default_name().map(str::to_string);
        Ok(Self {
            path: path.to_string(),
            compiled,
            app: endpoint.into_app(),
            name,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn matches(&self, scope: &Scope) -> Match {
        if scope.kind != ScopeKind::WebSocket {
            return Match::None;
        }
        match self.compiled.match_path(&scope.path) {
            Some(matched) => {
                let mut update = ScopeUpdate::with_params(scope, matched);
                update.endpoint = self.name.clone();
                Match::Full(update)
            }
            None => Match::None,
        }
    }

    pub fn url_path_for(&self, name: &str, mut params: PathParams) -> Result<UrlPath, UrlPathError> {
        if self.name.as_deref() != Some(name) || !same_param_names(&self.compiled, &params) {
            return Err(UrlPathError::no_match(name, params.names()));
        }
        let path = self.compiled.replace_params(&mut params)?;
        Ok(UrlPath::new(path).with_protocol(Some(Protocol::WebSocket)))
    }

    pub async fn handle(&self, scope: Scope, receive: SharedReceiver, send: SharedSender) -> AppResult<()> {
        self.app.call(scope, receive, send).await
    }
}

impl fmt::Debug for WebSocketRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketRoute")
            .field("path", &self.path)
            .field("name", &self.name)
            .finish()
    }
}

/// One entry of a router's ordered route list.
#[derive(Debug, Clone)]
pub enum RouteNode {
    Route(Route),
    WebSocket(WebSocketRoute),
    Mount(Mount),
    Host(Host),
}

impl RouteNode {
    pub fn name(&self) -> Option<&str> {
        match self {
            RouteNode::Route(r) => r.name(),
            RouteNode::WebSocket(r) => r.name(),
            RouteNode::Mount(m) => m.name(),
            RouteNode::Host(h) => h.name(),
        }
    }

    pub fn matches(&self, scope: &Scope) -> Match {
        match self {
            RouteNode::Route(r) => r.matches(scope),
            RouteNode::WebSocket(r) => r.matches(scope),
            RouteNode::Mount(m) => m.matches(scope),
            RouteNode::Host(h) => h.matches(scope),
        }
    }

    pub fn url_path_for(&self, name: &str, params: PathParams) -> Result<UrlPath, UrlPathError> {
        match self {
            RouteNode::Route(r) => r.url_path_for(name, params),
            RouteNode::WebSocket(r) => r.url_path_for(name, params),
            RouteNode::Mount(m) => m.url_path_for(name, params),
            RouteNode::Host(h) => h.url_path_for(name, params),
        }
    }

    pub async fn handle(&self, scope: Scope, receive: SharedReceiver, send: SharedSender) -> AppResult<()> {
        match self {
            RouteNode::Route(r) => r.handle(scope, receive, send).await,
            RouteNode::WebSocket(r) => r.handle(scope, receive, send).await,
            RouteNode::Mount(m) => m.handle(scope, receive, send).await,
            RouteNode::Host(h) => h.handle(scope, receive, send).await,
        }
    }
}

impl From<Route> for RouteNode {
    fn from(route: Route) -> Self {
        RouteNode::Route(route)
    }
}

impl From<WebSocketRoute> for RouteNode {
    fn from(route: WebSocketRoute) -> Self {
        RouteNode::WebSocket(route)
    }
}

impl From<Mount> for RouteNode {
    fn from(mount: Mount) -> Self {
        RouteNode::Mount(mount)
    }
}

impl From<Host> for RouteNode {
    fn from(host: Host) -> Self {
        RouteNode::Host(host)
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::{
        adapters::{request::Request, websocket::WebSocket},
        core::convertors::ParamValue,
    };

    async fn show_user(_req: Request) -> AppResult<Response> {
        Ok(Response::plain_text(StatusCode::OK, "user"))
    }

    async fn chat(mut ws: WebSocket) -> AppResult<()> {
        ws.accept(None, Vec::new()).await
    }

    #[test]
    fn test_route_full_and_partial_match() {
        let route = Route::new("/users/{id:int}", Endpoint::handler(show_user)).unwrap();

        match route.matches(&Scope::http(Method::GET, "/users/7")) {
            Match::Full(update) => {
                assert_eq!(update.path_params.get("id"), Some(&ParamValue::Int(7)));
                assert_eq!(update.endpoint.as_deref(), Some("show_user"));
            }
            other => panic!("expected full match, got {other:?}"),
        }
        assert!(matches!(
            route.matches(&Scope::http(Method::POST, "/users/7")),
            Match::Partial(_)
        ));
        assert!(route.matches(&Scope::http(Method::GET, "/users/x")).is_none());
        assert!(route.matches(&Scope::websocket("/users/7")).is_none());
    }

    #[test]
    fn test_get_implies_head() {
        let route = Route::new("/items", Endpoint::handler(show_user))
            .unwrap()
            .with_methods(["get", "post"]);
        assert_eq!(route.allow_header().as_deref(), Some("GET, HEAD, POST"));
        assert!(matches!(
            route.matches(&Scope::http(Method::HEAD, "/items")),
            Match::Full(_)
        ));
    }

    #[test]
    fn test_route_requires_leading_slash() {
        assert!(matches!(
            Route::new("items", Endpoint::handler(show_user)),
            Err(RouteBuildError::Path(PathCompileError::MissingLeadingSlash(_)))
        ));
    }

    #[test]
    fn test_route_reverse_lookup() {
        let route = Route::new("/users/{id:int}", Endpoint::handler(show_user))
            .unwrap()
            .with_name("user");
        let url = route.url_path_for("user", PathParams::from([("id", 5_i64)])).unwrap();
        assert_eq!(url, "/users/5");
        assert_eq!(url.protocol, Some(Protocol::Http));

        assert!(matches!(
            route.url_path_for("user", PathParams::from([("id", -5_i64)])),
            Err(UrlPathError::InvalidParam { .. })
        ));
        assert!(route.url_path_for("user", PathParams::new()).unwrap_err().is_no_match());
        assert!(
            route
                .url_path_for("other", PathParams::from([("id", 5_i64)]))
                .unwrap_err()
                .is_no_match()
        );
    }

    #[test]
    fn test_websocket_route_never_partial() {
        let route = WebSocketRoute::new("/ws/{room}", WebSocketEndpoint::session(chat)).unwrap();
        assert_eq!(route.name(), Some("chat"));
        assert!(matches!(route.matches(&Scope::websocket("/ws/lobby")), Match::Full(_)));
        assert!(route.matches(&Scope::http(Method::GET, "/ws/lobby")).is_none());

        let url = route
            .url_path_for("chat", PathParams::from([("room", "lobby")]))
            .unwrap();
        assert_eq!(url, "/ws/lobby");
        assert_eq!(url.protocol, Some(Protocol::WebSocket));
    }
}
