//! Prefix- and host-owning route nodes.
//!
//! A [`Mount`] owns a child router or app under a path prefix and rewrites
//! `path`/`root_path` for it. A [`Host`] owns a child keyed on the `Host`
//! request header. Both own their child exclusively; there are no parent
//! links, so reverse lookups re-walk the tree from the root.
use std::{fmt, sync::Arc};

use crate::{
    core::{
        convertors::ParamValue,
        path::{CompiledPath, compile_path},
        route::{Match, RouteBuildError, RouteNode, ScopeUpdate},
        router::Router,
        url::{UrlPath, UrlPathError},
    },
    ports::{
        app::{AppResult, Layer, SharedApp},
        channel::{SharedReceiver, SharedSender},
        scope::{PathParams, Scope, ScopeKind},
    },
};

/// Child of a mount or host: the router (kept for reverse lookups) and the
/// app actually called, which may be the router wrapped in middleware.
#[derive(Clone)]
struct Child {
    router: Option<Arc<Router>>,
    app: SharedApp,
}

impl Child {
    fn router(router: Router) -> Self {
        let router = Arc::new(router);
        Self {
            app: Arc::clone(&router) as SharedApp,
            router: Some(router),
        }
    }

    fn app(app: SharedApp) -> Self {
        Self { router: None, app }
    }

    fn routes(&self) -> &[RouteNode] {
        self.router.as_deref().map(Router::routes).unwrap_or(&[])
    }

    /// First child route that can rebuild `name`; other errors stop the walk.
    fn url_path_for(&self, name: &str, params: &PathParams) -> Result<Option<UrlPath>, UrlPathError> {
        for route in self.routes() {
            match route.url_path_for(name, params.clone()) {
                Ok(url) => return Ok(Some(url)),
                Err(err) if err.is_no_match() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }
}

/// Remaining name after stripping `"{prefix}:"`, or the name itself for
/// unnamed nodes.
fn namespaced<'a>(prefix: Option<&str>, name: &'a str) -> Option<&'a str> {
    match prefix {
        None => Some(name),
        Some(prefix) => name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix(':')),
    }
}

fn param_text(value: ParamValue) -> String {
    match value {
        ParamValue::Str(s) => s,
        other => other.to_string(),
    }
}

/// Path-prefix owner.
#[derive(Clone)]
pub struct Mount {
    path: String,
    compiled: CompiledPath,
    name: Option<String>,
    child: Child,
}

impl Mount {
    fn build(path: &str, child: Child) -> Result<Self, RouteBuildError> {
        if !path.is_empty() && !path.starts_with('/') {
            return Err(
                crate::core::path::PathCompileError::MissingLeadingSlash(path.to_string()).into(),
            );
        }
        let path = path.trim_end_matches('/').to_string();
        let compiled = compile_path(&format!("{path}/{{path:path}}"))?;
        Ok(Self {
            path,
            compiled,
            name: None,
            child,
        })
    }

    /// Mount a router at `path`.
    pub fn new(path: &str, router: Router) -> Result<Self, RouteBuildError> {
        Self::build(path, Child::router(router))
    }

    /// Mount an opaque application at `path`.
    pub fn app(path: &str, app: SharedApp) -> Result<Self, RouteBuildError> {
        Self::build(path, Child::app(app))
    }

    /// Mount from either an app or a list of routes; one must be given.
    pub fn from_parts(
        path: &str,
        app: Option<SharedApp>,
        routes: Option<Vec<RouteNode>>,
    ) -> Result<Self, RouteBuildError> {
        match (app, routes) {
            (Some(app), _) => Self::app(path, app),
            (None, Some(routes)) => Self::new(path, Router::with_routes(routes)),
            (None, None) => Err(RouteBuildError::MissingMountTarget),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Wrap the mounted app; the router stays reachable for reverse lookups.
    pub fn with_middleware(mut self, layer: Layer) -> Self {
        self.child.app = layer(self.child.app);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn routes(&self) -> &[RouteNode] {
        self.child.routes()
    }

    pub fn matches(&self, scope: &Scope) -> Match {
        if !matches!(scope.kind, ScopeKind::Http | ScopeKind::WebSocket) {
            return Match::None;
        }
        let Some(mut matched) = self.compiled.match_path(&scope.path) else {
            return Match::None;
        };
        let rest = matched.remove("path").map(param_text).unwrap_or_default();
        let remaining = format!("/{rest}");
        let consumed = scope
            .path
            .strip_suffix(remaining.as_str())
            .unwrap_or(&scope.path);

        let mut update = ScopeUpdate::with_params(scope, matched);
        update.app_root_path = Some(
            scope
                .app_root_path
                .clone()
                .unwrap_or_else(|| scope.root_path.clone()),
        );
        update.root_path = Some(format!("{}{consumed}", scope.root_path));
        update.path = Some(remaining);
        update.endpoint = self.name.clone();
        Match::Full(update)
    }

    /// Rebuild a path through this mount.
    ///
    /// `name == mount name` with a `path` parameter builds a child-relative
    /// path directly; `"{mount}:{child}"` (or any name, for an unnamed mount)
    /// delegates to the child routes and re-applies the prefix.
    pub fn url_path_for(&self, name: &str, mut params: PathParams) -> Result<UrlPath, UrlPathError> {
        let original: Vec<String> = params.names().map(str::to_string).collect();
        let no_match = || UrlPathError::no_match(name, original.iter().map(String::as_str));

        if self.name.as_deref() == Some(name) && params.contains("path") {
            if let Some(value) = params.remove("path") {
                let text = param_text(value);
                params.insert("path", text.trim_start_matches('/').to_string());
            }
            let path = self.compiled.replace_params(&mut params)?;
            if params.is_empty() {
                return Ok(UrlPath::new(path));
            }
            return Err(no_match());
        }

        let Some(remaining_name) = namespaced(self.name.as_deref(), name) else {
            return Err(no_match());
        };
        let own_params = self.compiled.param_names();
        if own_params
            .iter()
            .any(|p| *p != "path" && !params.contains(p))
        {
            return Err(no_match());
        }

        let path_kwarg = params.remove("path");
        params.insert("path", "");
        let prefix = self.compiled.replace_params(&mut params)?;
        if let Some(value) = path_kwarg {
            params.insert("path", value);
        }

        match self.child.url_path_for(remaining_name, &params)? {
            Some(url) => Ok(UrlPath {
                path: format!("{}{}", prefix.trim_end_matches('/'), url.path),
                protocol: url.protocol,
                host: url.host,
            }),
            None => Err(no_match()),
        }
    }

    pub async fn handle(&self, scope: Scope, receive: SharedReceiver, send: SharedSender) -> AppResult<()> {
        tracing::debug!(mount = %self.path, path = %scope.path, root_path = %scope.root_path, "Entering mount");
        self.child.app.call(scope, receive, send).await
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("routes", &self.routes().len())
            .finish()
    }
}

/// Host-header owner.
#[derive(Clone)]
pub struct Host {
    host: String,
    compiled: CompiledPath,
    name: Option<String>,
    child: Child,
}

impl Host {
    fn build(host: &str, child: Child) -> Result<Self, RouteBuildError> {
        Ok(Self {
            host: host.to_string(),
            compiled: compile_path(host)?,
            name: None,
            child,
        })
    }

    /// Route requests whose host matches `host` (e.g. `{sub}.example.org`)
    /// to `router`.
    pub fn new(host: &str, router: Router) -> Result<Self, RouteBuildError> {
        Self::build(host, Child::router(router))
    }

    pub fn app(host: &str, app: SharedApp) -> Result<Self, RouteBuildError> {
        Self::build(host, Child::app(app))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_middleware(mut self, layer: Layer) -> Self {
        self.child.app = layer(self.child.app);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn routes(&self) -> &[RouteNode] {
        self.child.routes()
    }

    pub fn matches(&self, scope: &Scope) -> Match {
        if !matches!(scope.kind, ScopeKind::Http | ScopeKind::WebSocket) {
            return Match::None;
        }
        let header = scope.header("host").unwrap_or_default();
        let host = header.split(':').next().unwrap_or_default();
        match self.compiled.match_path(host) {
            Some(matched) => {
                let mut update = ScopeUpdate::with_params(scope, matched);
                update.endpoint = self.name.clone();
                Match::Full(update)
            }
            None => Match::None,
        }
    }

    /// Rebuild a URL path through this host; the result carries the host
    /// override instead of a path prefix.
    pub fn url_path_for(&self, name: &str, mut params: PathParams) -> Result<UrlPath, UrlPathError> {
        let original: Vec<String> = params.names().map(str::to_string).collect();
        let no_match = || UrlPathError::no_match(name, original.iter().map(String::as_str));

        if self.name.as_deref() == Some(name) && params.contains("path") {
            let path = params.remove("path").map(param_text).unwrap_or_default();
            let host = self.compiled.replace_params(&mut params)?;
            if params.is_empty() {
                return Ok(UrlPath::new(path).with_host(Some(host)));
            }
            return Err(no_match());
        }

        let Some(remaining_name) = namespaced(self.name.as_deref(), name) else {
            return Err(no_match());
        };
        if self
            .compiled
            .param_names()
            .iter()
            .any(|p| !params.contains(p))
        {
            return Err(no_match());
        }
        let host = self.compiled.replace_params(&mut params)?;

        match self.child.url_path_for(remaining_name, &params)? {
            Some(url) => Ok(UrlPath {
                path: url.path,
                protocol: url.protocol,
                host: Some(host),
            }),
            None => Err(no_match()),
        }
    }

    pub async fn handle(&self, scope: Scope, receive: SharedReceiver, send: SharedSender) -> AppResult<()> {
        self.child.app.call(scope, receive, send).await
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("host", &self.host)
            .field("name", &self.name)
            .field("routes", &self.routes().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode};

    use super::*;
    use crate::{
        adapters::{request::Request, response::Response},
        core::{endpoint::Endpoint, route::Route, url::Protocol},
    };

    async fn show(_req: Request) -> AppResult<Response> {
        Ok(Response::plain_text(StatusCode::OK, "ok"))
    }

    fn users_router() -> Router {
        let mut router = Router::new();
        router.add(
            Route::new("/{id:int}", Endpoint::handler(show))
                .unwrap()
                .with_name("detail"),
        );
        router
    }

    #[test]
    fn test_mount_rewrites_path_and_root_path() {
        let mount = Mount::new("/users/", users_router()).unwrap();
        assert_eq!(mount.path(), "/users");

        let scope = Scope::http(Method::GET, "/users/42").with_root_path("/api");
        match mount.matches(&scope) {
            Match::Full(update) => {
                assert_eq!(update.path.as_deref(), Some("/42"));
                assert_eq!(update.root_path.as_deref(), Some("/api/users"));
                assert_eq!(update.app_root_path.as_deref(), Some("/api"));
                assert!(!update.path_params.contains("path"));
            }
            other => panic!("expected full match, got {other:?}"),
        }
        assert!(mount.matches(&Scope::http(Method::GET, "/usersx")).is_none());
    }

    #[test]
    fn test_mount_keeps_its_own_params() {
        let mount = Mount::new("/orgs/{org}", users_router()).unwrap();
        match mount.matches(&Scope::http(Method::GET, "/orgs/acme/7")) {
            Match::Full(update) => {
                assert_eq!(update.path_params.get("org"), Some(&ParamValue::from("acme")));
                assert_eq!(update.path.as_deref(), Some("/7"));
                assert_eq!(update.root_path.as_deref(), Some("/orgs/acme"));
            }
            other => panic!("expected full match, got {other:?}"),
        }

        let url = mount
            .url_path_for("detail", PathParams::from([("org", ParamValue::from("acme")), ("id", ParamValue::Int(7))]))
            .unwrap();
        assert_eq!(url, "/orgs/acme/7");
    }

    #[test]
    fn test_namespaced_lookup() {
        let mount = Mount::new("/users", users_router()).unwrap().with_name("users");

        let url = mount
            .url_path_for("users:detail", PathParams::from([("id", 3_i64)]))
            .unwrap();
        assert_eq!(url, "/users/3");
        assert_eq!(url.protocol, Some(Protocol::Http));

        assert!(
            mount
                .url_path_for("detail", PathParams::from([("id", 3_i64)]))
                .unwrap_err()
                .is_no_match()
        );
    }

    #[test]
    fn test_mount_name_with_path_param() {
        let mount = Mount::new("/static", Router::new()).unwrap().with_name("static");
        let url = mount
            .url_path_for("static", PathParams::from([("path", "/css/site.css")]))
            .unwrap();
        assert_eq!(url, "/static/css/site.css");
        assert_eq!(url.protocol, None);
    }

    #[test]
    fn test_mount_from_parts_requires_target() {
        assert!(matches!(
            Mount::from_parts("/x", None, None),
            Err(RouteBuildError::MissingMountTarget)
        ));
        assert!(Mount::from_parts("/x", None, Some(Vec::new())).is_ok());
    }

    #[test]
    fn test_host_matches_without_port() {
        let host = Host::new("{sub}.example.org", users_router()).unwrap().with_name("tenant");
        let scope = Scope::http(Method::GET, "/1").with_header("host", "acme.example.org:8443");
        match host.matches(&scope) {
            Match::Full(update) => {
                assert_eq!(update.path_params.get("sub"), Some(&ParamValue::from("acme")));
                assert!(update.path.is_none());
            }
            other => panic!("expected full match, got {other:?}"),
        }
        assert!(
            host.matches(&Scope::http(Method::GET, "/1").with_header("host", "example.org"))
                .is_none()
        );
    }

    #[test]
    fn test_host_reverse_lookup_sets_host() {
        let host = Host::new("{sub}.example.org", users_router()).unwrap().with_name("tenant");
        let url = host
            .url_path_for(
                "tenant:detail",
                PathParams::from([("sub", ParamValue::from("acme")), ("id", ParamValue::Int(9))]),
            )
            .unwrap();
        assert_eq!(url, "/9");
        assert_eq!(url.host.as_deref(), Some("acme.example.org"));

        let url = host
            .url_path_for(
                "tenant",
                PathParams::from([("sub", "beta"), ("path", "/home")]),
            )
            .unwrap();
        assert_eq!(url, "/home");
        assert_eq!(url.host.as_deref(), Some("beta.example.org"));
    }
}
