//! Ordered route list and the dispatch priority chain.
//!
//! A connection is offered to every route in insertion order. The first
//! full match wins; otherwise the first partial match answers 405; otherwise
//! an HTTP request whose path matches with the trailing slash toggled is
//! redirected; otherwise a `lifespan` scope goes to the lifespan delegate;
//! otherwise the default handler (404, or a closed websocket) runs.
use std::fmt;

use async_trait::async_trait;
use http::StatusCode;

use crate::{
    adapters::{response::Response, websocket::WebSocketClose},
    config::models::RoutingConfig,
    core::{
        endpoint::{Endpoint, WebSocketEndpoint},
        lifespan::{EventType, Lifespan, LifespanError, LifespanHook},
        mount::{Host, Mount},
        route::{Match, Route, RouteBuildError, RouteNode, WebSocketRoute},
        url::{UrlPath, UrlPathError, url_from_scope},
    },
    metrics,
    ports::{
        app::{App, AppError, AppResult, SharedApp},
        channel::{SharedReceiver, SharedSender},
        scope::{PathParams, Scope, ScopeKind},
    },
};

/// Path with its trailing slash added or removed.
fn toggle_trailing_slash(path: &str) -> String {
    match path.strip_suffix('/') {
        Some(stripped) => stripped.to_string(),
        None => format!("{path}/"),
    }
}

/// Owner of an ordered list of [`RouteNode`]s.
#[derive(Clone)]
pub struct Router {
    routes: Vec<RouteNode>,
    redirect_trailing_slash: bool,
    redirect_status: StatusCode,
    not_found_close_code: u16,
    default: Option<SharedApp>,
    lifespan: Option<Lifespan>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            redirect_trailing_slash: true,
            redirect_status: StatusCode::PERMANENT_REDIRECT,
            not_found_close_code: crate::adapters::websocket::CLOSE_NORMAL,
            default: None,
            lifespan: None,
        }
    }

    pub fn with_routes(routes: Vec<RouteNode>) -> Self {
        Self {
            routes,
            ..Self::new()
        }
    }

    /// Router configured from the `[routing]` section.
    pub fn from_config(config: &RoutingConfig) -> Self {
        Self::new().apply_config(config)
    }

    /// Apply the `[routing]` section, keeping the routes.
    ///
    /// An unusable redirect status falls back to 308 with a warning; run
    /// [`AppConfigValidator`](crate::config::AppConfigValidator) first to
    /// reject it instead.
    pub fn apply_config(mut self, config: &RoutingConfig) -> Self {
        self.redirect_status = match StatusCode::from_u16(config.redirect_status) {
            Ok(status) if status.is_redirection() => status,
            _ => {
                tracing::warn!(
                    status = config.redirect_status,
                    "Invalid redirect status in config, using 308"
                );
                StatusCode::PERMANENT_REDIRECT
            }
        };
        self.redirect_trailing_slash = config.redirect_trailing_slash;
        self
    }

    pub fn with_redirect_trailing_slash(mut self, enabled: bool) -> Self {
        self.redirect_trailing_slash = enabled;
        self
    }

    pub fn with_redirect_status(mut self, status: StatusCode) -> Self {
        self.redirect_status = status;
        self
    }

    /// Close code sent to websocket sessions that match no route.
    pub fn with_not_found_close_code(mut self, code: u16) -> Self {
        self.not_found_close_code = code;
        self
    }

    pub fn routes(&self) -> &[RouteNode] {
        &self.routes
    }

    pub fn lifespan(&self) -> Option<&Lifespan> {
        self.lifespan.as_ref()
    }

    /// Append an already built node.
    pub fn add(&mut self, node: impl Into<RouteNode>) -> &mut Self {
        self.routes.push(node.into());
        self
    }

    pub fn add_route(
        &mut self,
        path: &str,
        endpoint: Endpoint,
        methods: Option<&[&str]>,
        name: Option<&str>,
    ) -> Result<&mut Self, RouteBuildError> {
        let mut route = Route::new(path, endpoint)?;
        if let Some(methods) = methods {
            route = route.with_methods(methods.iter().copied());
        }
        if let Some(name) = name {
            route = route.with_name(name);
        }
        Ok(self.add(route))
    }

    pub fn add_websocket_route(
        &mut self,
        path: &str,
        endpoint: WebSocketEndpoint,
        name: Option<&str>,
    ) -> Result<&mut Self, RouteBuildError> {
        let mut route = WebSocketRoute::new(path, endpoint)?;
        if let Some(name) = name {
            route = route.with_name(name);
        }
        Ok(self.add(route))
    }

    /// Mount an application under `path`.
    pub fn mount(&mut self, path: &str, app: SharedApp, name: Option<&str>) -> Result<&mut Self, RouteBuildError> {
        let mut mount = Mount::app(path, app)?;
        if let Some(name) = name {
            mount = mount.with_name(name);
        }
        Ok(self.add(mount))
    }

    /// Mount a sub-router under `path`; its routes stay visible to reverse lookups.
    pub fn mount_router(
        &mut self,
        path: &str,
        router: Router,
        name: Option<&str>,
    ) -> Result<&mut Self, RouteBuildError> {
        let mut mount = Mount::new(path, router)?;
        if let Some(name) = name {
            mount = mount.with_name(name);
        }
        Ok(self.add(mount))
    }

    /// Route requests for `host` (a template such as `{tenant}.example.org`) to `app`.
    pub fn host(&mut self, host: &str, app: SharedApp, name: Option<&str>) -> Result<&mut Self, RouteBuildError> {
        let mut node = Host::app(host, app)?;
        if let Some(name) = name {
            node = node.with_name(name);
        }
        Ok(self.add(node))
    }

    pub fn host_router(
        &mut self,
        host: &str,
        router: Router,
        name: Option<&str>,
    ) -> Result<&mut Self, RouteBuildError> {
        let mut node = Host::new(host, router)?;
        if let Some(name) = name {
            node = node.with_name(name);
        }
        Ok(self.add(node))
    }

    /// Replace the not-found handler.
    pub fn set_default(&mut self, app: SharedApp) -> &mut Self {
        self.default = Some(app);
        self
    }

    pub fn set_lifespan(&mut self, lifespan: Lifespan) -> &mut Self {
        self.lifespan = Some(lifespan);
        self
    }

    /// Register a startup or shutdown hook on the handler-style lifespan.
    pub fn add_event_handler(&mut self, event: EventType, hook: LifespanHook) -> Result<&mut Self, LifespanError> {
        self.lifespan
            .get_or_insert_with(Lifespan::handlers)
            .add_event_handler(event, hook)?;
        Ok(self)
    }

    /// Rebuild the path registered under `name`.
    ///
    /// Routes are tried in order; a route that does not know the name is
    /// skipped, while any other failure (such as a parameter its convertor
    /// refuses) is returned immediately.
    pub fn url_path_for(&self, name: &str, params: PathParams) -> Result<UrlPath, UrlPathError> {
        for route in &self.routes {
            match route.url_path_for(name, params.clone()) {
                Ok(url) => return Ok(url),
                Err(err) if err.is_no_match() => continue,
                Err(err) => return Err(err),
            }
        }
        Err(UrlPathError::no_match(name, params.names()))
    }

    async fn not_found(&self, scope: Scope, receive: SharedReceiver, send: SharedSender) -> AppResult<()> {
        if let Some(default) = &self.default {
            return default.call(scope, receive, send).await;
        }
        match scope.kind {
            ScopeKind::WebSocket => {
                WebSocketClose::new(self.not_found_close_code)
                    .call(scope, receive, send)
                    .await
            }
            _ if scope.in_app => Err(AppError::http(StatusCode::NOT_FOUND)),
            _ => {
                Response::plain_text(StatusCode::NOT_FOUND, "Not Found")
                    .send(&scope, &send)
                    .await
            }
        }
    }

    /// Redirect target when only the slash-toggled path matches.
    fn redirect_target(&self, scope: &Scope) -> AppResult<Option<String>> {
        if scope.kind != ScopeKind::Http || !self.redirect_trailing_slash || scope.path == "/" {
            return Ok(None);
        }
        let mut redirect_scope = scope.clone();
        redirect_scope.path = toggle_trailing_slash(&scope.path);
        if self.routes.iter().all(|route| route.matches(&redirect_scope).is_none()) {
            return Ok(None);
        }
        let url = url_from_scope(&redirect_scope).map_err(|err| AppError::Other(eyre::Report::new(err)))?;
        Ok(Some(url.to_string()))
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes)
            .field("redirect_trailing_slash", &self.redirect_trailing_slash)
            .field("redirect_status", &self.redirect_status)
            .field("lifespan", &self.lifespan)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl App for Router {
    async fn call(&self, mut scope: Scope, receive: SharedReceiver, send: SharedSender) -> AppResult<()> {
        let kind = scope.kind;
        let mut partial = None;

        for route in &self.routes {
            match route.matches(&scope) {
                Match::Full(update) => {
                    tracing::debug!(kind = %kind, path = %scope.path, endpoint = ?update.endpoint, "Full match");
                    metrics::record_dispatch(kind.as_str(), "full");
                    update.apply(&mut scope);
                    return route.handle(scope, receive, send).await;
                }
                Match::Partial(update) if partial.is_none() => partial = Some((route, update)),
                _ => {}
            }
        }

        if let Some((route, update)) = partial {
            tracing::debug!(kind = %kind, path = %scope.path, method = %scope.method_str(), "Partial match");
            metrics::record_dispatch(kind.as_str(), "partial");
            update.apply(&mut scope);
            return route.handle(scope, receive, send).await;
        }

        if let Some(location) = self.redirect_target(&scope)? {
            tracing::debug!(path = %scope.path, location = %location, "Redirecting trailing slash");
            metrics::record_dispatch(kind.as_str(), "redirect");
            return Response::redirect(&location, self.redirect_status)?
                .send(&scope, &send)
                .await;
        }

        if kind == ScopeKind::Lifespan {
            metrics::record_dispatch(kind.as_str(), "lifespan");
            return match &self.lifespan {
                Some(lifespan) => lifespan.call(scope, receive, send).await,
                None => Lifespan::default().call(scope, receive, send).await,
            };
        }

        tracing::debug!(kind = %kind, path = %scope.path, "No route matched");
        metrics::record_dispatch(kind.as_str(), "not_found");
        self.not_found(scope, receive, send).await
    }
}
