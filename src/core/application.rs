//! Top-level application: a router wrapped in middleware.
//!
//! The application installs itself in every scope it handles (reverse
//! lookups through [`HttpConnection::url_for`] need the root router) and
//! switches routing into "in app" mode, where unmatched requests and
//! disallowed methods surface as [`AppError::Http`]. Those errors are
//! rendered here as plain-text responses.
//!
//! [`HttpConnection::url_for`]: crate::adapters::request::HttpConnection::url_for
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU16, Ordering},
};

use async_trait::async_trait;
use http::StatusCode;
use tracing::Instrument;

use crate::{
    adapters::{
        middleware::{Dispatch, dispatch_layer},
        response::Response,
    },
    config::models::AppConfig,
    core::{
        router::Router,
        url::{UrlPath, UrlPathError},
    },
    metrics,
    ports::{
        app::{App, AppError, AppResult, Layer, SharedApp},
        channel::{MessageSender, SharedReceiver, SharedSender},
        message::Message,
        scope::{PathParams, Scope, ScopeKind},
    },
    tracing_setup,
};

enum MiddlewareEntry {
    Layer(Layer),
    Dispatch(Dispatch),
}

/// Builder for [`Application`].
pub struct ApplicationBuilder {
    router: Router,
    middleware: Vec<MiddlewareEntry>,
    config: AppConfig,
}

impl ApplicationBuilder {
    /// Add a middleware layer. The first one added is the outermost.
    pub fn middleware(mut self, layer: Layer) -> Self {
        self.middleware.push(MiddlewareEntry::Layer(layer));
        self
    }

    /// Add a request/response dispatch function, run through
    /// [`BaseHttpMiddleware`](crate::adapters::middleware::BaseHttpMiddleware)
    /// with the configured queue capacity.
    pub fn dispatch(mut self, dispatch: Dispatch) -> Self {
        self.middleware.push(MiddlewareEntry::Dispatch(dispatch));
        self
    }

    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Application {
        let router = Arc::new(
            self.router
                .apply_config(&self.config.routing)
                .with_not_found_close_code(self.config.websocket.not_found_close_code),
        );
        let capacity = self.config.middleware.queue_capacity;

        let mut app: SharedApp = Arc::clone(&router) as SharedApp;
        for entry in self.middleware.into_iter().rev() {
            let layer = match entry {
                MiddlewareEntry::Layer(layer) => layer,
                MiddlewareEntry::Dispatch(dispatch) => dispatch_layer(dispatch, capacity),
            };
            app = layer(app);
        }

        Application {
            router,
            app,
            debug: self.config.debug,
        }
    }
}

/// Root application handed to the server.
pub struct Application {
    router: Arc<Router>,
    app: SharedApp,
    debug: bool,
}

impl Application {
    pub fn builder(router: Router) -> ApplicationBuilder {
        ApplicationBuilder {
            router,
            middleware: Vec::new(),
            config: AppConfig::default(),
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn url_path_for(&self, name: &str, params: PathParams) -> Result<UrlPath, UrlPathError> {
        self.router.url_path_for(name, params)
    }
}

/// Send half that remembers whether (and with which status) a response started.
struct TrackingSender {
    inner: SharedSender,
    started: AtomicBool,
    status: AtomicU16,
}

impl TrackingSender {
    fn new(inner: SharedSender) -> Self {
        Self {
            inner,
            started: AtomicBool::new(false),
            status: AtomicU16::new(0),
        }
    }

    fn started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

#[async_trait]
impl MessageSender for TrackingSender {
    async fn send(&self, message: Message) -> AppResult<()> {
        if let Message::HttpResponseStart { status, .. } = &message {
            self.status.store(*status, Ordering::Release);
            self.started.store(true, Ordering::Release);
        }
        self.inner.send(message).await
    }
}

fn error_response(err: &AppError, debug: bool) -> Response {
    match err {
        AppError::Http {
            status,
            detail,
            headers,
        } => headers.iter().fold(
            Response::plain_text(*status, detail.clone()),
            |response, (name, value)| response.with_header(name, value),
        ),
        other if debug => Response::plain_text(StatusCode::INTERNAL_SERVER_ERROR, format!("{other:#}")),
        _ => Response::plain_text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
    }
}

#[async_trait]
impl App for Application {
    async fn call(&self, mut scope: Scope, receive: SharedReceiver, send: SharedSender) -> AppResult<()> {
        scope.router = Some(Arc::clone(&self.router));
        scope.in_app = true;

        let kind = scope.kind;
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = tracing_setup::create_request_span(kind.as_str(), scope.method_str(), &scope.path, &request_id);
        let timer = metrics::RequestTimer::new(kind.as_str());
        let tracker = Arc::new(TrackingSender::new(send));
        let response_scope = scope.clone();

        let result = self
            .app
            .call(scope, receive, Arc::clone(&tracker) as SharedSender)
            .instrument(span.clone())
            .await;

        let result = match result {
            Err(err) if kind == ScopeKind::Http && !tracker.started() => {
                let http_error = matches!(err, AppError::Http { .. });
                if !http_error {
                    tracing::error!(parent: &span, error = %err, "Unhandled application error");
                }
                error_response(&err, self.debug)
                    .send(&response_scope, &(Arc::clone(&tracker) as SharedSender))
                    .await?;
                if http_error { Ok(()) } else { Err(err) }
            }
            Err(err) => {
                tracing::error!(parent: &span, error = %err, "Application error after response start");
                Err(err)
            }
            ok => ok,
        };

        let status = tracker.status.load(Ordering::Acquire);
        if status != 0 {
            span.record("http.status_code", status);
        }
        span.record("duration_ms", timer.elapsed().as_millis() as u64);
        result
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::{
        adapters::{
            channel::{ChannelReceiver, channel},
            middleware::{Next, dispatch_fn, layer},
            request::Request,
        },
        core::endpoint::Endpoint,
    };

    async fn show_user(req: Request) -> AppResult<Response> {
        let url = req
            .url_for("user", req.path_params().clone())
            .map_err(eyre::Report::new)?;
        Ok(Response::plain_text(StatusCode::OK, url.to_string()))
    }

    async fn explode(_req: Request) -> AppResult<Response> {
        Err(AppError::Other(eyre::eyre!("database unavailable")))
    }

    async fn drain(rx: &ChannelReceiver) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = rx.try_receive().await {
            messages.push(message);
        }
        messages
    }

    async fn call(app: &Application, scope: Scope) -> (AppResult<()>, Vec<Message>) {
        let (client_tx, app_rx) = channel(8);
        let (app_tx, client_rx) = channel(8);
        client_tx.send(Message::request_body("", false)).await.unwrap();
        let result = app.call(scope, app_rx, app_tx).await;
        (result, drain(&client_rx).await)
    }

    fn router() -> Router {
        let mut router = Router::new();
        router
            .add_route("/users/{id:int}", Endpoint::handler(show_user), None, Some("user"))
            .unwrap()
            .add_route("/explode", Endpoint::handler(explode), None, None)
            .unwrap();
        router
    }

    fn status(messages: &[Message]) -> u16 {
        match messages.first() {
            Some(Message::HttpResponseStart { status, .. }) => *status,
            other => panic!("expected response start, got {other:?}"),
        }
    }

    fn body(messages: &[Message]) -> String {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::HttpResponseBody { body, .. } => Some(String::from_utf8_lossy(body).into_owned()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_url_for_uses_root_router() {
        let app = Application::builder(router()).build();
        let scope = Scope::http(Method::GET, "/users/9").with_header("host", "example.org");
        let (result, messages) = call(&app, scope).await;
        result.unwrap();
        assert_eq!(status(&messages), 200);
        assert_eq!(body(&messages), "http://example.org/users/9");
    }

    #[tokio::test]
    async fn test_http_errors_are_rendered() {
        let app = Application::builder(router()).build();
        let (result, messages) = call(&app, Scope::http(Method::GET, "/missing")).await;
        result.unwrap();
        assert_eq!(status(&messages), 404);
        assert_eq!(body(&messages), "Not Found");

        let (result, messages) = call(&app, Scope::http(Method::DELETE, "/users/1")).await;
        result.unwrap();
        assert_eq!(status(&messages), 405);
        match &messages[0] {
            Message::HttpResponseStart { headers, .. } => assert!(
                headers
                    .iter()
                    .any(|(k, v)| &k[..] == b"allow" && &v[..] == b"GET, HEAD")
            ),
            other => panic!("expected response start, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unhandled_error_renders_500_and_propagates() {
        let app = Application::builder(router()).build();
        let (result, messages) = call(&app, Scope::http(Method::GET, "/explode")).await;
        assert!(matches!(result, Err(AppError::Other(_))));
        assert_eq!(status(&messages), 500);
        assert_eq!(body(&messages), "Internal Server Error");
    }

    #[tokio::test]
    async fn test_debug_mode_shows_error_text() {
        let config = AppConfig {
            debug: true,
            ..AppConfig::default()
        };
        let app = Application::builder(router()).config(config).build();
        let (_, messages) = call(&app, Scope::http(Method::GET, "/explode")).await;
        assert_eq!(body(&messages), "database unavailable");
    }

    #[tokio::test]
    async fn test_first_middleware_is_outermost() {
        let outer = layer(|req: Request, next: Next| async move {
            let mut response = next.run(req).await?;
            let seen = response
                .headers()
                .get("x-order")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            response
                .headers_mut()
                .insert("x-order", http::HeaderValue::from_str(&format!("{seen},outer")).unwrap());
            Ok::<_, AppError>(response)
        });
        let inner = dispatch_fn(|req: Request, next: Next| async move {
            let mut response = next.run(req).await?;
            response
                .headers_mut()
                .insert("x-order", http::HeaderValue::from_static("inner"));
            Ok::<_, AppError>(response)
        });
        let app = Application::builder(router())
            .middleware(outer)
            .dispatch(inner)
            .build();
        let (result, messages) = call(&app, Scope::http(Method::GET, "/users/1")).await;
        result.unwrap();
        match &messages[0] {
            Message::HttpResponseStart { headers, .. } => assert!(
                headers
                    .iter()
                    .any(|(k, v)| &k[..] == b"x-order" && &v[..] == b"inner,outer")
            ),
            other => panic!("expected response start, got {other:?}"),
        }
    }
}
