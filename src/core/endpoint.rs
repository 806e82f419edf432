//! Capability-tagged endpoints.
//!
//! The kind of an endpoint (async handler, blocking handler or raw app) is
//! fixed when it is registered, so dispatch never inspects the callable again.
use std::{any::type_name, fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use futures_util::{FutureExt, future::BoxFuture};
use tracing::Instrument;

use crate::{
    adapters::{request::Request, response::Response, websocket::WebSocket},
    ports::{
        app::{App, AppError, AppResult, SharedApp},
        channel::{SharedReceiver, SharedSender},
        scope::Scope,
    },
    tracing_setup,
};

pub type AsyncHandler = Arc<dyn Fn(Request) -> BoxFuture<'static, AppResult<Response>> + Send + Sync>;
pub type BlockingHandler = Arc<dyn Fn(Request) -> AppResult<Response> + Send + Sync>;
pub type SessionHandler = Arc<dyn Fn(WebSocket) -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

/// Last path segment of a type name, or `None` for closures.
fn callable_name<T: ?Sized>() -> Option<String> {
    let full = type_name::<T>();
    if full.contains("{{closure}}") || full.contains("{closure") {
        return None;
    }
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().map(str::to_string)
}

#[derive(Clone)]
pub enum EndpointKind {
    Async(AsyncHandler),
    /// Runs on the blocking thread pool via `tokio::task::spawn_blocking`.
    Blocking(BlockingHandler),
    App(SharedApp),
}

/// HTTP endpoint registered on a [`Route`](crate::core::route::Route).
#[derive(Clone)]
pub struct Endpoint {
    kind: EndpointKind,
    name: Option<String>,
}

impl Endpoint {
    /// Async `Request -> Response` function.
    pub fn handler<F, Fut>(handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<Response>> + Send + 'static,
    {
        Self {
            name: callable_name::<F>(),
            kind: EndpointKind::Async(Arc::new(move |req| handler(req).boxed())),
        }
    }

    /// Synchronous `Request -> Response` function.
    pub fn blocking<F>(handler: F) -> Self
    where
        F: Fn(Request) -> AppResult<Response> + Send + Sync + 'static,
    {
        Self {
            name: callable_name::<F>(),
            kind: EndpointKind::Blocking(Arc::new(handler)),
        }
    }

    /// Raw application; named after its type.
    pub fn app<A: App>(app: A) -> Self {
        Self {
            name: callable_name::<A>(),
            kind: EndpointKind::App(Arc::new(app)),
        }
    }

    /// Already type-erased application (no default name).
    pub fn shared(app: SharedApp) -> Self {
        Self {
            name: None,
            kind: EndpointKind::App(app),
        }
    }

    pub fn kind(&self) -> &EndpointKind {
        &self.kind
    }

    pub fn default_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Request handlers default to `GET`; raw apps accept any method.
    pub fn is_handler(&self) -> bool {
        !matches!(self.kind, EndpointKind::App(_))
    }

    pub fn into_app(self) -> SharedApp {
        match self.kind {
            EndpointKind::App(app) => app,
            kind => Arc::new(HandlerApp { kind }),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            EndpointKind::Async(_) => "async",
            EndpointKind::Blocking(_) => "blocking",
            EndpointKind::App(_) => "app",
        };
        f.debug_struct("Endpoint")
            .field("kind", &kind)
            .field("name", &self.name)
            .finish()
    }
}

struct HandlerApp {
    kind: EndpointKind,
}

#[async_trait]
impl App for HandlerApp {
    async fn call(&self, scope: Scope, receive: SharedReceiver, send: SharedSender) -> AppResult<()> {
        let response_scope = scope.clone();
        let request = Request::new(scope, receive);
        let response = match &self.kind {
            EndpointKind::Async(handler) => handler(request).await?,
            EndpointKind::Blocking(handler) => {
                let handler = Arc::clone(handler);
                tokio::task::spawn_blocking(move || handler(request))
                    .await
                    .map_err(|err| AppError::Other(eyre::eyre!("blocking endpoint failed: {err}")))??
            }
            EndpointKind::App(app) => {
                let (scope, receive) = request.into_parts();
                return app.call(scope, receive, send).await;
            }
        };
        response.send(&response_scope, &send).await
    }
}

/// Websocket endpoint registered on a
/// [`WebSocketRoute`](crate::core::route::WebSocketRoute).
#[derive(Clone)]
pub enum WebSocketEndpoint {
    Session {
        handler: SessionHandler,
        name: Option<String>,
    },
    App {
        app: SharedApp,
        name: Option<String>,
    },
}

impl WebSocketEndpoint {
    /// Async function receiving the [`WebSocket`] session.
    pub fn session<F, Fut>(handler: F) -> Self
    where
        F: Fn(WebSocket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        WebSocketEndpoint::Session {
            name: callable_name::<F>(),
            handler: Arc::new(move |ws| handler(ws).boxed()),
        }
    }

    pub fn app<A: App>(app: A) -> Self {
        WebSocketEndpoint::App {
            name: callable_name::<A>(),
            app: Arc::new(app),
        }
    }

    pub fn default_name(&self) -> Option<&str> {
        match self {
            WebSocketEndpoint::Session { name, .. } | WebSocketEndpoint::App { name, .. } => {
                name.as_deref()
            }
        }
    }

    pub fn into_app(self) -> SharedApp {
        match self {
            WebSocketEndpoint::Session { handler, .. } => Arc::new(SessionApp { handler }),
            WebSocketEndpoint::App { app, .. } => app,
        }
    }
}

impl fmt::Debug for WebSocketEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            WebSocketEndpoint::Session { .. } => "session",
            WebSocketEndpoint::App { .. } => "app",
        };
        f.debug_struct("WebSocketEndpoint")
            .field("kind", &kind)
            .field("name", &self.default_name())
            .finish()
    }
}

struct SessionApp {
    handler: SessionHandler,
}

#[async_trait]
impl App for SessionApp {
    async fn call(&self, scope: Scope, receive: SharedReceiver, send: SharedSender) -> AppResult<()> {
        let session = WebSocket::new(scope, receive, send);
        let span = tracing_setup::create_websocket_span(&session.id().to_string(), &session.scope().path);
        (self.handler)(session).instrument(span).await
    }
}
