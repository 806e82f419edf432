//! Trellis - routing and connection handling for async web applications.
//!
//! Trellis is the dispatch layer that sits between a connection server and
//! application code. A server hands every connection to an [`App`] as a
//! [`Scope`] plus a pair of message channels; Trellis decides which endpoint
//! handles it, extracts typed path parameters on the way, and can build URLs
//! back from route names.
//!
//! # Features
//! - Path templates with typed parameters (`{id:int}`, `{file:path}`, custom convertors)
//! - `Route`, `WebSocketRoute`, `Mount` and `Host` nodes composed into a [`Router`]
//! - Method-aware matching with `405` + `Allow` and trailing-slash redirects
//! - Reverse routing via `url_path_for`, including through mounts and hosts
//! - `Request` with lazy URL, query, cookie and streaming body access
//! - A WebSocket session with an explicit state machine, plus a broadcast registry
//! - Request/response middleware over the streaming message protocol
//! - Lifespan startup/shutdown hooks or a scoped setup/teardown
//! - Metrics via the `metrics` facade & structured tracing via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use http::StatusCode;
//! use trellis::{AppResult, Application, Endpoint, Request, Response, Router};
//!
//! async fn show_user(req: Request) -> AppResult<Response> {
//!     let id = req.connection().path_params().get("id").cloned();
//!     Ok(Response::plain_text(StatusCode::OK, format!("user {id:?}")))
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut router = Router::new();
//! router.add_route("/users/{id:int}", Endpoint::handler(show_user), None, Some("user"))?;
//! let app = Application::builder(router).build();
//! // Hand `app` to a server; it implements `trellis::App`.
//! # let _ = app;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (the connection protocol: scope, messages,
//! channel traits and the `App` trait) from **adapters** (request, response,
//! websocket and middleware built on those ports) while keeping the routing
//! logic inside `core`. End users should prefer the re-exports below instead
//! of reaching into internal modules directly.
//!
//! # Error Handling
//! Application code returns [`AppResult`]; [`AppError::Http`] carries a status
//! that [`Application`] renders as a response. Configuration and setup APIs
//! return `eyre::Result<T>` with context attached.
//!
//! # Concurrency & Data Structures
//! Shared maps (convertor registry, websocket registry) use `scc::HashMap` so
//! lookups never hold a global lock.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{BaseHttpMiddleware, HttpConnection, Next, Request, Response, WebSocket, WebSocketState},
    core::{
        Application, ApplicationBuilder, Endpoint, Host, Lifespan, LifespanHook, Mount, Route, Router,
        UrlPath, WebSocketEndpoint, WebSocketRoute, register_url_convertor,
    },
    ports::{App, AppError, AppResult, Message, PathParams, Scope, ScopeKind, SharedApp},
    utils::{ConnectionId, LifespanDriver, WebSocketRegistry},
};
