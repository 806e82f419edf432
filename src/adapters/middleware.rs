//! Request/response middleware over the streaming connection protocol.
//!
//! [`BaseHttpMiddleware`] lets a middleware be written as
//! `async fn(Request, Next) -> AppResult<Response>`. Calling [`Next::run`]
//! spawns the inner application on its own task with a send channel that
//! feeds a bounded queue. The first queued message must be
//! `http.response.start`; the rest of the queue becomes the body stream of
//! the returned [`Response`]. An inner failure is only observed when the body
//! stream is read past the point where it happened.
//!
//! Every spawned inner task is aborted when the middleware call returns, so
//! no task outlives the connection it was spawned for.
use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{FutureExt, Stream, future::BoxFuture, stream};
use http::HeaderValue;
use tokio::{
    sync::mpsc,
    task::{AbortHandle, JoinHandle},
};

use crate::{
    adapters::{request::Request, response::Response},
    config::models::MiddlewareConfig,
    metrics,
    ports::{
        app::{App, AppError, AppResult, Layer, SharedApp},
        channel::{MessageReceiver, MessageSender, SharedReceiver, SharedSender},
        message::Message,
        scope::{Scope, ScopeKind},
    },
};

/// How long the body stream waits, after the final chunk, for the inner task
/// to finish before leaving it to be aborted.
const INNER_EXIT_GRACE: Duration = Duration::from_millis(100);

/// Type-erased dispatch function.
pub type Dispatch = Arc<dyn Fn(Request, Next) -> BoxFuture<'static, AppResult<Response>> + Send + Sync>;

/// Box a dispatch function.
pub fn dispatch_fn<F, Fut>(dispatch: F) -> Dispatch
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<Response>> + Send + 'static,
{
    Arc::new(move |request, next| dispatch(request, next).boxed())
}

/// Inner tasks spawned during one middleware call.
#[derive(Clone, Default)]
struct TaskSet(Arc<Mutex<Vec<AbortHandle>>>);

impl TaskSet {
    fn push(&self, handle: AbortHandle) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    fn abort_all(&self) {
        for handle in self.0.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            handle.abort();
        }
    }
}

/// Aborts every task of the set on drop, including when the call is cancelled.
struct AbortGuard(TaskSet);

impl Drop for AbortGuard {
    fn drop(&mut self) {
        self.0.abort_all();
    }
}

/// Send half handed to the inner application.
struct QueueSender {
    tx: mpsc::Sender<Message>,
}

#[async_trait]
impl MessageSender for QueueSender {
    async fn send(&self, message: Message) -> AppResult<()> {
        self.tx.send(message).await.map_err(|_| AppError::ChannelClosed)
    }
}

/// Receive half that first replays a body the dispatch function already read.
struct ReplayReceiver {
    pending: Mutex<Option<Message>>,
    inner: SharedReceiver,
}

#[async_trait]
impl MessageReceiver for ReplayReceiver {
    async fn receive(&self) -> AppResult<Message> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match pending {
            Some(message) => Ok(message),
            None => self.inner.receive().await,
        }
    }
}

/// Wait for the inner task and surface its failure.
async fn join_inner(task: JoinHandle<AppResult<()>>) -> AppResult<()> {
    let result = match task.await {
        Ok(result) => result,
        Err(err) => Err(AppError::Other(eyre::eyre!(
            "Inner application task failed: {err}"
        ))),
    };
    match &result {
        Err(err) if is_inner_failure(err) => {
            tracing::error!(error = %err, "Inner application failed behind middleware");
            metrics::increment_middleware_inner_failures();
        }
        Err(err) => tracing::debug!(error = %err, "Inner application raised an HTTP error"),
        Ok(()) => {}
    }
    result
}

/// `AppError::Http` is a routing outcome (404, 405), not a failure.
fn is_inner_failure(err: &AppError) -> bool {
    !matches!(err, AppError::Http { .. })
}

struct BodyState {
    rx: mpsc::Receiver<Message>,
    task: Option<JoinHandle<AppResult<()>>>,
    done: bool,
}

/// Remaining queue as body chunks; an inner failure is yielded once the
/// queue runs dry or, after the final chunk, once the task has finished.
fn body_stream(
    rx: mpsc::Receiver<Message>,
    task: JoinHandle<AppResult<()>>,
) -> impl Stream<Item = AppResult<Bytes>> + Send + 'static {
    let state = BodyState {
        rx,
        task: Some(task),
        done: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                let task = state.task.take()?;
                return match tokio::time::timeout(INNER_EXIT_GRACE, join_inner(task)).await {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some((Err(err), state)),
                    Err(_) => {
                        tracing::debug!("Inner application still running after its final body chunk");
                        None
                    }
                };
            }
            match state.rx.recv().await {
                Some(Message::HttpResponseBody { body, more_body }) => {
                    state.done = !more_body;
                    if body.is_empty() {
                        continue;
                    }
                    return Some((Ok(body), state));
                }
                Some(other) => {
                    state.done = true;
                    if let Some(task) = state.task.take() {
                        task.abort();
                    }
                    let err = AppError::protocol(format!(
                        "Expected http.response.body, received {}",
                        other.kind()
                    ));
                    return Some((Err(err), state));
                }
                None => {
                    state.done = true;
                    let task = state.task.take()?;
                    return match join_inner(task).await {
                        Ok(()) => None,
                        Err(err) => Some((Err(err), state)),
                    };
                }
            }
        }
    })
}

/// Handle to the wrapped application, passed to the dispatch function.
pub struct Next {
    inner: SharedApp,
    capacity: usize,
    tasks: TaskSet,
}

impl Next {
    /// Run the inner application and return its response.
    ///
    /// The response body streams lazily from the inner task. Fails with
    /// `AppError::Protocol` when the inner app sends something other than
    /// `http.response.start` first, or finishes without responding.
    pub async fn run(self, request: Request) -> AppResult<Response> {
        let replay = request.buffered_body().cloned();
        let (scope, receive) = request.into_parts();
        let receive: SharedReceiver = match replay {
            Some(body) => Arc::new(ReplayReceiver {
                pending: Mutex::new(Some(Message::request_body(body, false))),
                inner: receive,
            }),
            None => receive,
        };

        let (tx, mut rx) = mpsc::channel(self.capacity);
        let send: SharedSender = Arc::new(QueueSender { tx });
        let inner = self.inner;
        let task = tokio::spawn(async move { inner.call(scope, receive, send).await });
        self.tasks.push(task.abort_handle());

        match rx.recv().await {
            Some(Message::HttpResponseStart { status, headers }) => {
                Response::from_raw_parts(status, &headers, body_stream(rx, task))
            }
            Some(other) => Err(AppError::protocol(format!(
                "Expected http.response.start, received {}",
                other.kind()
            ))),
            None => {
                join_inner(task).await?;
                Err(AppError::protocol("No response returned"))
            }
        }
    }
}

/// Adapter running a dispatch function around an inner application.
///
/// Non-HTTP scopes go straight to the inner application.
pub struct BaseHttpMiddleware {
    inner: SharedApp,
    dispatch: Dispatch,
    queue_capacity: usize,
}

impl BaseHttpMiddleware {
    pub fn new(inner: SharedApp, dispatch: Dispatch) -> Self {
        Self {
            inner,
            dispatch,
            queue_capacity: MiddlewareConfig::default().queue_capacity,
        }
    }

    /// Messages buffered between the inner app and the dispatch function.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

#[async_trait]
impl App for BaseHttpMiddleware {
    async fn call(&self, scope: Scope, receive: SharedReceiver, send: SharedSender) -> AppResult<()> {
        if scope.kind != ScopeKind::Http {
            return self.inner.call(scope, receive, send).await;
        }

        let tasks = TaskSet::default();
        let _guard = AbortGuard(tasks.clone());
        let next = Next {
            inner: Arc::clone(&self.inner),
            capacity: self.queue_capacity,
            tasks,
        };
        let request = Request::new(scope.clone(), receive);
        let response = (self.dispatch)(request, next).await?;
        response.send(&scope, &send).await
    }
}

/// Layer wrapping apps in a [`BaseHttpMiddleware`] with a queue of `capacity`.
pub fn dispatch_layer(dispatch: Dispatch, capacity: usize) -> Layer {
    Arc::new(move |inner: SharedApp| {
        Arc::new(BaseHttpMiddleware::new(inner, Arc::clone(&dispatch)).with_queue_capacity(capacity))
            as SharedApp
    })
}

/// Layer for `dispatch` with the default queue capacity.
pub fn layer<F, Fut>(dispatch: F) -> Layer
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<Response>> + Send + 'static,
{
    dispatch_layer(dispatch_fn(dispatch), MiddlewareConfig::default().queue_capacity)
}

pub fn layer_with_config<F, Fut>(dispatch: F, config: &MiddlewareConfig) -> Layer
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<Response>> + Send + 'static,
{
    dispatch_layer(dispatch_fn(dispatch), config.queue_capacity)
}

/// Add common security hardening headers.
pub async fn security_headers_middleware(request: Request, next: Next) -> AppResult<Response> {
    let mut response = next.run(request).await?;
    let headers = response.headers_mut();

    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    Ok(response)
}

/// Generate a per-request UUID and expose it via tracing plus `X-Request-ID`.
pub async fn request_id_middleware(request: Request, next: Next) -> AppResult<Response> {
    let request_id = uuid::Uuid::new_v4().to_string();
    tracing::debug!(request_id = %request_id, path = %request.scope().path, "Assigned request id");

    let mut response = next.run(request).await?;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    Ok(response)
}

/// Log how long the inner app took to produce its response head.
pub async fn request_timing_middleware(request: Request, next: Next) -> AppResult<Response> {
    let start = std::time::Instant::now();
    let method = request.method().clone();
    let path = request.scope().path.clone();

    let response = next.run(request).await?;
    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Response started"
    );
    Ok(response)
}
