//! Startup/shutdown handling for `lifespan` scopes.
//!
//! Two shapes are supported: discrete startup/shutdown hooks, or one scoped
//! setup function returning a [`LifespanScope`] whose teardown runs on every
//! exit path once setup succeeded. Any failure is reported to the server with
//! the matching `*.failed` message and also returned to the caller.
use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use futures_util::{FutureExt, future::BoxFuture};
use thiserror::Error;

use crate::{
    metrics,
    ports::{
        app::{App, AppError, AppResult},
        channel::{SharedReceiver, SharedSender},
        message::Message,
        scope::{Scope, ScopeKind},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Startup,
    Shutdown,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Startup => "startup",
            EventType::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LifespanError {
    #[error("Event handlers cannot be added to a scoped lifespan")]
    ScopedLifespan,
}

/// One startup or shutdown callback.
#[derive(Clone)]
pub enum LifespanHook {
    Async(Arc<dyn Fn() -> BoxFuture<'static, eyre::Result<()>> + Send + Sync>),
    /// Executed on the blocking thread pool.
    Sync(Arc<dyn Fn() -> eyre::Result<()> + Send + Sync>),
}

impl LifespanHook {
    pub fn from_async<F, Fut>(hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = eyre::Result<()>> + Send + 'static,
    {
        LifespanHook::Async(Arc::new(move || hook().boxed()))
    }

    pub fn from_sync<F>(hook: F) -> Self
    where
        F: Fn() -> eyre::Result<()> + Send + Sync + 'static,
    {
        LifespanHook::Sync(Arc::new(hook))
    }

    async fn run(&self) -> eyre::Result<()> {
        match self {
            LifespanHook::Async(hook) => hook().await,
            LifespanHook::Sync(hook) => {
                let hook = Arc::clone(hook);
                tokio::task::spawn_blocking(move || hook())
                    .await
                    .map_err(|err| eyre::eyre!("lifespan hook failed to run: {err}"))?
            }
        }
    }
}

/// Resources acquired by a scoped setup; dropping it without [`close`]
/// still schedules the teardown on the current runtime.
///
/// [`close`]: LifespanScope::close
pub struct LifespanScope {
    teardown: Option<BoxFuture<'static, eyre::Result<()>>>,
}

impl LifespanScope {
    pub fn new<Fut>(teardown: Fut) -> Self
    where
        Fut: Future<Output = eyre::Result<()>> + Send + 'static,
    {
        Self {
            teardown: Some(teardown.boxed()),
        }
    }

    /// A scope with nothing to release.
    pub fn noop() -> Self {
        Self { teardown: None }
    }

    /// Run the teardown now.
    pub async fn close(mut self) -> eyre::Result<()> {
        match self.teardown.take() {
            Some(teardown) => teardown.await,
            None => Ok(()),
        }
    }
}

impl Drop for LifespanScope {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(err) = teardown.await {
                            tracing::error!(error = %err, "Lifespan teardown failed after cancellation");
                        }
                    });
                }
                Err(_) => tracing::warn!("Lifespan teardown dropped outside a runtime"),
            }
        }
    }
}

pub type ScopedSetup = Arc<dyn Fn() -> BoxFuture<'static, eyre::Result<LifespanScope>> + Send + Sync>;

/// Lifespan delegate attached to a [`Router`](crate::core::router::Router).
#[derive(Clone)]
pub enum Lifespan {
    Handlers {
        startup: Vec<LifespanHook>,
        shutdown: Vec<LifespanHook>,
    },
    Scoped(ScopedSetup),
}

impl Default for Lifespan {
    fn default() -> Self {
        Lifespan::Handlers {
            startup: Vec::new(),
            shutdown: Vec::new(),
        }
    }
}

impl Lifespan {
    pub fn handlers() -> Self {
        Self::default()
    }

    pub fn scoped<F, Fut>(setup: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = eyre::Result<LifespanScope>> + Send + 'static,
    {
        Lifespan::Scoped(Arc::new(move || setup().boxed()))
    }

    pub fn add_event_handler(&mut self, event: EventType, hook: LifespanHook) -> Result<(), LifespanError> {
        match self {
            Lifespan::Handlers { startup, shutdown } => {
                match event {
                    EventType::Startup => startup.push(hook),
                    EventType::Shutdown => shutdown.push(hook),
                }
                Ok(())
            }
            Lifespan::Scoped(_) => Err(LifespanError::ScopedLifespan),
        }
    }

    pub fn on_startup(mut self, hook: LifespanHook) -> Result<Self, LifespanError> {
        self.add_event_handler(EventType::Startup, hook)?;
        Ok(self)
    }

    pub fn on_shutdown(mut self, hook: LifespanHook) -> Result<Self, LifespanError> {
        self.add_event_handler(EventType::Shutdown, hook)?;
        Ok(self)
    }

    /// Drive the lifespan protocol over one `lifespan` scope.
    pub async fn run(&self, receive: &SharedReceiver, send: &SharedSender) -> AppResult<()> {
        expect_event(receive, EventType::Startup).await?;
        tracing::info!("Lifespan startup");

        match self {
            Lifespan::Handlers { startup, shutdown } => {
                if let Err(err) = run_hooks(startup).await {
                    return fail(send, EventType::Startup, err).await;
                }
                complete(send, EventType::Startup).await?;

                expect_event(receive, EventType::Shutdown).await?;
                tracing::info!("Lifespan shutdown");
                if let Err(err) = run_hooks(shutdown).await {
                    return fail(send, EventType::Shutdown, err).await;
                }
                complete(send, EventType::Shutdown).await
            }
            Lifespan::Scoped(setup) => {
                let resources = match setup().await {
                    Ok(resources) => resources,
                    Err(err) => return fail(send, EventType::Startup, err).await,
                };
                let waited = async {
                    complete(send, EventType::Startup).await?;
                    expect_event(receive, EventType::Shutdown).await
                }
                .await;
                tracing::info!("Lifespan shutdown");
                let teardown = resources.close().await;
                match (waited, teardown) {
                    (Err(err), Ok(())) => Err(err),
                    (Err(err), Err(teardown_err)) => {
                        tracing::error!(error = %teardown_err, "Lifespan teardown failed");
                        Err(err)
                    }
                    (Ok(()), Err(err)) => fail(send, EventType::Shutdown, err).await,
                    (Ok(()), Ok(())) => complete(send, EventType::Shutdown).await,
                }
            }
        }
    }
}

async fn run_hooks(hooks: &[LifespanHook]) -> eyre::Result<()> {
    for hook in hooks {
        hook.run().await?;
    }
    Ok(())
}

async fn expect_event(receive: &SharedReceiver, event: EventType) -> AppResult<()> {
    let message = receive.receive().await?;
    let expected = match event {
        EventType::Startup => Message::LifespanStartup,
        EventType::Shutdown => Message::LifespanShutdown,
    };
    if message != expected {
        return Err(AppError::protocol(format!(
            "Expected {}, received {}",
            expected.kind(),
            message.kind()
        )));
    }
    Ok(())
}

async fn complete(send: &SharedSender, event: EventType) -> AppResult<()> {
    metrics::record_lifespan_event(event.as_str(), "complete");
    let message = match event {
        EventType::Startup => Message::LifespanStartupComplete,
        EventType::Shutdown => Message::LifespanShutdownComplete,
    };
    send.send(message).await
}

/// Report the failure to the server, then hand it back to the caller.
async fn fail(send: &SharedSender, event: EventType, err: eyre::Report) -> AppResult<()> {
    tracing::error!(event = %event, error = %err, "Lifespan event failed");
    metrics::record_lifespan_event(event.as_str(), "failed");
    let message = format!("{err:#}");
    let report = match event {
        EventType::Startup => Message::LifespanStartupFailed { message },
        EventType::Shutdown => Message::LifespanShutdownFailed { message },
    };
    send.send(report).await?;
    Err(AppError::Other(err))
}

impl fmt::Debug for Lifespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifespan::Handlers { startup, shutdown } => f
                .debug_struct("Lifespan::Handlers")
                .field("startup", &startup.len())
                .field("shutdown", &shutdown.len())
                .finish(),
            Lifespan::Scoped(_) => f.write_str("Lifespan::Scoped(..)"),
        }
    }
}

#[async_trait]
impl App for Lifespan {
    async fn call(&self, scope: Scope, receive: SharedReceiver, send: SharedSender) -> AppResult<()> {
        if scope.kind != ScopeKind::Lifespan {
            return Err(AppError::protocol(format!(
                "Lifespan cannot handle {} scopes",
                scope.kind
            )));
        }
        self.run(&receive, &send).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        adapters::channel::channel,
        ports::channel::{MessageReceiver, MessageSender},
    };

    async fn drive(lifespan: Lifespan, events: Vec<Message>) -> (AppResult<()>, Vec<Message>) {
        let (server_tx, app_rx) = channel(8);
        let (app_tx, server_rx) = channel(8);
        for event in events {
            server_tx.send(event).await.unwrap();
        }
        drop(server_tx);
        let result = lifespan.call(Scope::lifespan(), app_rx, app_tx).await;
        let mut sent = Vec::new();
        while let Some(message) = server_rx.try_receive().await {
            sent.push(message);
        }
        (result, sent)
    }

    #[tokio::test]
    async fn test_handlers_run_in_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (c1, c2) = (Arc::clone(&counter), Arc::clone(&counter));
        let lifespan = Lifespan::handlers()
            .on_startup(LifespanHook::from_async(move || {
                let c = Arc::clone(&c1);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }))
            .unwrap()
            .on_shutdown(LifespanHook::from_sync(move || {
                c2.fetch_add(10, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();

        let (result, sent) = drive(
            lifespan,
            vec![Message::LifespanStartup, Message::LifespanShutdown],
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(
            sent,
            vec![
                Message::LifespanStartupComplete,
                Message::LifespanShutdownComplete
            ]
        );
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_startup_failure_is_reported_and_returned() {
        let lifespan = Lifespan::handlers()
            .on_startup(LifespanHook::from_sync(|| Err(eyre::eyre!("db unreachable"))))
            .unwrap();
        let (result, sent) = drive(lifespan, vec![Message::LifespanStartup]).await;
        assert!(matches!(result, Err(AppError::Other(_))));
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Message::LifespanStartupFailed { message } => assert!(message.contains("db unreachable")),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_scoped_teardown_runs_after_shutdown() {
        let released = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&released);
        let lifespan = Lifespan::scoped(move || {
            let flag = Arc::clone(&flag);
            async move {
                Ok(LifespanScope::new(async move {
                    flag.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
            }
        });
        let (result, sent) = drive(
            lifespan,
            vec![Message::LifespanStartup, Message::LifespanShutdown],
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(sent.last(), Some(&Message::LifespanShutdownComplete));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scoped_teardown_runs_when_channel_closes() {
        let released = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&released);
        let lifespan = Lifespan::scoped(move || {
            let flag = Arc::clone(&flag);
            async move {
                Ok(LifespanScope::new(async move {
                    flag.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
            }
        });
        // no shutdown event: the server side goes away after startup
        let (result, _) = drive(lifespan, vec![Message::LifespanStartup]).await;
        assert!(matches!(result, Err(AppError::ChannelClosed)));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scoped_lifespan_rejects_handlers() {
        let mut lifespan = Lifespan::scoped(|| async { Ok(LifespanScope::noop()) });
        assert!(
            lifespan
                .add_event_handler(EventType::Startup, LifespanHook::from_sync(|| Ok(())))
                .is_err()
        );
    }
}
