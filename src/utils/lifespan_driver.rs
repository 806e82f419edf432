//! Server-side driver for the lifespan protocol.
//!
//! Embedders (and tests) use [`LifespanDriver`] to run an application's
//! startup before serving traffic and its shutdown afterwards, the way a
//! server would over a `lifespan` scope.
use std::sync::Arc;

use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};

use crate::{
    adapters::channel::{ChannelReceiver, ChannelSender, channel},
    ports::{
        app::{AppError, AppResult, SharedApp},
        channel::{MessageReceiver, MessageSender},
        message::Message,
        scope::Scope,
    },
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LifespanDriverError {
    #[error("Application startup failed: {message}")]
    StartupFailed { message: String },

    #[error("Application shutdown failed: {message}")]
    ShutdownFailed { message: String },

    /// The application returned an error without reporting a failure event.
    #[error("Application exited during lifespan: {0}")]
    App(#[from] AppError),

    #[error("Application finished without answering {0}")]
    NoResponse(&'static str),

    #[error("Unexpected lifespan message {0}")]
    Unexpected(&'static str),

    #[error("Lifespan task failed: {0}")]
    Join(#[from] JoinError),
}

/// Running lifespan session of one application.
pub struct LifespanDriver {
    tx: Arc<ChannelSender>,
    rx: Arc<ChannelReceiver>,
    task: JoinHandle<AppResult<()>>,
}

impl LifespanDriver {
    /// Spawn the lifespan call and complete startup.
    pub async fn start(app: SharedApp) -> Result<Self, LifespanDriverError> {
        let (tx, app_rx) = channel(4);
        let (app_tx, rx) = channel(4);
        let task = tokio::spawn(async move { app.call(Scope::lifespan(), app_rx, app_tx).await });

        let driver = Self { tx, rx, task };
        driver.tx.send(Message::LifespanStartup).await?;
        match driver.rx.receive().await {
            Ok(Message::LifespanStartupComplete) => {
                tracing::info!("Application startup complete");
                Ok(driver)
            }
            Ok(Message::LifespanStartupFailed { message }) => {
                tracing::error!(error = %message, "Application startup failed");
                // the app also returns the failure; the reported message is authoritative
                let _ = driver.task.await;
                Err(LifespanDriverError::StartupFailed { message })
            }
            Ok(other) => {
                driver.task.abort();
                Err(LifespanDriverError::Unexpected(other.kind()))
            }
            Err(_) => Err(finished(driver.task, "lifespan.startup").await),
        }
    }

    /// Request shutdown and wait for the application to finish.
    pub async fn shutdown(self) -> Result<(), LifespanDriverError> {
        self.tx.send(Message::LifespanShutdown).await?;
        match self.rx.receive().await {
            Ok(Message::LifespanShutdownComplete) => {
                self.task.await??;
                tracing::info!("Application shutdown complete");
                Ok(())
            }
            Ok(Message::LifespanShutdownFailed { message }) => {
                tracing::error!(error = %message, "Application shutdown failed");
                let _ = self.task.await;
                Err(LifespanDriverError::ShutdownFailed { message })
            }
            Ok(other) => {
                self.task.abort();
                Err(LifespanDriverError::Unexpected(other.kind()))
            }
            Err(_) => Err(finished(self.task, "lifespan.shutdown").await),
        }
    }
}

/// Error for an application that closed its channel instead of answering.
async fn finished(task: JoinHandle<AppResult<()>>, event: &'static str) -> LifespanDriverError {
    match task.await {
        Ok(Ok(())) => LifespanDriverError::NoResponse(event),
        Ok(Err(err)) => LifespanDriverError::App(err),
        Err(err) => LifespanDriverError::Join(err),
    }
}
