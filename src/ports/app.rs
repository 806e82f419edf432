use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use thiserror::Error;

use crate::ports::{
    channel::{SharedReceiver, SharedSender},
    scope::Scope,
};

/// Error type flowing out of every application call.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AppError {
    /// An HTTP outcome raised as an error instead of being rendered in place.
    #[error("HTTP {status}: {detail}")]
    Http {
        status: StatusCode,
        detail: String,
        headers: Vec<(String, String)>,
    },

    /// The client went away while the request body was being read.
    #[error("Client disconnected")]
    ClientDisconnect,

    /// The websocket peer disconnected while a frame was awaited.
    #[error("WebSocket disconnected with code {code}")]
    WebSocketDisconnect { code: u16, reason: String },

    /// A message was sent or received out of sequence.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The request body stream was already consumed.
    #[error("Stream consumed")]
    StreamConsumed,

    /// The underlying channel has been closed by the other side.
    #[error("Connection channel closed")]
    ChannelClosed,

    #[error("Invalid body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] eyre::Report),
}

impl AppError {
    /// Build an [`AppError::Http`] with the canonical reason phrase as detail.
    pub fn http(status: StatusCode) -> Self {
        AppError::Http {
            status,
            detail: status.canonical_reason().unwrap_or("Unknown").to_string(),
            headers: Vec::new(),
        }
    }

    pub fn http_with_headers(status: StatusCode, headers: Vec<(String, String)>) -> Self {
        match Self::http(status) {
            AppError::Http { status, detail, .. } => AppError::Http {
                status,
                detail,
                headers,
            },
            other => other,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        AppError::Protocol(message.into())
    }
}

/// Result alias for application calls.
pub type AppResult<T> = Result<T, AppError>;

/// An application speaking the connection protocol.
///
/// Routers, route nodes, middleware and endpoints all implement this trait so
/// they can be nested freely.
#[async_trait]
pub trait App: Send + Sync + 'static {
    /// Handle one connection.
    ///
    /// # Arguments
    /// * `scope` - Connection metadata, owned by this call
    /// * `receive` - Inbound message channel
    /// * `send` - Outbound message channel
    async fn call(&self, scope: Scope, receive: SharedReceiver, send: SharedSender)
    -> AppResult<()>;
}

/// Shared, type-erased application.
pub type SharedApp = Arc<dyn App>;

/// Middleware factory: wraps an inner application into an outer one.
pub type Layer = Arc<dyn Fn(SharedApp) -> SharedApp + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_uses_reason_phrase() {
        match AppError::http(StatusCode::NOT_FOUND) {
            AppError::Http { status, detail, .. } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(detail, "Not Found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_http_error_with_headers() {
        let err = AppError::http_with_headers(
            StatusCode::METHOD_NOT_ALLOWED,
            vec![("allow".into(), "GET, HEAD".into())],
        );
        assert_eq!(err.to_string(), "HTTP 405 Method Not Allowed: Method Not Allowed");
    }
}
