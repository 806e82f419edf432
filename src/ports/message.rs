//! Discrete protocol events exchanged over a connection channel.
use bytes::Bytes;

use crate::ports::scope::RawHeaders;

/// Websocket frame payload: text or binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Bytes(Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Bytes(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(value))
    }
}

/// One protocol message, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    // receive direction, http
    HttpRequest { body: Bytes, more_body: bool },
    HttpDisconnect,
    // send direction, http
    HttpResponseStart { status: u16, headers: RawHeaders },
    HttpResponseBody { body: Bytes, more_body: bool },
    // receive direction, websocket
    WebSocketConnect,
    WebSocketReceive(Payload),
    WebSocketDisconnect { code: u16 },
    // send direction, websocket
    WebSocketAccept {
        subprotocol: Option<String>,
        headers: RawHeaders,
    },
    WebSocketSend(Payload),
    WebSocketClose { code: u16, reason: String },
    // lifespan
    LifespanStartup,
    LifespanShutdown,
    LifespanStartupComplete,
    LifespanStartupFailed { message: String },
    LifespanShutdownComplete,
    LifespanShutdownFailed { message: String },
}

impl Message {
    /// Wire name of the message, e.g. `"http.response.start"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::HttpRequest { .. } => "http.request",
            Message::HttpDisconnect => "http.disconnect",
            Message::HttpResponseStart { .. } => "http.response.start",
            Message::HttpResponseBody { .. } => "http.response.body",
            Message::WebSocketConnect => "websocket.connect",
            Message::WebSocketReceive(_) => "websocket.receive",
            Message::WebSocketDisconnect { .. } => "websocket.disconnect",
            Message::WebSocketAccept { .. } => "websocket.accept",
            Message::WebSocketSend(_) => "websocket.send",
            Message::WebSocketClose { .. } => "websocket.close",
            Message::LifespanStartup => "lifespan.startup",
            Message::LifespanShutdown => "lifespan.shutdown",
            Message::LifespanStartupComplete => "lifespan.startup.complete",
            Message::LifespanStartupFailed { .. } => "lifespan.startup.failed",
            Message::LifespanShutdownComplete => "lifespan.shutdown.complete",
            Message::LifespanShutdownFailed { .. } => "lifespan.shutdown.failed",
        }
    }

    pub fn request_body(body: impl Into<Bytes>, more_body: bool) -> Self {
        Message::HttpRequest {
            body: body.into(),
            more_body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind_names() {
        assert_eq!(
            Message::HttpResponseStart {
                status: 200,
                headers: vec![]
            }
            .kind(),
            "http.response.start"
        );
        assert_eq!(
            Message::WebSocketSend(Payload::from("hi")).kind(),
            "websocket.send"
        );
        assert_eq!(
            Message::LifespanShutdownFailed {
                message: "boom".into()
            }
            .kind(),
            "lifespan.shutdown.failed"
        );
    }
}
