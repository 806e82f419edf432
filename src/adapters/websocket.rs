//! Websocket session object and its duplex state machine.
//!
//! Each side of the session moves `Connecting -> Connected -> Disconnected`
//! and never backwards:
//!
//! | side        | state      | legal                         |
//! |-------------|------------|-------------------------------|
//! | client      | Connecting | `websocket.connect`           |
//! | client      | Connected  | `websocket.receive`, `.disconnect` |
//! | application | Connecting | `websocket.accept`, `.close`  |
//! | application | Connected  | `websocket.send`, `.close`    |
//!
//! Anything else, including any call once a side is `Disconnected`, is an
//! `AppError::Protocol`.
use std::{
    fmt,
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, stream, stream::BoxStream};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
    adapters::request::HttpConnection,
    metrics,
    ports::{
        app::{App, AppError, AppResult},
        channel::{SharedReceiver, SharedSender},
        message::{Message, Payload},
        scope::{RawHeaders, Scope},
    },
};

/// Close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebSocketState {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for WebSocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WebSocketState::Connecting => "CONNECTING",
            WebSocketState::Connected => "CONNECTED",
            WebSocketState::Disconnected => "DISCONNECTED",
        };
        f.write_str(name)
    }
}

/// A websocket session, exclusively owned by its endpoint.
pub struct WebSocket {
    conn: HttpConnection,
    receive: SharedReceiver,
    send: SharedSender,
    client_state: WebSocketState,
    application_state: WebSocketState,
    id: Uuid,
    live: Arc<AtomicBool>,
}

impl WebSocket {
    pub fn new(scope: Scope, receive: SharedReceiver, send: SharedSender) -> Self {
        Self {
            conn: HttpConnection::new(scope),
            receive,
            send,
            client_state: WebSocketState::Connecting,
            application_state: WebSocketState::Connecting,
            id: Uuid::new_v4(),
            live: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Per-connection identifier used by the broadcast registry.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client_state(&self) -> WebSocketState {
        self.client_state
    }

    pub fn application_state(&self) -> WebSocketState {
        self.application_state
    }

    pub fn is_connected(&self) -> bool {
        self.client_state == WebSocketState::Connected
            && self.application_state == WebSocketState::Connected
    }

    pub(crate) fn sender(&self) -> &SharedSender {
        &self.send
    }

    /// Shared flag, true while both sides are connected.
    pub(crate) fn live_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.live)
    }

    fn refresh_live(&self) {
        self.live.store(self.is_connected(), Ordering::Release);
    }

    /// Receive the next client event, enforcing the client-side transitions.
    pub async fn receive(&mut self) -> AppResult<Message> {
        match self.client_state {
            WebSocketState::Connecting => {
                let message = self.receive.receive().await?;
                if message != Message::WebSocketConnect {
                    return Err(AppError::protocol(format!(
                        "Expected websocket.connect, received {}",
                        message.kind()
                    )));
                }
                self.client_state = WebSocketState::Connected;
                self.refresh_live();
                Ok(message)
            }
            WebSocketState::Connected => {
                let message = self.receive.receive().await?;
                match &message {
                    Message::WebSocketReceive(_) => {
                        metrics::increment_websocket_message("inbound");
                    }
                    Message::WebSocketDisconnect { code } => {
                        tracing::debug!(connection_id = %self.id, code, "Websocket client disconnected");
                        self.client_state = WebSocketState::Disconnected;
                        self.refresh_live();
                    }
                    other => {
                        return Err(AppError::protocol(format!(
                            "Expected websocket.receive or websocket.disconnect, received {}",
                            other.kind()
                        )));
                    }
                }
                Ok(message)
            }
            WebSocketState::Disconnected => Err(AppError::protocol(
                "Cannot call \"receive\" once a disconnect message has been received",
            )),
        }
    }

    /// Send an application event, enforcing the application-side transitions.
    pub async fn send(&mut self, message: Message) -> AppResult<()> {
        let next = match (self.application_state, &message) {
            (WebSocketState::Connecting, Message::WebSocketAccept { .. }) => {
                WebSocketState::Connected
            }
            (WebSocketState::Connecting | WebSocketState::Connected, Message::WebSocketClose { .. }) => {
                WebSocketState::Disconnected
            }
            (WebSocketState::Connected, Message::WebSocketSend(_)) => WebSocketState::Connected,
            (WebSocketState::Disconnected, _) => {
                return Err(AppError::protocol(
                    "Cannot call \"send\" once a close message has been sent",
                ));
            }
            (state, other) => {
                return Err(AppError::protocol(format!(
                    "Cannot send {} while application state is {state}",
                    other.kind()
                )));
            }
        };

        let accepted = matches!(message, Message::WebSocketAccept { .. });
        let outbound = matches!(message, Message::WebSocketSend(_));
        self.send.send(message).await?;

        if accepted {
            metrics::increment_websocket_sessions();
        } else if outbound {
            metrics::increment_websocket_message("outbound");
        }
        self.application_state = next;
        self.refresh_live();
        Ok(())
    }

    /// Complete the handshake: consume `websocket.connect` if still pending,
    /// then send `websocket.accept`.
    pub async fn accept(&mut self, subprotocol: Option<&str>, headers: RawHeaders) -> AppResult<()> {
        if self.client_state == WebSocketState::Connecting {
            self.receive().await?;
        }
        self.send(Message::WebSocketAccept {
            subprotocol: subprotocol.map(str::to_string),
            headers,
        })
        .await?;
        tracing::debug!(connection_id = %self.id, path = %self.scope().path, "Websocket accepted");
        Ok(())
    }

    async fn receive_payload(&mut self) -> AppResult<Payload> {
        if self.application_state != WebSocketState::Connected {
            return Err(AppError::protocol(
                "WebSocket is not connected. Need to call \"accept\" first",
            ));
        }
        match self.receive().await? {
            Message::WebSocketReceive(payload) => Ok(payload),
            Message::WebSocketDisconnect { code } => Err(AppError::WebSocketDisconnect {
                code,
                reason: String::new(),
            }),
            other => Err(AppError::protocol(format!("unexpected {}", other.kind()))),
        }
    }

    pub async fn receive_text(&mut self) -> AppResult<String> {
        match self.receive_payload().await? {
            Payload::Text(text) => Ok(text),
            Payload::Bytes(_) => Err(AppError::protocol("Expected a text frame, received bytes")),
        }
    }

    pub async fn receive_bytes(&mut self) -> AppResult<Bytes> {
        match self.receive_payload().await? {
            Payload::Bytes(bytes) => Ok(bytes),
            Payload::Text(_) => Err(AppError::protocol("Expected a bytes frame, received text")),
        }
    }

    /// Decode the next frame (text or bytes) as JSON.
    pub async fn receive_json<T: DeserializeOwned>(&mut self) -> AppResult<T> {
        let value = match self.receive_payload().await? {
            Payload::Text(text) => serde_json::from_str(&text)?,
            Payload::Bytes(bytes) => serde_json::from_slice(&bytes)?,
        };
        Ok(value)
    }

    /// Text frames until the client disconnects.
    pub fn iter_text(&mut self) -> BoxStream<'_, AppResult<String>> {
        stream::unfold(self, |ws| async move {
            match ws.receive_text().await {
                Err(AppError::WebSocketDisconnect { .. }) => None,
                item => Some((item, ws)),
            }
        })
        .boxed()
    }

    /// Bytes frames until the client disconnects.
    pub fn iter_bytes(&mut self) -> BoxStream<'_, AppResult<Bytes>> {
        stream::unfold(self, |ws| async move {
            match ws.receive_bytes().await {
                Err(AppError::WebSocketDisconnect { .. }) => None,
                item => Some((item, ws)),
            }
        })
        .boxed()
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> AppResult<()> {
        self.send(Message::WebSocketSend(Payload::Text(text.into())))
            .await
    }

    pub async fn send_bytes(&mut self, bytes: impl Into<Bytes>) -> AppResult<()> {
        self.send(Message::WebSocketSend(Payload::Bytes(bytes.into())))
            .await
    }

    /// Send `value` as a JSON text frame.
    pub async fn send_json<T: Serialize>(&mut self, value: &T) -> AppResult<()> {
        let text = serde_json::to_string(value)?;
        self.send_text(text).await
    }

    pub async fn close(&mut self, code: u16, reason: &str) -> AppResult<()> {
        self.send(Message::WebSocketClose {
            code,
            reason: reason.to_string(),
        })
        .await
    }
}

impl Deref for WebSocket {
    type Target = HttpConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("id", &self.id)
            .field("path", &self.scope().path)
            .field("client_state", &self.client_state)
            .field("application_state", &self.application_state)
            .finish()
    }
}

/// App that immediately closes a websocket; the default for unmatched sessions.
#[derive(Debug, Clone)]
pub struct WebSocketClose {
    pub code: u16,
    pub reason: String,
}

impl WebSocketClose {
    pub fn new(code: u16) -> Self {
        Self {
            code,
            reason: String::new(),
        }
    }
}

impl Default for WebSocketClose {
    fn default() -> Self {
        Self::new(CLOSE_NORMAL)
    }
}

#[async_trait]
impl App for WebSocketClose {
    async fn call(&self, _scope: Scope, _receive: SharedReceiver, send: SharedSender) -> AppResult<()> {
        send.send(Message::WebSocketClose {
            code: self.code,
            reason: self.reason.clone(),
        })
        .await
    }
}
