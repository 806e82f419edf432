//! Registry of live websocket sessions for fan-out messaging.
//!
//! Sessions register once accepted and are addressed by their
//! [`ConnectionId`]. Delivery is best-effort: a target that has disconnected
//! or whose channel is gone is logged, pruned and skipped, never reported as
//! an error to the sender.
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use scc::HashMap;
use uuid::Uuid;

use crate::{
    adapters::websocket::WebSocket,
    metrics,
    ports::{
        app::{AppError, AppResult},
        channel::SharedSender,
        message::{Message, Payload},
    },
};

/// Unique identifier of a websocket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Delivery handle of one registered session.
struct Target {
    sender: SharedSender,
    live: Arc<AtomicBool>,
    path: String,
}

/// Concurrent map of accepted websocket sessions.
#[derive(Clone, Default)]
pub struct WebSocketRegistry {
    connections: Arc<HashMap<ConnectionId, Arc<Target>>>,
}

impl WebSocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an accepted session and return its id.
    ///
    /// Fails with `AppError::Protocol` unless both sides of the session are
    /// connected.
    pub fn register(&self, ws: &WebSocket) -> AppResult<ConnectionId> {
        if !ws.is_connected() {
            return Err(AppError::protocol(
                "WebSocket must be accepted before it can be registered",
            ));
        }
        let id = ConnectionId::from(ws.id());
        let target = Arc::new(Target {
            sender: Arc::clone(ws.sender()),
            live: ws.live_flag(),
            path: ws.scope().path.clone(),
        });
        let _ = self.connections.insert(id, target);

        tracing::debug!(
            connection_id = %id,
            path = %ws.scope().path,
            total = self.connections.len(),
            "WebSocket registered"
        );
        metrics::set_active_websockets(self.connections.len());
        Ok(id)
    }

    /// Remove a session; returns whether it was registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            tracing::debug!(connection_id = %id, total = self.connections.len(), "WebSocket unregistered");
            metrics::set_active_websockets(self.connections.len());
        }
        removed
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read(&id, |_, _| ()).is_some()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.len() == 0
    }

    /// Ids of all registered sessions.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids = Vec::new();
        self.connections.scan(|id, _| ids.push(*id));
        ids
    }

    /// Send to one session. Returns whether the frame was delivered.
    pub async fn send_to(&self, id: ConnectionId, payload: impl Into<Payload>) -> bool {
        let Some(target) = self.connections.read(&id, |_, target| Arc::clone(target)) else {
            tracing::debug!(connection_id = %id, "Send to unknown websocket ignored");
            return false;
        };
        self.deliver(vec![(id, target)], payload.into()).await == 1
    }

    /// Send to every registered session. Returns the number reached.
    pub async fn broadcast(&self, payload: impl Into<Payload>) -> usize {
        let targets = self.snapshot(None);
        self.deliver(targets, payload.into()).await
    }

    /// Send to every session except `sender`. Returns the number reached.
    pub async fn broadcast_except(&self, sender: ConnectionId, payload: impl Into<Payload>) -> usize {
        let targets = self.snapshot(Some(sender));
        self.deliver(targets, payload.into()).await
    }

    fn snapshot(&self, except: Option<ConnectionId>) -> Vec<(ConnectionId, Arc<Target>)> {
        let mut targets = Vec::new();
        self.connections.scan(|id, target| {
            if Some(*id) != except {
                targets.push((*id, Arc::clone(target)));
            }
        });
        targets
    }

    async fn deliver(&self, targets: Vec<(ConnectionId, Arc<Target>)>, payload: Payload) -> usize {
        let mut delivered = 0;
        for (id, target) in targets {
            if !target.live.load(Ordering::Acquire) {
                tracing::warn!(connection_id = %id, path = %target.path, "Skipping disconnected websocket");
                self.unregister(id);
                continue;
            }
            match target.sender.send(Message::WebSocketSend(payload.clone())).await {
                Ok(()) => {
                    metrics::increment_websocket_message("outbound");
                    delivered += 1;
                }
                Err(err) => {
                    tracing::warn!(connection_id = %id, path = %target.path, error = %err, "WebSocket delivery failed");
                    self.unregister(id);
                }
            }
        }
        delivered
    }
}

impl fmt::Debug for WebSocketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketRegistry")
            .field("connections", &self.connections.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapters::channel::{ChannelReceiver, ChannelSender, channel},
        ports::{
            channel::{MessageReceiver, MessageSender},
            scope::Scope,
        },
    };

    struct Client {
        tx: Arc<ChannelSender>,
        rx: Arc<ChannelReceiver>,
        ws: WebSocket,
    }

    async fn accepted(path: &str) -> Client {
        let (tx, app_rx) = channel(16);
        let (app_tx, rx) = channel(16);
        let mut ws = WebSocket::new(Scope::websocket(path), app_rx, app_tx);
        tx.send(Message::WebSocketConnect).await.unwrap();
        ws.accept(None, Vec::new()).await.unwrap();
        // drop the accept frame
        rx.receive().await.unwrap();
        Client { tx, rx, ws }
    }

    #[tokio::test]
    async fn test_register_requires_accepted_socket() {
        let (_tx, app_rx) = channel(4);
        let (app_tx, _rx) = channel(4);
        let ws = WebSocket::new(Scope::websocket("/ws"), app_rx, app_tx);
        let registry = WebSocketRegistry::new();
        assert!(matches!(registry.register(&ws), Err(AppError::Protocol(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_except_skips_sender() {
        let registry = WebSocketRegistry::new();
        let alice = accepted("/chat").await;
        let bob = accepted("/chat").await;
        let alice_id = registry.register(&alice.ws).unwrap();
        let bob_id = registry.register(&bob.ws).unwrap();
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.broadcast_except(alice_id, "hi bob").await, 1);
        assert_eq!(
            bob.rx.receive().await.unwrap(),
            Message::WebSocketSend(Payload::from("hi bob"))
        );
        assert!(alice.rx.try_receive().await.is_none());

        assert_eq!(registry.broadcast("hi all").await, 2);
        assert!(registry.send_to(bob_id, "direct").await);
        assert!(!registry.send_to(ConnectionId::from(Uuid::new_v4()), "nobody").await);
    }

    #[tokio::test]
    async fn test_disconnected_targets_are_pruned() {
        let registry = WebSocketRegistry::new();
        let mut gone = accepted("/chat").await;
        let stays = accepted("/chat").await;
        let gone_id = registry.register(&gone.ws).unwrap();
        registry.register(&stays.ws).unwrap();

        gone.tx
            .send(Message::WebSocketDisconnect { code: 1001 })
            .await
            .unwrap();
        assert!(gone.ws.receive().await.is_ok());

        assert_eq!(registry.broadcast("still here?").await, 1);
        assert!(!registry.contains(gone_id));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = WebSocketRegistry::new();
        let client = accepted("/chat").await;
        let id = registry.register(&client.ws).unwrap();
        assert_eq!(registry.ids(), vec![id]);
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert_eq!(registry.broadcast("anyone").await, 0);
    }
}
