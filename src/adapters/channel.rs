//! In-memory implementation of the connection channel.
//!
//! Servers embedding the router feed inbound messages through a
//! [`ChannelSender`] and read the application's output from a
//! [`ChannelReceiver`]; the same pair backs the streaming middleware queue.
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::ports::{
    app::{AppError, AppResult},
    channel::{MessageReceiver, MessageSender},
    message::Message,
};

/// Receive half backed by a bounded `tokio::sync::mpsc` queue.
#[derive(Debug)]
pub struct ChannelReceiver {
    rx: Mutex<mpsc::Receiver<Message>>,
}

impl ChannelReceiver {
    pub fn new(rx: mpsc::Receiver<Message>) -> Self {
        Self { rx: Mutex::new(rx) }
    }

    /// Non-blocking receive; `None` when nothing is queued or the channel is closed.
    pub async fn try_receive(&self) -> Option<Message> {
        self.rx.lock().await.try_recv().ok()
    }

    /// Stop accepting new messages; queued ones can still be received.
    pub async fn close(&self) {
        self.rx.lock().await.close();
    }
}

#[async_trait]
impl MessageReceiver for ChannelReceiver {
    async fn receive(&self) -> AppResult<Message> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(AppError::ChannelClosed)
    }
}

/// Send half backed by a bounded `tokio::sync::mpsc` queue.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<Message>,
}

impl ChannelSender {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl MessageSender for ChannelSender {
    async fn send(&self, message: Message) -> AppResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| AppError::ChannelClosed)
    }
}

/// Create a connected sender/receiver pair with room for `capacity` messages.
pub fn channel(capacity: usize) -> (Arc<ChannelSender>, Arc<ChannelReceiver>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        Arc::new(ChannelSender::new(tx)),
        Arc::new(ChannelReceiver::new(rx)),
    )
}
