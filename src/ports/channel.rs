use std::sync::Arc;

use async_trait::async_trait;

use crate::ports::{app::AppResult, message::Message};

/// Receive half of a connection channel (`receive()` in the protocol).
#[async_trait]
pub trait MessageReceiver: Send + Sync + 'static {
    /// Await the next inbound message for this connection.
    ///
    /// # Returns
    /// The next message in FIFO order, or `AppError::ChannelClosed` once the
    /// server side has gone away.
    async fn receive(&self) -> AppResult<Message>;
}

/// Send half of a connection channel (`send(message)` in the protocol).
#[async_trait]
pub trait MessageSender: Send + Sync + 'static {
    /// Deliver one outbound message, awaiting capacity if the channel is bounded.
    async fn send(&self, message: Message) -> AppResult<()>;
}

/// Shared handle to a receive channel.
pub type SharedReceiver = Arc<dyn MessageReceiver>;

/// Shared handle to a send channel.
pub type SharedSender = Arc<dyn MessageSender>;
