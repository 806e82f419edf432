pub mod channel;
pub mod middleware;
pub mod request;
pub mod response;
pub mod websocket;

/// Re-export commonly used types from adapters
pub use channel::{ChannelReceiver, ChannelSender, channel};
pub use middleware::{BaseHttpMiddleware, Next};
pub use request::{HttpConnection, Request};
pub use response::{Body, Response};
pub use websocket::{WebSocket, WebSocketClose, WebSocketState};
