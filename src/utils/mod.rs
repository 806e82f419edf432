pub mod connection_registry;
pub mod lifespan_driver;

pub use connection_registry::{ConnectionId, WebSocketRegistry};
pub use lifespan_driver::{LifespanDriver, LifespanDriverError};
