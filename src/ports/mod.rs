//! Connection-protocol contract: the scope, messages, channel halves and the
//! application trait every component implements.
pub mod app;
pub mod channel;
pub mod message;
pub mod scope;

pub use app::{App, AppError, AppResult, Layer, SharedApp};
pub use channel::{MessageReceiver, MessageSender, SharedReceiver, SharedSender};
pub use message::{Message, Payload};
pub use scope::{Address, PathParams, RawHeaders, Scope, ScopeKind};
