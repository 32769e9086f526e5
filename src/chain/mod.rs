//! Message chain construction for the hosted app's envelope.

pub mod builder;
pub mod message;

pub use builder::{Chain, ChainRequest, build_chain};
pub use message::{ChainedMessage, MessageStatus, MessageTemplate, SessionContext};
