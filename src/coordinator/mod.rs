//! Coordinator-facing plumbing: REST client, both channel flavors,
//! connection lifecycle, log forwarding, and result sinks.

pub mod client;
pub mod duplex;
pub mod log;
pub mod manager;
pub mod push;
pub mod sink;

pub use client::CoordinatorClient;
pub use duplex::{ControlCommand, DuplexHandle, InboundFrame, ResultData};
pub use log::{LogLevel, RemoteLogger};
pub use manager::{ConnectionManager, LinkState};
pub use push::{PushEvent, PushStream};
pub use sink::{DuplexSink, RestSink};
