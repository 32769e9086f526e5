//! Coordination and relay logic that makes crash-prone browser tabs
//! against a hosted chat app behave like a reliable
//! single-job-at-a-time worker pool.

pub mod chain;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod identity;
pub mod intercept;
pub mod job;
pub mod relay;
pub mod session;

pub use error::{Error, Result};
