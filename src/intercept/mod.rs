//! Request interception at the page's network boundary.
//!
//! Classification is a pure function over a request descriptor and a
//! snapshot of interceptor flags; the session owns the flags and acts on
//! the verdict.

pub mod capture;
pub mod classifier;
pub mod rewrite;

pub use capture::CaptureMode;
pub use classifier::{Classification, InterceptRules, classify};
pub use rewrite::{build_retry_request, rewrite_trigger_request};

use serde::{Deserialize, Serialize};

/// An outgoing HTTP call as seen at the page's network boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub method: String,
    pub url: String,
    pub body: Option<String>,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            body: None,
        }
    }

    pub fn with_body(
        method: impl Into<String>,
        url: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            body: Some(body.into()),
        }
    }
}

/// Mutable interceptor flags. `rewriting` guards against a rewritten
/// submission being classified as a trigger again.
#[derive(Debug, Default)]
pub struct InterceptorState {
    pub rewriting: bool,
    pub capture: CaptureMode,
}

impl InterceptorState {
    pub fn snapshot(&self) -> InterceptSnapshot {
        InterceptSnapshot {
            rewriting: self.rewriting,
            capture_armed: self.capture.is_armed(),
        }
    }
}

/// Immutable view of the interceptor flags at classification time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterceptSnapshot {
    pub rewriting: bool,
    pub capture_armed: bool,
}
