//! The hosted page seam.
//!
//! Everything the bridge does to the app goes through `HostPage`: UI
//! submission, the wrapped network entry point, reloads, title
//! decoration, and the per-tab stash. The bridge never reaches below
//! this trait.

pub mod sim;

pub use sim::SimulatedHost;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::error::HostError;
use crate::intercept::RequestDescriptor;
use crate::relay::ChunkStream;

/// Directive for one intercepted outgoing call.
#[derive(Debug)]
pub enum CallDirective {
    /// Let the original call through untouched.
    Proceed,
    /// Execute `request` in place of the original. The page renders the
    /// response as its own; the bridge's copy arrives chunk by chunk on
    /// `relay_tx`, which closes when the response ends.
    Execute {
        request: RequestDescriptor,
        relay_tx: mpsc::UnboundedSender<Result<String, HostError>>,
    },
}

/// Events the page raises at the bridge.
#[derive(Debug)]
pub enum HostEvent {
    /// The app is about to make an outgoing call. The bridge answers on
    /// `directive_tx`; a dropped sender counts as Proceed, so a confused
    /// bridge can never wedge the page.
    OutgoingCall {
        request: RequestDescriptor,
        directive_tx: oneshot::Sender<CallDirective>,
    },
    /// The page is being torn down.
    Unloading,
}

pub type HostEventStream = Pin<Box<dyn Stream<Item = HostEvent> + Send>>;

/// The hosted page as the bridge sees it.
#[async_trait]
pub trait HostPage: Send + Sync {
    /// Start delivering page events. Called once per page lifetime.
    async fn start(&self) -> Result<HostEventStream, HostError>;

    /// Type `text` into the input control and press send. Fails with
    /// `SubmitDisabled` when the control will not take the click.
    async fn submit_prompt(&self, text: &str) -> Result<(), HostError>;

    /// Perform a bridge-owned call through the page's network entry
    /// point. The page renders one copy of the response; the returned
    /// stream is the bridge's copy.
    async fn execute(&self, request: &RequestDescriptor) -> Result<ChunkStream, HostError>;

    /// Hard reset. The bridge treats this as process restart.
    async fn reload(&self);

    /// Replace the title decoration; an empty string clears it.
    async fn set_title_decoration(&self, decoration: &str);

    /// Serialized page state for injection completion reports.
    async fn page_snapshot(&self) -> Result<String, HostError>;

    /// Run an injection payload against the page.
    async fn run_injection(&self, payload: &serde_json::Value) -> Result<(), HostError>;

    // Per-tab stash. Survives reloads within one page lifetime, not a
    // full teardown.
    async fn stash_put(&self, key: &str, value: &str);
    async fn stash_get(&self, key: &str) -> Option<String>;
    async fn stash_take(&self, key: &str) -> Option<String>;
}
