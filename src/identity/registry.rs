//! Shared lease registry and its storage backends.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

use crate::error::LeaseError;

/// Renewal timestamps per worker identity.
///
/// Persisted as one JSON document in storage shared by every worker.
/// Writes are last-write-wins; an entry clobbered by a concurrent writer
/// reappears on its owner's next heartbeat, well inside the busy window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaseRegistry {
    entries: HashMap<Uuid, DateTime<Utc>>,
}

impl LeaseRegistry {
    /// Record a heartbeat for `id` at `now`.
    pub fn renew(&mut self, id: Uuid, now: DateTime<Utc>) {
        self.entries.insert(id, now);
    }

    /// Drop the entry for `id`. Returns whether it existed.
    pub fn remove(&mut self, id: Uuid) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// An identity is claimed while its last renewal is younger than
    /// `busy_threshold`. Future-dated renewals count as fresh.
    pub fn is_claimed(&self, id: Uuid, now: DateTime<Utc>, busy_threshold: Duration) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|renewed| age(now, *renewed) < busy_threshold)
    }

    /// Drop entries whose last renewal is older than `gc_threshold`.
    /// Returns how many were purged.
    pub fn purge_expired(&mut self, now: DateTime<Utc>, gc_threshold: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, renewed| age(now, *renewed) <= gc_threshold);
        before - self.entries.len()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn age(now: DateTime<Utc>, renewed: DateTime<Utc>) -> Duration {
    (now - renewed).to_std().unwrap_or(Duration::ZERO)
}

/// Storage backend for the shared lease registry.
///
/// The registry is cooperative, not a mutex. Load-modify-save from two
/// workers can lose an entry transiently; heartbeats repair that within
/// one renewal period, which is why the busy threshold must exceed it.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    async fn load(&self) -> Result<LeaseRegistry, LeaseError>;
    async fn save(&self, registry: &LeaseRegistry) -> Result<(), LeaseError>;
}

/// Process-local store. Shared between workers through an `Arc`.
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    registry: tokio::sync::Mutex<LeaseRegistry>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn load(&self) -> Result<LeaseRegistry, LeaseError> {
        Ok(self.registry.lock().await.clone())
    }

    async fn save(&self, registry: &LeaseRegistry) -> Result<(), LeaseError> {
        *self.registry.lock().await = registry.clone();
        Ok(())
    }
}

/// JSON file store, the cross-process analog of the in-memory one.
/// A missing file reads as an empty registry; a corrupt file is an error
/// so a caller can decide whether to start over.
#[derive(Debug, Clone)]
pub struct FileLeaseStore {
    path: PathBuf,
}

impl FileLeaseStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LeaseStore for FileLeaseStore {
    async fn load(&self) -> Result<LeaseRegistry, LeaseError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LeaseRegistry::default());
            }
            Err(e) => {
                return Err(LeaseError::ReadFailed {
                    reason: e.to_string(),
                });
            }
        };
        serde_json::from_str(&raw).map_err(|e| LeaseError::Corrupt {
            reason: e.to_string(),
        })
    }

    async fn save(&self, registry: &LeaseRegistry) -> Result<(), LeaseError> {
        let raw = serde_json::to_string(registry).map_err(|e| LeaseError::WriteFailed {
            reason: e.to_string(),
        })?;
        fs::write(&self.path, raw)
            .await
            .map_err(|e| LeaseError::WriteFailed {
                reason: e.to_string(),
            })
    }
}
