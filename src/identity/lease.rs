//! Identity lease: acquire, heartbeat, release.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::LeaseError;
use crate::identity::registry::LeaseStore;

/// A worker's hold on its identity.
///
/// Acquisition reuses the preferred id from a previous incarnation of the
/// same worker when nothing else holds it, and silently mints a fresh one
/// on collision. Renewals heartbeat the shared registry; entries from
/// workers that died without releasing age out through the GC threshold.
pub struct IdentityLease {
    store: Arc<dyn LeaseStore>,
    worker_id: Uuid,
    gc_threshold: Duration,
}

impl IdentityLease {
    pub async fn acquire(
        store: Arc<dyn LeaseStore>,
        preferred: Option<Uuid>,
        busy_threshold: Duration,
        gc_threshold: Duration,
    ) -> Result<Self, LeaseError> {
        let now = Utc::now();
        let mut registry = store.load().await?;

        let worker_id = match preferred {
            Some(id) if registry.is_claimed(id, now, busy_threshold) => {
                let fresh = Uuid::new_v4();
                tracing::debug!(
                    previous = %id,
                    fresh = %fresh,
                    "preferred identity is claimed by a live worker, minting a fresh one"
                );
                fresh
            }
            Some(id) => id,
            None => Uuid::new_v4(),
        };

        registry.renew(worker_id, now);
        registry.purge_expired(now, gc_threshold);
        store.save(&registry).await?;

        Ok(Self {
            store,
            worker_id,
            gc_threshold,
        })
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// Heartbeat: refresh our own entry and purge expired ones.
    pub async fn renew(&self) -> Result<(), LeaseError> {
        let now = Utc::now();
        let mut registry = self.store.load().await?;
        registry.renew(self.worker_id, now);
        let purged = registry.purge_expired(now, self.gc_threshold);
        if purged > 0 {
            tracing::debug!(purged, "purged expired identity leases");
        }
        self.store.save(&registry).await
    }

    /// Remove our entry on orderly teardown. A worker that crashes skips
    /// this and its entry ages out through GC instead.
    pub async fn release(&self) -> Result<(), LeaseError> {
        let mut registry = self.store.load().await?;
        registry.remove(self.worker_id);
        self.store.save(&registry).await
    }
}
