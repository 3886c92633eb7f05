//! Write-back coordination for mark-as-read.
//!
//! Ordering matters here: the durable update is queued in the outbox before
//! the cache removal happens, so by the time a removal is observable the
//! flag is already on its way to the durable store and warm scans exclude
//! the id. Reversing the two would open the window where a warm re-inserts
//! a just-read item.

use std::sync::Arc;

use tracing::debug;

use super::outbox::Outbox;
use super::store::{CacheError, OrderedCacheStore};

/// Couples the synchronous cache removal with the asynchronous durable
/// propagation of `read = true`.
pub struct WritebackCoordinator {
    store: Arc<dyn OrderedCacheStore>,
    outbox: Arc<Outbox>,
}

impl WritebackCoordinator {
    pub fn new(store: Arc<dyn OrderedCacheStore>, outbox: Arc<Outbox>) -> Self {
        Self { store, outbox }
    }

    /// Mark a feed item as read.
    ///
    /// The cache removal is on the caller's critical path and must succeed
    /// before this returns; the durable update is the outbox worker's
    /// problem. Idempotent: a second call finds nothing to remove and the
    /// outbox drops the duplicate id.
    pub async fn mark_read(&self, item_id: &str) -> Result<(), CacheError> {
        let queued = self.outbox.enqueue(item_id);
        let removed = self.store.remove(item_id).await?;

        debug!(
            target = "brusio::writeback",
            item_id, queued, removed, "mark-read applied to cache"
        );
        Ok(())
    }
}
