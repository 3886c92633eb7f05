//! Cache warm jobs.
//!
//! Two entry points populate the cache from the durable store: a full warm
//! (clear + bulk insert, used at startup and whenever a read finds the cache
//! empty) and an incremental top-up (append items newer than the newest
//! cached one, triggered when a read window nears the end of the cache). Both
//! run under a per-cache-name lease so at most one warm is ever in flight;
//! concurrent triggers are dropped, not queued.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::application::repos::{FeedItemsRepo, RepoError};
use crate::domain::feed::FeedItem;

use super::config::CacheConfig;
use super::lock::mutex_lock;
use super::outbox::Outbox;
use super::store::{CacheEntry, CacheError, OrderedCacheStore};

const SOURCE: &str = "cache::warmer";

#[derive(Debug, Error)]
pub enum WarmError {
    #[error("durable store scan failed: {0}")]
    Durable(#[from] RepoError),
    #[error("durable store scan timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Grants at most one warm per cache name at a time.
///
/// The permit is acquired synchronously by the trigger, before any task is
/// spawned, so a burst of reads crossing the top-up threshold together still
/// produces a single warm.
pub struct WarmLease {
    inflight: Mutex<HashSet<String>>,
}

impl WarmLease {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashSet::new()),
        }
    }

    pub fn try_acquire(self: &Arc<Self>, cache_name: &str) -> Option<WarmPermit> {
        let mut inflight = mutex_lock(&self.inflight, SOURCE, "try_acquire");
        if inflight.insert(cache_name.to_string()) {
            Some(WarmPermit {
                lease: self.clone(),
                cache_name: cache_name.to_string(),
            })
        } else {
            None
        }
    }
}

impl Default for WarmLease {
    fn default() -> Self {
        Self::new()
    }
}

/// Held for the duration of a warm; releasing is automatic on drop, including
/// on panic or early return inside the warm task.
pub struct WarmPermit {
    lease: Arc<WarmLease>,
    cache_name: String,
}

impl Drop for WarmPermit {
    fn drop(&mut self) {
        mutex_lock(&self.lease.inflight, SOURCE, "permit_drop").remove(&self.cache_name);
    }
}

/// Populates the ordered cache from the durable store.
pub struct CacheWarmer {
    config: CacheConfig,
    store: Arc<dyn OrderedCacheStore>,
    repo: Arc<dyn FeedItemsRepo>,
    outbox: Arc<Outbox>,
    lease: Arc<WarmLease>,
}

impl CacheWarmer {
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn OrderedCacheStore>,
        repo: Arc<dyn FeedItemsRepo>,
        outbox: Arc<Outbox>,
    ) -> Self {
        Self {
            config,
            store,
            repo,
            outbox,
            lease: Arc::new(WarmLease::new()),
        }
    }

    /// Run a full warm inline. Used at startup, where waiting for the cache
    /// is wanted. Returns `None` when another warm already holds the lease.
    pub async fn full_warm(&self) -> Result<Option<usize>, WarmError> {
        let Some(_permit) = self.lease.try_acquire(&self.config.cache_name) else {
            counter!("brusio_cache_warm_skipped_total").increment(1);
            return Ok(None);
        };
        self.run_full_warm().await.map(Some)
    }

    /// Trigger a full warm off the read path. Returns whether a warm task was
    /// actually started.
    pub fn trigger_full_warm(self: &Arc<Self>) -> bool {
        self.trigger(WarmKind::Full)
    }

    /// Trigger an incremental top-up off the read path.
    pub fn trigger_top_up(self: &Arc<Self>) -> bool {
        self.trigger(WarmKind::TopUp)
    }

    fn trigger(self: &Arc<Self>, kind: WarmKind) -> bool {
        let Some(permit) = self.lease.try_acquire(&self.config.cache_name) else {
            counter!("brusio_cache_warm_skipped_total").increment(1);
            debug!(
                target = "brusio::warmer",
                cache_name = %self.config.cache_name,
                kind = kind.as_str(),
                "warm already in flight, dropping trigger"
            );
            return false;
        };

        let warmer = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let outcome = match kind {
                WarmKind::Full => warmer.run_full_warm().await,
                WarmKind::TopUp => warmer.run_top_up().await,
            };
            match outcome {
                Ok(inserted) => info!(
                    target = "brusio::warmer",
                    cache_name = %warmer.config.cache_name,
                    kind = kind.as_str(),
                    inserted,
                    "cache warm finished"
                ),
                Err(err) => warn!(
                    target = "brusio::warmer",
                    cache_name = %warmer.config.cache_name,
                    kind = kind.as_str(),
                    error = %err,
                    "cache warm failed, prior cache state retained"
                ),
            }
        });
        true
    }

    async fn run_full_warm(&self) -> Result<usize, WarmError> {
        // Scan before touching the cache: a durable failure must leave the
        // existing entries in place.
        let items = self.scan_unread(None).await?;
        let entries = self.admissible_entries(items);
        let inserted = entries.len();

        self.store.clear().await?;
        self.store.add_many(entries).await?;
        self.store.expire(self.config.ttl()).await?;

        counter!("brusio_cache_full_warm_total").increment(1);
        Ok(inserted)
    }

    async fn run_top_up(&self) -> Result<usize, WarmError> {
        let newest = self.newest_cached_created_at().await?;
        let items = self.scan_unread(Some(newest)).await?;
        let entries = self.admissible_entries(items);
        let inserted = entries.len();

        self.store.add_many(entries).await?;
        self.store.expire(self.config.ttl()).await?;

        counter!("brusio_cache_topup_total").increment(1);
        Ok(inserted)
    }

    async fn scan_unread(
        &self,
        created_after: Option<OffsetDateTime>,
    ) -> Result<Vec<FeedItem>, WarmError> {
        let limit = self.config.durable_timeout();
        let scan = match created_after {
            Some(after) => timeout(limit, self.repo.list_unread_since(after, self.config.warm_cap)),
            None => timeout(limit, self.repo.list_unread(self.config.warm_cap)),
        };
        match scan.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(WarmError::Timeout(limit)),
        }
    }

    /// `created_at` of the newest cached item, the low-water mark for a
    /// top-up scan. Rank 0 holds the newest item under the scoring
    /// convention; an empty cache scans from the epoch.
    async fn newest_cached_created_at(&self) -> Result<OffsetDateTime, CacheError> {
        let head = self.store.range_by_rank(0, 0).await?;
        Ok(head
            .first()
            .and_then(|entry| {
                OffsetDateTime::from_unix_timestamp_nanos(i128::from(-entry.score) * 1_000_000)
                    .ok()
            })
            .unwrap_or(OffsetDateTime::UNIX_EPOCH))
    }

    /// Convert scanned items to entries, excluding ids whose durable read
    /// flag is still unconfirmed in the outbox. Without that filter a warm
    /// racing a write-back would resurrect a just-read item.
    fn admissible_entries(&self, items: Vec<FeedItem>) -> Vec<CacheEntry> {
        let mut entries = Vec::with_capacity(items.len());
        for item in &items {
            if self.outbox.is_unconfirmed(&item.id) {
                debug!(
                    target = "brusio::warmer",
                    item_id = %item.id,
                    "skipping item with unconfirmed read flag"
                );
                continue;
            }
            match CacheEntry::from_item(item) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(
                    target = "brusio::warmer",
                    item_id = %item.id,
                    error = %err,
                    "failed to serialize feed item for caching"
                ),
            }
        }
        entries
    }
}

#[derive(Clone, Copy)]
enum WarmKind {
    Full,
    TopUp,
}

impl WarmKind {
    fn as_str(self) -> &'static str {
        match self {
            WarmKind::Full => "full",
            WarmKind::TopUp => "top_up",
        }
    }
}
