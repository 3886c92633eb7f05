//! Feed query service.
//!
//! Answers paginated reads from the ordered cache and routes mark-as-read
//! mutations through the write-back coordinator. The read path never waits
//! for the durable store: warms triggered here run on spawned tasks.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::cache::{
    CacheConfig, CacheError, CacheWarmer, OrderedCacheStore, WritebackCoordinator, cursor,
};
use crate::domain::feed::FeedItem;

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// One page of the feed plus the cursor for the next one, when there may be
/// more.
#[derive(Debug, Clone, Serialize)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Clone)]
pub struct FeedQueryService {
    config: CacheConfig,
    store: Arc<dyn OrderedCacheStore>,
    warmer: Arc<CacheWarmer>,
    writeback: Arc<WritebackCoordinator>,
}

impl FeedQueryService {
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn OrderedCacheStore>,
        warmer: Arc<CacheWarmer>,
        writeback: Arc<WritebackCoordinator>,
    ) -> Self {
        Self {
            config,
            store,
            warmer,
            writeback,
        }
    }

    /// Serve one page of the feed.
    ///
    /// An empty cache triggers a full warm and a window reaching past the
    /// top-up threshold triggers a top-up; both without blocking this read.
    /// A next cursor is issued only when the raw range filled the whole
    /// window and the cache holds entries beyond it.
    pub async fn page(&self, limit: u32, cursor: Option<&str>) -> Result<FeedPage, FeedError> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT) as usize;
        // Saturate: a parseable but absurd cursor is an empty page, not a
        // panic.
        let start = cursor::decode(cursor);
        let end = start.saturating_add(limit - 1);
        let after_window = end.saturating_add(1);

        let total = self.store.count().await?;
        if total == 0 {
            self.warmer.trigger_full_warm();
        } else if after_window as f64 > total as f64 * self.config.topup_threshold_clamped() {
            self.warmer.trigger_top_up();
        }

        let raw = self.store.range_by_rank(start, end).await?;
        let mut items = Vec::with_capacity(raw.len());
        for entry in &raw {
            match serde_json::from_str::<FeedItem>(&entry.payload) {
                Ok(item) => items.push(item),
                Err(err) => {
                    // One bad payload must not fail the page.
                    counter!("brusio_cache_malformed_entry_total").increment(1);
                    warn!(
                        target = "brusio::feed",
                        item_id = %entry.id,
                        error = %err,
                        "skipping malformed cache entry"
                    );
                }
            }
        }

        // The raw count, not the deserialized count, decides the cursor: a
        // skipped entry must not end pagination early. A full window with
        // nothing beyond it is the end of the feed, not a page boundary.
        let next_cursor =
            (raw.len() == limit && after_window < total).then(|| cursor::encode(after_window));

        Ok(FeedPage { items, next_cursor })
    }

    /// Mark a feed item as read. Succeeds once the cache removal is durable
    /// in-process; the durable-store flag follows asynchronously.
    pub async fn mark_read(&self, item_id: &str) -> Result<(), FeedError> {
        self.writeback.mark_read(item_id).await.map_err(FeedError::from)
    }
}
