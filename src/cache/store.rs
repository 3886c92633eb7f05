//! Ordered cache storage.
//!
//! One sorted structure per cache name: members keyed by id, ordered by score
//! ascending then id ascending. The whole structure carries a single coarse
//! TTL; an expired structure reads as empty.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::feed::FeedItem;

use super::lock::rw_write;

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

/// A single scored member of the ordered cache.
///
/// `payload` is the serialized [`FeedItem`] snapshot; `id` doubles as the
/// member key, so re-adding an id overwrites its previous entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub score: i64,
    pub id: String,
    pub payload: String,
}

impl CacheEntry {
    /// The one place the scoring convention lives: score is the negated
    /// `created_at` in unix milliseconds, so ascending score order is
    /// newest-first. Both warm variants insert through here.
    pub fn from_item(item: &FeedItem) -> Result<Self, serde_json::Error> {
        Ok(Self {
            score: -item.created_at_millis(),
            id: item.id.clone(),
            payload: serde_json::to_string(item)?,
        })
    }
}

/// Contract of the ordered structure backing the feed cache.
///
/// Each operation is atomic from the caller's perspective; sequences of
/// operations are not isolated from concurrent mutation.
#[async_trait]
pub trait OrderedCacheStore: Send + Sync {
    /// Insert or overwrite the entry for `entry.id`.
    async fn add(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// Bulk insert; the warm path uses this instead of N round trips.
    async fn add_many(&self, entries: Vec<CacheEntry>) -> Result<(), CacheError>;

    /// Delete by id. Returns whether an entry was present; absence is not an
    /// error.
    async fn remove(&self, id: &str) -> Result<bool, CacheError>;

    /// Entries at ranks `start..=end` (zero-based), ordered by score ascending
    /// then id ascending. Empty when `start` is past the end.
    async fn range_by_rank(&self, start: usize, end: usize)
    -> Result<Vec<CacheEntry>, CacheError>;

    async fn count(&self) -> Result<usize, CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    /// Set a TTL on the whole structure. Coarse, not per-member.
    async fn expire(&self, ttl: Duration) -> Result<(), CacheError>;
}

struct Shelf {
    // (score, id) -> payload; the tuple key gives score-then-id ordering.
    ordered: BTreeMap<(i64, String), String>,
    scores: HashMap<String, i64>,
    expires_at: Option<Instant>,
}

impl Shelf {
    fn new() -> Self {
        Self {
            ordered: BTreeMap::new(),
            scores: HashMap::new(),
            expires_at: None,
        }
    }

    fn drop_if_expired(&mut self) {
        if let Some(deadline) = self.expires_at {
            if Instant::now() >= deadline {
                self.ordered.clear();
                self.scores.clear();
                self.expires_at = None;
            }
        }
    }

    fn insert(&mut self, entry: CacheEntry) {
        if let Some(previous) = self.scores.insert(entry.id.clone(), entry.score) {
            self.ordered.remove(&(previous, entry.id.clone()));
        }
        self.ordered.insert((entry.score, entry.id), entry.payload);
    }
}

/// In-process implementation of [`OrderedCacheStore`].
///
/// Expiry is observed lazily: every operation first drops the shelf if its
/// deadline has passed, mirroring how a keyed TTL behaves in an external
/// sorted-set store.
pub struct MemoryOrderedCache {
    shelf: RwLock<Shelf>,
}

impl MemoryOrderedCache {
    pub fn new() -> Self {
        Self {
            shelf: RwLock::new(Shelf::new()),
        }
    }
}

impl Default for MemoryOrderedCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderedCacheStore for MemoryOrderedCache {
    async fn add(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let mut shelf = rw_write(&self.shelf, SOURCE, "add");
        shelf.drop_if_expired();
        shelf.insert(entry);
        Ok(())
    }

    async fn add_many(&self, entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        let mut shelf = rw_write(&self.shelf, SOURCE, "add_many");
        shelf.drop_if_expired();
        for entry in entries {
            shelf.insert(entry);
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool, CacheError> {
        let mut shelf = rw_write(&self.shelf, SOURCE, "remove");
        shelf.drop_if_expired();
        match shelf.scores.remove(id) {
            Some(score) => {
                shelf.ordered.remove(&(score, id.to_string()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn range_by_rank(
        &self,
        start: usize,
        end: usize,
    ) -> Result<Vec<CacheEntry>, CacheError> {
        let mut shelf = rw_write(&self.shelf, SOURCE, "range_by_rank");
        shelf.drop_if_expired();
        if start >= shelf.ordered.len() || end < start {
            return Ok(Vec::new());
        }
        Ok(shelf
            .ordered
            .iter()
            .skip(start)
            .take(end - start + 1)
            .map(|((score, id), payload)| CacheEntry {
                score: *score,
                id: id.clone(),
                payload: payload.clone(),
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, CacheError> {
        let mut shelf = rw_write(&self.shelf, SOURCE, "count");
        shelf.drop_if_expired();
        Ok(shelf.ordered.len())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut shelf = rw_write(&self.shelf, SOURCE, "clear");
        shelf.ordered.clear();
        shelf.scores.clear();
        shelf.expires_at = None;
        Ok(())
    }

    async fn expire(&self, ttl: Duration) -> Result<(), CacheError> {
        let mut shelf = rw_write(&self.shelf, SOURCE, "expire");
        shelf.drop_if_expired();
        shelf.expires_at = Some(Instant::now() + ttl);
        Ok(())
    }
}
