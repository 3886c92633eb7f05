//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::feed::FeedItem;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }
}

/// Durable-store boundary for feed items.
///
/// The store owns the canonical `read` flag and a unique constraint on `id`;
/// the cache only ever sees what these three operations expose.
#[async_trait]
pub trait FeedItemsRepo: Send + Sync {
    /// Unread items, newest first, at most `cap`.
    async fn list_unread(&self, cap: u32) -> Result<Vec<FeedItem>, RepoError>;

    /// Unread items created strictly after `created_after`, newest first, at
    /// most `cap`. The top-up scan.
    async fn list_unread_since(
        &self,
        created_after: OffsetDateTime,
        cap: u32,
    ) -> Result<Vec<FeedItem>, RepoError>;

    /// Set `read = true` by id. `NotFound` when no such row exists.
    async fn mark_read(&self, id: &str) -> Result<(), RepoError>;
}
