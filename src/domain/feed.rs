//! Feed item domain types.
//!
//! The durable store owns the canonical record; the cache holds a denormalized
//! JSON snapshot of the same shape. `created_at` is serialized as RFC 3339 on
//! the wire and collapsed to unix milliseconds for cache scoring.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// What kind of activity produced a feed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedItemKind {
    Like,
    Comment,
    Follow,
}

impl FeedItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedItemKind::Like => "like",
            FeedItemKind::Comment => "comment",
            FeedItemKind::Follow => "follow",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "like" => Some(FeedItemKind::Like),
            "comment" => Some(FeedItemKind::Comment),
            "follow" => Some(FeedItemKind::Follow),
            _ => None,
        }
    }
}

/// What a feed item points at, when it points at anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Post,
    Comment,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Post => "post",
            TargetKind::Comment => "comment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "post" => Some(TargetKind::Post),
            "comment" => Some(TargetKind::Comment),
            _ => None,
        }
    }
}

/// The user who triggered the activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub display_name: String,
    pub avatar_url: String,
}

/// The content the activity refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub kind: TargetKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
}

/// One entry of the activity feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub kind: FeedItemKind,
    pub actor: Actor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub read: bool,
}

impl FeedItem {
    /// `created_at` truncated to unix milliseconds, the precision the cache
    /// scoring convention is defined over.
    pub fn created_at_millis(&self) -> i64 {
        (self.created_at.unix_timestamp_nanos() / 1_000_000) as i64
    }
}
