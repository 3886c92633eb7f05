//! Feed item queries against the `feed_items` table.

use async_trait::async_trait;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::application::repos::{FeedItemsRepo, RepoError};
use crate::domain::feed::{Actor, FeedItem, FeedItemKind, Target, TargetKind};

use super::{PostgresRepositories, map_sqlx_error};

const UNREAD_COLUMNS: &str = "id, kind, actor_id, actor_display_name, actor_avatar_url, \
     target_id, target_kind, target_preview_url, created_at, read";

#[derive(Debug, FromRow)]
struct FeedItemRow {
    id: String,
    kind: String,
    actor_id: String,
    actor_display_name: String,
    actor_avatar_url: String,
    target_id: Option<String>,
    target_kind: Option<String>,
    target_preview_url: Option<String>,
    created_at: OffsetDateTime,
    read: bool,
}

impl TryFrom<FeedItemRow> for FeedItem {
    type Error = RepoError;

    fn try_from(row: FeedItemRow) -> Result<Self, Self::Error> {
        let kind = FeedItemKind::parse(&row.kind).ok_or_else(|| {
            RepoError::integrity(format!("unknown feed item kind `{}`", row.kind))
        })?;

        let target = match (row.target_id, row.target_kind) {
            (Some(id), Some(raw_kind)) => {
                let kind = TargetKind::parse(&raw_kind).ok_or_else(|| {
                    RepoError::integrity(format!("unknown target kind `{raw_kind}`"))
                })?;
                Some(Target {
                    id,
                    kind,
                    preview_url: row.target_preview_url,
                })
            }
            _ => None,
        };

        Ok(FeedItem {
            id: row.id,
            kind,
            actor: Actor {
                id: row.actor_id,
                display_name: row.actor_display_name,
                avatar_url: row.actor_avatar_url,
            },
            target,
            created_at: row.created_at,
            read: row.read,
        })
    }
}

fn rows_to_items(rows: Vec<FeedItemRow>) -> Result<Vec<FeedItem>, RepoError> {
    rows.into_iter().map(FeedItem::try_from).collect()
}

#[async_trait]
impl FeedItemsRepo for PostgresRepositories {
    async fn list_unread(&self, cap: u32) -> Result<Vec<FeedItem>, RepoError> {
        let sql = format!(
            "SELECT {UNREAD_COLUMNS} FROM feed_items \
             WHERE read = FALSE \
             ORDER BY created_at DESC, id ASC \
             LIMIT $1"
        );
        let rows: Vec<FeedItemRow> = sqlx::query_as(&sql)
            .bind(i64::from(cap))
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        rows_to_items(rows)
    }

    async fn list_unread_since(
        &self,
        created_after: OffsetDateTime,
        cap: u32,
    ) -> Result<Vec<FeedItem>, RepoError> {
        let sql = format!(
            "SELECT {UNREAD_COLUMNS} FROM feed_items \
             WHERE read = FALSE AND created_at > $1 \
             ORDER BY created_at DESC, id ASC \
             LIMIT $2"
        );
        let rows: Vec<FeedItemRow> = sqlx::query_as(&sql)
            .bind(created_after)
            .bind(i64::from(cap))
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        rows_to_items(rows)
    }

    async fn mark_read(&self, id: &str) -> Result<(), RepoError> {
        let result = sqlx::query("UPDATE feed_items SET read = TRUE WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
