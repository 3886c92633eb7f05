//! Feed handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use crate::application::error::ErrorReport;
use crate::application::feed::{DEFAULT_PAGE_LIMIT, FeedError};

use super::HttpState;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

pub async fn get_feed(State(state): State<HttpState>, Query(query): Query<FeedQuery>) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);

    match state.feed.page(limit, query.cursor.as_deref()).await {
        Ok(page) => Json(page).into_response(),
        Err(err) => feed_failure("infra::http::feed::get_feed", "Failed to fetch feed", &err),
    }
}

pub async fn mark_item_read(
    State(state): State<HttpState>,
    Path(item_id): Path<String>,
) -> Response {
    match state.feed.mark_read(&item_id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => feed_failure(
            "infra::http::feed::mark_item_read",
            "Failed to mark item as read",
            &err,
        ),
    }
}

pub async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

/// Fixed public bodies; diagnostics ride along as an [`ErrorReport`] for the
/// response-logging middleware.
fn feed_failure(source: &'static str, public_message: &'static str, err: &FeedError) -> Response {
    let status = StatusCode::INTERNAL_SERVER_ERROR;
    let mut response = (status, Json(json!({ "error": public_message }))).into_response();
    ErrorReport::from_error(source, status, err).attach(&mut response);
    response
}
