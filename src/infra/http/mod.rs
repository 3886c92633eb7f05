pub mod feed;
pub mod middleware;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::feed::FeedQueryService;

#[derive(Clone)]
pub struct HttpState {
    pub feed: Arc<FeedQueryService>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/feed", get(feed::get_feed))
        .route("/feed/items/{item_id}/read", post(feed::mark_item_read))
        .route("/health", get(feed::health))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::permissive_cors))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
