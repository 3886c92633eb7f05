//! End-to-end tests for the feed HTTP surface.
//!
//! A fake durable repository stands in for Postgres; the cache, warmer,
//! outbox, and router are the real ones.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use time::OffsetDateTime;
use time::macros::datetime;
use tokio::sync::Semaphore;
use tower::ServiceExt;

use brusio::application::feed::FeedQueryService;
use brusio::application::repos::{FeedItemsRepo, RepoError};
use brusio::cache::{
    CacheConfig, CacheError, CacheEntry, CacheWarmer, MemoryOrderedCache, OrderedCacheStore,
    Outbox, OutboxWorker, WritebackCoordinator,
};
use brusio::domain::feed::{Actor, FeedItem, FeedItemKind};
use brusio::infra::http::{HttpState, build_router};

fn item(id: &str, created_at: OffsetDateTime) -> FeedItem {
    FeedItem {
        id: id.to_string(),
        kind: FeedItemKind::Like,
        actor: Actor {
            id: "user_1".to_string(),
            display_name: "Ada".to_string(),
            avatar_url: "https://example.com/ada.png".to_string(),
        },
        target: None,
        created_at,
        read: false,
    }
}

/// In-memory stand-in for the durable store, with scan counters and an
/// optional gate that holds top-up scans open.
struct FakeFeedRepo {
    items: Mutex<Vec<FeedItem>>,
    full_scans: AtomicUsize,
    since_scans: AtomicUsize,
    read_marks: Mutex<Vec<String>>,
    since_gate: Option<Arc<Semaphore>>,
}

impl FakeFeedRepo {
    fn new(items: Vec<FeedItem>) -> Self {
        Self {
            items: Mutex::new(items),
            full_scans: AtomicUsize::new(0),
            since_scans: AtomicUsize::new(0),
            read_marks: Mutex::new(Vec::new()),
            since_gate: None,
        }
    }

    fn gated(items: Vec<FeedItem>, gate: Arc<Semaphore>) -> Self {
        Self {
            since_gate: Some(gate),
            ..Self::new(items)
        }
    }

    fn unread_newest_first(&self) -> Vec<FeedItem> {
        let mut unread: Vec<FeedItem> = self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|item| !item.read)
            .cloned()
            .collect();
        unread.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        unread
    }
}

#[async_trait]
impl FeedItemsRepo for FakeFeedRepo {
    async fn list_unread(&self, cap: u32) -> Result<Vec<FeedItem>, RepoError> {
        self.full_scans.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .unread_newest_first()
            .into_iter()
            .take(cap as usize)
            .collect())
    }

    async fn list_unread_since(
        &self,
        created_after: OffsetDateTime,
        cap: u32,
    ) -> Result<Vec<FeedItem>, RepoError> {
        if let Some(gate) = &self.since_gate {
            let _pass = gate.acquire().await.expect("gate closed");
        }
        self.since_scans.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .unread_newest_first()
            .into_iter()
            .filter(|item| item.created_at > created_after)
            .take(cap as usize)
            .collect())
    }

    async fn mark_read(&self, id: &str) -> Result<(), RepoError> {
        let mut items = self.items.lock().unwrap();
        let Some(found) = items.iter_mut().find(|item| item.id == id) else {
            return Err(RepoError::NotFound);
        };
        found.read = true;
        self.read_marks.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

struct TestApp {
    router: Router,
    warmer: Arc<CacheWarmer>,
    outbox: Arc<Outbox>,
    worker: Option<OutboxWorker>,
    store: Arc<MemoryOrderedCache>,
}

fn build_app(repo: Arc<FakeFeedRepo>, config: CacheConfig) -> TestApp {
    let store = Arc::new(MemoryOrderedCache::new());
    let store_dyn: Arc<dyn OrderedCacheStore> = store.clone();
    let repo_dyn: Arc<dyn FeedItemsRepo> = repo;

    let (outbox, worker) = Outbox::channel(config.clone(), repo_dyn.clone());
    let warmer = Arc::new(CacheWarmer::new(
        config.clone(),
        store_dyn.clone(),
        repo_dyn,
        outbox.clone(),
    ));
    let writeback = Arc::new(WritebackCoordinator::new(store_dyn.clone(), outbox.clone()));
    let feed = Arc::new(FeedQueryService::new(
        config,
        store_dyn,
        warmer.clone(),
        writeback,
    ));

    TestApp {
        router: build_router(HttpState { feed }),
        warmer,
        outbox,
        worker: Some(worker),
        store,
    }
}

async fn get_feed(router: &Router, query: &str) -> (StatusCode, serde_json::Value) {
    let uri = if query.is_empty() {
        "/feed".to_string()
    } else {
        format!("/feed?{query}")
    };
    let response = router
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, body)
}

async fn post_read(router: &Router, item_id: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(
            Request::post(format!("/feed/items/{item_id}/read"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, body)
}

fn item_ids(body: &serde_json::Value) -> Vec<String> {
    body["items"]
        .as_array()
        .expect("items array")
        .iter()
        .map(|item| item["id"].as_str().expect("item id").to_string())
        .collect()
}

fn abc_items() -> Vec<FeedItem> {
    // A is the newest, so it ranks first under newest-first ordering.
    vec![
        item("A", datetime!(2024-05-03 00:00:00 UTC)),
        item("B", datetime!(2024-05-02 00:00:00 UTC)),
        item("C", datetime!(2024-05-01 00:00:00 UTC)),
    ]
}

#[tokio::test]
async fn pages_through_feed_and_marks_read() {
    let repo = Arc::new(FakeFeedRepo::new(abc_items()));
    let app = build_app(repo, CacheConfig::default());
    app.warmer.full_warm().await.unwrap();

    let (status, body) = get_feed(&app.router, "limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item_ids(&body), vec!["A", "B"]);
    assert_eq!(body["next_cursor"], "2");

    let (status, body) = get_feed(&app.router, "limit=2&cursor=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item_ids(&body), vec!["C"]);
    assert!(body.get("next_cursor").is_none());

    let (status, body) = post_read(&app.router, "B").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::Value::Null);

    // Only two items remain, so the full window carries no cursor.
    let (status, body) = get_feed(&app.router, "limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item_ids(&body), vec!["A", "C"]);
    assert!(body.get("next_cursor").is_none());
}

#[tokio::test]
async fn cursor_chain_yields_each_item_exactly_once() {
    let items: Vec<FeedItem> = (0..7)
        .map(|i| {
            item(
                &format!("item_{i}"),
                datetime!(2024-05-01 00:00:00 UTC) + time::Duration::hours(i),
            )
        })
        .collect();
    let repo = Arc::new(FakeFeedRepo::new(items));
    let app = build_app(repo, CacheConfig::default());
    app.warmer.full_warm().await.unwrap();

    let mut seen: Vec<String> = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let query = match &cursor {
            Some(value) => format!("limit=3&cursor={value}"),
            None => "limit=3".to_string(),
        };
        let (status, body) = get_feed(&app.router, &query).await;
        assert_eq!(status, StatusCode::OK);
        seen.extend(item_ids(&body));
        match body.get("next_cursor").and_then(|v| v.as_str()) {
            Some(next) => cursor = Some(next.to_string()),
            None => break,
        }
    }

    let expected: Vec<String> = (0..7).rev().map(|i| format!("item_{i}")).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn mark_read_is_idempotent_over_http() {
    let repo = Arc::new(FakeFeedRepo::new(abc_items()));
    let mut app = build_app(repo.clone(), CacheConfig::default());
    app.warmer.full_warm().await.unwrap();

    let (status, _) = post_read(&app.router, "B").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post_read(&app.router, "B").await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get_feed(&app.router, "limit=10").await;
    assert_eq!(item_ids(&body), vec!["A", "C"]);

    // Drain the outbox after both calls; the duplicate was dropped, so the
    // durable store saw exactly one update.
    let worker = app.worker.take().unwrap();
    let handle = tokio::spawn(worker.run());
    for _ in 0..200 {
        if !app.outbox.is_unconfirmed("B") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!app.outbox.is_unconfirmed("B"));
    assert_eq!(repo.read_marks.lock().unwrap().as_slice(), ["B"]);
    handle.abort();
}

#[tokio::test]
async fn concurrent_threshold_reads_trigger_one_topup() {
    let gate = Arc::new(Semaphore::new(0));
    let items: Vec<FeedItem> = (0..5)
        .map(|i| {
            item(
                &format!("item_{i}"),
                datetime!(2024-05-01 00:00:00 UTC) + time::Duration::hours(i),
            )
        })
        .collect();
    let repo = Arc::new(FakeFeedRepo::gated(items, gate.clone()));
    let app = build_app(repo.clone(), CacheConfig::default());
    app.warmer.full_warm().await.unwrap();

    // Five cached items, window of five: every request crosses the 80%
    // threshold. The lease is taken synchronously on the read path, so only
    // one top-up task may exist while the gate holds it open.
    let (r1, r2, r3, r4) = tokio::join!(
        get_feed(&app.router, "limit=5"),
        get_feed(&app.router, "limit=5"),
        get_feed(&app.router, "limit=5"),
        get_feed(&app.router, "limit=5"),
    );
    for (status, _) in [r1, r2, r3, r4] {
        assert_eq!(status, StatusCode::OK);
    }

    // The single in-flight scan is still parked on the gate.
    assert_eq!(repo.since_scans.load(Ordering::SeqCst), 0);

    gate.add_permits(1);
    for _ in 0..200 {
        if repo.since_scans.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(repo.since_scans.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn warm_does_not_resurrect_item_read_moments_ago() {
    let repo = Arc::new(FakeFeedRepo::new(abc_items()));
    let app = build_app(repo.clone(), CacheConfig::default());
    app.warmer.full_warm().await.unwrap();

    // No outbox worker runs, so the durable store still reports B unread:
    // exactly the window where a naive warm would resurrect it.
    let (status, _) = post_read(&app.router, "B").await;
    assert_eq!(status, StatusCode::OK);

    app.warmer.full_warm().await.unwrap();

    let (_, body) = get_feed(&app.router, "limit=10").await;
    assert_eq!(item_ids(&body), vec!["A", "C"]);
}

#[tokio::test]
async fn empty_cache_read_triggers_full_warm() {
    let repo = Arc::new(FakeFeedRepo::new(abc_items()));
    let app = build_app(repo.clone(), CacheConfig::default());

    let (status, body) = get_feed(&app.router, "").await;
    assert_eq!(status, StatusCode::OK);
    assert!(item_ids(&body).is_empty());

    for _ in 0..200 {
        if app.store.count().await.unwrap() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(repo.full_scans.load(Ordering::SeqCst), 1);

    let (_, body) = get_feed(&app.router, "").await;
    assert_eq!(item_ids(&body), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn health_and_cors_surface() {
    let repo = Arc::new(FakeFeedRepo::new(Vec::new()));
    let app = build_app(repo, CacheConfig::default());

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");

    let preflight = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/feed")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(preflight.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        preflight
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .and_then(|v| v.to_str().ok()),
        Some("GET, POST, PUT, DELETE, OPTIONS")
    );
}

/// Store that refuses every operation; drives the fixed 500 bodies.
struct DownCache;

#[async_trait]
impl OrderedCacheStore for DownCache {
    async fn add(&self, _entry: CacheEntry) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn add_many(&self, _entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn remove(&self, _id: &str) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn range_by_rank(
        &self,
        _start: usize,
        _end: usize,
    ) -> Result<Vec<CacheEntry>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn count(&self) -> Result<usize, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn expire(&self, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn unavailable_cache_maps_to_fixed_error_bodies() {
    let config = CacheConfig::default();
    let store: Arc<dyn OrderedCacheStore> = Arc::new(DownCache);
    let repo: Arc<dyn FeedItemsRepo> = Arc::new(FakeFeedRepo::new(Vec::new()));

    let (outbox, _worker) = Outbox::channel(config.clone(), repo.clone());
    let warmer = Arc::new(CacheWarmer::new(
        config.clone(),
        store.clone(),
        repo,
        outbox.clone(),
    ));
    let writeback = Arc::new(WritebackCoordinator::new(store.clone(), outbox));
    let feed = Arc::new(FeedQueryService::new(config, store, warmer, writeback));
    let router = build_router(HttpState { feed });

    let (status, body) = get_feed(&router, "").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to fetch feed");

    let (status, body) = post_read(&router, "A").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to mark item as read");
}
