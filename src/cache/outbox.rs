//! Write-back outbox.
//!
//! The durable half of mark-as-read goes through here instead of a
//! fire-and-forget task: ids are queued before the cache removal becomes
//! observable, retried with bounded exponential backoff, and dead-lettered
//! after the attempt budget. An id stays in the unconfirmed set until the
//! durable store acknowledges it (or forever, once dead-lettered), and the
//! warmer refuses to re-admit unconfirmed ids. That ordering is what keeps a
//! warm scan from resurrecting a just-read item.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashSet;
use metrics::{counter, gauge};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::application::repos::{FeedItemsRepo, RepoError};

use super::config::CacheConfig;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::outbox";

/// A durable update that exhausted its attempt budget.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub item_id: String,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: OffsetDateTime,
}

/// Handle shared with the write-back coordinator and the warmer.
pub struct Outbox {
    tx: mpsc::UnboundedSender<String>,
    unconfirmed: DashSet<String>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl Outbox {
    /// Build an outbox and the worker that drains it. The caller spawns the
    /// worker; nothing persists until it runs.
    pub fn channel(config: CacheConfig, repo: Arc<dyn FeedItemsRepo>) -> (Arc<Self>, OutboxWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbox = Arc::new(Self {
            tx,
            unconfirmed: DashSet::new(),
            dead_letters: Mutex::new(Vec::new()),
        });
        let worker = OutboxWorker {
            outbox: outbox.clone(),
            rx,
            repo,
            config,
        };
        (outbox, worker)
    }

    /// Queue a durable `read = true` update. Returns false when the id is
    /// already pending; duplicates are dropped, which also makes repeated
    /// mark-read calls cheap.
    pub fn enqueue(&self, item_id: &str) -> bool {
        if !self.unconfirmed.insert(item_id.to_string()) {
            debug!(
                target = "brusio::outbox",
                item_id,
                "durable update already pending, dropping duplicate"
            );
            return false;
        }

        gauge!("brusio_outbox_depth").increment(1.0);
        if self.tx.send(item_id.to_string()).is_err() {
            // Worker is gone; the id stays unconfirmed so warms keep it out.
            error!(
                target = "brusio::outbox",
                item_id, "outbox worker unavailable, durable update not scheduled"
            );
        }
        true
    }

    /// Whether the durable store has not yet acknowledged `read = true` for
    /// this id. Warm passes must skip such ids.
    pub fn is_unconfirmed(&self, item_id: &str) -> bool {
        self.unconfirmed.contains(item_id)
    }

    /// Snapshot of dead-lettered updates, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        mutex_lock(&self.dead_letters, SOURCE, "dead_letters").clone()
    }
}

/// Drains the outbox queue; one in-flight durable update at a time.
pub struct OutboxWorker {
    outbox: Arc<Outbox>,
    rx: mpsc::UnboundedReceiver<String>,
    repo: Arc<dyn FeedItemsRepo>,
    config: CacheConfig,
}

impl OutboxWorker {
    /// Run until the outbox handle is dropped. Each queued id is driven to a
    /// terminal state: confirmed, confirmed-missing, or dead-lettered.
    pub async fn run(mut self) {
        while let Some(item_id) = self.rx.recv().await {
            self.persist(&item_id).await;
            gauge!("brusio_outbox_depth").decrement(1.0);
        }
    }

    async fn persist(&self, item_id: &str) {
        let max_attempts = self.config.outbox_max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            match timeout(self.config.durable_timeout(), self.repo.mark_read(item_id)).await {
                Ok(Ok(())) => {
                    self.outbox.unconfirmed.remove(item_id);
                    info!(
                        target = "brusio::outbox",
                        item_id,
                        attempts = attempt + 1,
                        "durable read flag persisted"
                    );
                    return;
                }
                Ok(Err(RepoError::NotFound)) => {
                    // Nothing durable to update, so nothing a warm could
                    // resurrect either.
                    self.outbox.unconfirmed.remove(item_id);
                    warn!(
                        target = "brusio::outbox",
                        item_id, "feed item not found in durable store"
                    );
                    return;
                }
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => {
                    last_error = format!(
                        "durable update timed out after {:?}",
                        self.config.durable_timeout()
                    );
                }
            }

            if attempt + 1 < max_attempts {
                let delay = backoff_delay(
                    self.config.outbox_initial_backoff(),
                    self.config.outbox_max_backoff(),
                    attempt,
                );
                warn!(
                    target = "brusio::outbox",
                    item_id,
                    attempt = attempt + 1,
                    max_attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "retrying durable update"
                );
                sleep(delay).await;
            }
        }

        // The id is left unconfirmed on purpose: re-admitting it would show a
        // read item as unread until an operator resolves the drift.
        counter!("brusio_outbox_dead_letter_total").increment(1);
        error!(
            target = "brusio::outbox",
            item_id,
            attempts = max_attempts,
            error = %last_error,
            "durable update dead-lettered"
        );
        mutex_lock(&self.outbox.dead_letters, SOURCE, "persist.dead_letter").push(DeadLetter {
            item_id: item_id.to_string(),
            attempts: max_attempts,
            last_error,
            failed_at: OffsetDateTime::now_utc(),
        });
    }
}

/// `initial * 2^attempt`, capped at `max`.
fn backoff_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.min(20);
    let millis = initial.as_millis().saturating_mul(1 << exponent);
    Duration::from_millis(millis.min(max.as_millis()) as u64)
}
