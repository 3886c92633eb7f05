//! Cache configuration.
//!
//! Controls the warm job, the top-up trigger, and the write-back outbox via
//! `brusio.toml`.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_CACHE_NAME: &str = "feed";
const DEFAULT_WARM_CAP: u32 = 100;
const DEFAULT_TOPUP_THRESHOLD: f64 = 0.8;
const DEFAULT_TTL_SECONDS: u64 = 60;
const DEFAULT_DURABLE_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_OUTBOX_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_OUTBOX_INITIAL_BACKOFF_MS: u64 = 100;
const DEFAULT_OUTBOX_MAX_BACKOFF_MS: u64 = 5_000;

/// Cache tuning knobs from `brusio.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Name identifying the feed cache; keys the single-warm lease.
    pub cache_name: String,
    /// Maximum items fetched from the durable store per warm pass.
    pub warm_cap: u32,
    /// Fraction of the cached count a request window must cover to trigger a
    /// top-up.
    pub topup_threshold: f64,
    /// Coarse TTL applied to the whole cache structure after a warm.
    pub ttl_seconds: u64,
    /// Ceiling on any single durable-store call issued off the request path.
    pub durable_timeout_ms: u64,
    /// Outbox attempts before an item is dead-lettered.
    pub outbox_max_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub outbox_initial_backoff_ms: u64,
    /// Cap on the retry delay.
    pub outbox_max_backoff_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            warm_cap: DEFAULT_WARM_CAP,
            topup_threshold: DEFAULT_TOPUP_THRESHOLD,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            durable_timeout_ms: DEFAULT_DURABLE_TIMEOUT_MS,
            outbox_max_attempts: DEFAULT_OUTBOX_MAX_ATTEMPTS,
            outbox_initial_backoff_ms: DEFAULT_OUTBOX_INITIAL_BACKOFF_MS,
            outbox_max_backoff_ms: DEFAULT_OUTBOX_MAX_BACKOFF_MS,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn durable_timeout(&self) -> Duration {
        Duration::from_millis(self.durable_timeout_ms)
    }

    pub fn outbox_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.outbox_initial_backoff_ms)
    }

    pub fn outbox_max_backoff(&self) -> Duration {
        Duration::from_millis(self.outbox_max_backoff_ms)
    }

    /// Threshold clamped into (0, 1]; a zero or negative value would turn
    /// every read into a warm trigger.
    pub fn topup_threshold_clamped(&self) -> f64 {
        if self.topup_threshold > 0.0 && self.topup_threshold <= 1.0 {
            self.topup_threshold
        } else {
            DEFAULT_TOPUP_THRESHOLD
        }
    }
}
