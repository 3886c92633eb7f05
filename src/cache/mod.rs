//! Brusio feed cache subsystem.
//!
//! A single feed-shaped dataset in one ordered structure:
//!
//! - **Store**: sorted member → score container with range-by-rank reads and
//!   a coarse TTL
//! - **Warmer**: full warm and incremental top-up from the durable store,
//!   one in flight per cache name
//! - **Write-back**: synchronous cache removal paired with an outbox that
//!   retries the durable `read = true` update
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `brusio.toml`:
//!
//! ```toml
//! [cache]
//! warm_cap = 100
//! topup_threshold = 0.8
//! ttl_seconds = 60
//! # ... see config.rs for all options
//! ```

mod config;
pub mod cursor;
mod lock;
mod outbox;
mod store;
mod warmer;
mod writeback;

pub use config::CacheConfig;
pub use outbox::{DeadLetter, Outbox, OutboxWorker};
pub use store::{CacheEntry, CacheError, MemoryOrderedCache, OrderedCacheStore};
pub use warmer::{CacheWarmer, WarmError, WarmLease, WarmPermit};
pub use writeback::WritebackCoordinator;
