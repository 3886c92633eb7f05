//! Brusio serves a paginated activity feed (likes, comments, follows) from an
//! in-memory ordered cache instead of hitting the durable store on every read.
//!
//! The cache is warmed from Postgres at startup and topped up incrementally as
//! readers approach the end of the cached window. Marking an item as read
//! removes it from the cache synchronously and propagates the flag to the
//! durable store through a retrying outbox.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
