//! shardkeep store - Local shard cleanup and store I/O throttling
//!
//! This crate provides the node-local side of shard lifecycle management:
//! - `NodeEnvironment`: on-disk layout of the node's data paths
//! - `IndicesService` / `IndexService` / `IndexStore`: indices opened on
//!   this node and their store-level delete operations
//! - `ShardReaper`: deletes shard data no longer routed to this node once
//!   every copy elsewhere has started
//! - `StoreRateLimiting` / `RateLimiter`: shared throttle read on every
//!   store write
//! - `ThrottleController`: applies `store.throttle.*` settings refreshes
//! - `IndicesStore`: owns the reaper and controller and their subscriptions

pub mod env;
pub mod error;
pub mod indices;
pub mod indices_store;
pub mod rate_limit;
pub mod reaper;
pub mod throttle;

pub use env::NodeEnvironment;
pub use error::{Result, StoreError};
pub use indices::{FsIndexStore, IndexService, IndexStore, IndicesService, LocalIndexService};
pub use indices_store::IndicesStore;
pub use rate_limit::{IoKind, RateLimitConfig, RateLimitMode, RateLimiter, StoreRateLimiting};
pub use reaper::{shard_can_be_deleted, ReapReport, ShardDeletionFailure, ShardReaper, SkipReason};
pub use throttle::{ThrottleController, ThrottleUpdate, THROTTLE_MAX_BYTES_PER_SEC, THROTTLE_TYPE};
