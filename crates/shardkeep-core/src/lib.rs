//! shardkeep core - Shared types for the shard lifecycle collector
//!
//! This crate provides the data model every other shardkeep crate reads:
//! - `ShardId`: stable (index, ordinal) identity of a shard
//! - `ShardRouting`: one copy of a shard and its lifecycle state
//! - `IndexShardRoutingTable` / `IndexRoutingTable` / `RoutingTable`: the
//!   cluster-wide assignment of copies to nodes
//! - `ClusterState` and `ClusterChangedEvent`: immutable snapshots and the
//!   (previous, new) pairs delivered on every cluster change
//! - `ByteSizeValue`: human-readable byte quantities ("10mb", "0")
//! - `ListenerRegistry`: subscribe/cancel plumbing for notification sources

pub mod bytes;
pub mod error;
pub mod listeners;
pub mod types;

pub use bytes::ByteSizeValue;
pub use error::{CoreError, Result};
pub use listeners::{ListenerRegistry, Subscription};
pub use types::*;
