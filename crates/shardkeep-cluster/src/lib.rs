//! shardkeep cluster - Cluster state delivery for a storage node
//!
//! This crate provides:
//! - `ClusterService`: holds the latest cluster snapshot and delivers
//!   (previous, new) change events to registered listeners in order
//! - `RoutingConfig`: static routing description loaded from TOML, used to
//!   feed a node from a file instead of a live coordinator

pub mod config;
pub mod error;
pub mod service;

pub use config::{CopyConfig, IndexConfig, RoutingConfig, ShardGroupConfig};
pub use error::{ClusterError, Result};
pub use service::{ClusterService, ClusterStateListener};
