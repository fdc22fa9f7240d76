//! Node environment - On-disk layout of a node's data paths
//!
//! Each data path holds `nodes/0/` with a `node.lock` marker and the shard
//! directories under `indices/<index>/<shard>`.

use crate::error::{Result, StoreError};
use shardkeep_core::ShardId;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const NODE_LOCK_FILE: &str = "node.lock";

/// Data layout of the local node
#[derive(Debug, Clone)]
pub struct NodeEnvironment {
    /// `<data path>/nodes/0` for every configured data path
    node_paths: Vec<PathBuf>,
}

impl NodeEnvironment {
    /// Create the node directories under every data path
    pub fn open(data_paths: &[PathBuf]) -> Result<Self> {
        let mut node_paths = Vec::with_capacity(data_paths.len());

        for data_path in data_paths {
            let node_path = data_path.join("nodes").join("0");
            std::fs::create_dir_all(&node_path)?;

            let mut lock = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(node_path.join(NODE_LOCK_FILE))?;
            writeln!(lock, "{}", std::process::id())?;

            debug!("using node location {:?}", node_path);
            node_paths.push(node_path);
        }

        info!("node environment opened with {} data path(s)", node_paths.len());
        Ok(Self { node_paths })
    }

    /// A node that keeps no local data
    pub fn disabled() -> Self {
        Self {
            node_paths: Vec::new(),
        }
    }

    /// Whether the node's on-disk layout is initialized
    pub fn has_node_file(&self) -> bool {
        !self.node_paths.is_empty()
    }

    /// Node directories, one per data path
    pub fn node_paths(&self) -> &[PathBuf] {
        &self.node_paths
    }

    /// Directories of an index across all data paths
    pub fn index_locations(&self, index: &str) -> Result<Vec<PathBuf>> {
        validate_index_name(index)?;
        Ok(self
            .node_paths
            .iter()
            .map(|p| p.join("indices").join(index))
            .collect())
    }

    /// Directories of a shard across all data paths
    pub fn shard_locations(&self, shard_id: &ShardId) -> Result<Vec<PathBuf>> {
        Ok(self
            .index_locations(&shard_id.index)?
            .into_iter()
            .map(|p| p.join(shard_id.id.to_string()))
            .collect())
    }

    /// Whether any directory of the shard exists
    pub fn shard_exists(&self, shard_id: &ShardId) -> bool {
        self.shard_locations(shard_id)
            .map(|locations| locations.iter().any(|p| p.exists()))
            .unwrap_or(false)
    }

    /// Remove every path recursively. Missing paths are skipped; all paths
    /// are attempted and the first failure is returned.
    pub fn delete_recursively(&self, paths: &[PathBuf]) -> std::io::Result<()> {
        let mut first_error = None;
        for path in paths {
            if let Err(e) = remove_path(path) {
                debug!("failed to delete {:?}: {}", path, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn validate_index_name(index: &str) -> Result<()> {
    let invalid = index.is_empty()
        || index == "."
        || index == ".."
        || index.contains('/')
        || index.contains('\\')
        || index.contains('\0');
    if invalid {
        return Err(StoreError::InvalidIndexName(index.to_string()));
    }
    Ok(())
}
