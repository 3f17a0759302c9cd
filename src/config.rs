//! Database configuration. Loading from files or the environment is a
//! transport concern; the core only defines the struct and defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::vector::VECTOR_DIMENSION;
use crate::vector::HnswConfig;

/// Log tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Batched-fsync window: appends within this window share a sync.
    pub fsync_window_ms: u64,
    /// Append latency above this refuses new writes with Backpressure.
    pub backpressure_high_watermark_ms: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            fsync_window_ms: 1,
            backpressure_high_watermark_ms: 250,
        }
    }
}

/// Top-level configuration for [`crate::db::Database`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Data directory: holds the log, snapshots, and content files.
    pub data_path: PathBuf,
    /// Trigger a snapshot after this many writes since the last one.
    /// Zero disables automatic snapshots.
    pub auto_snapshot_interval: u64,
    /// When false, snapshots are ignored on open and the indices are
    /// rebuilt from a full log replay.
    pub enable_persistent_indexes: bool,
    /// Fixed at 128 in this version; validated on open.
    pub vector_dimension: usize,
    pub hnsw: HnswConfig,
    pub log: LogConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("memora-data"),
            auto_snapshot_interval: 0,
            enable_persistent_indexes: true,
            vector_dimension: VECTOR_DIMENSION,
            hnsw: HnswConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// Default configuration rooted at `data_path`.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            ..Self::default()
        }
    }
}
