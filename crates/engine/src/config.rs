//! Database configuration
//!
//! Serde-loadable, with defaults for every field, so a config file can
//! specify only what it changes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use themis_core::Limits;
use themis_txn::IsolationLevel;

/// Default isolation level as a config value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationDefault {
    #[default]
    Snapshot,
    ReadCommitted,
}

impl From<IsolationDefault> for IsolationLevel {
    fn from(value: IsolationDefault) -> Self {
        match value {
            IsolationDefault::Snapshot => IsolationLevel::Snapshot,
            IsolationDefault::ReadCommitted => IsolationLevel::ReadCommitted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Checkpoint directory: restored on open when it holds one,
    /// target of `create_checkpoint` otherwise. `None` means purely
    /// in-memory.
    pub data_dir: Option<PathBuf>,
    /// Root directory for vector namespace artifacts.
    pub vector_save_path: Option<PathBuf>,
    /// zstd level for the content pipeline.
    pub compression_level: i32,
    /// Mime prefixes that skip compression.
    pub compression_skip_mimes: Vec<String>,
    /// Content chunk size in bytes (clamped to 64 KiB–16 MiB).
    pub chunk_size_bytes: usize,
    pub default_isolation: IsolationDefault,
    /// Changefeed retention window in seconds.
    pub changefeed_keep_for_secs: u64,
    /// Completed-transaction eviction age in seconds.
    pub janitor_age_secs: u64,
    pub limits: Limits,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            data_dir: None,
            vector_save_path: None,
            compression_level: 3,
            compression_skip_mimes: vec![
                "image/".to_string(),
                "video/".to_string(),
                "application/zip".to_string(),
                "application/gzip".to_string(),
            ],
            chunk_size_bytes: 256 * 1024,
            default_isolation: IsolationDefault::Snapshot,
            changefeed_keep_for_secs: 24 * 3600,
            janitor_age_secs: 3600,
            limits: Limits::default(),
        }
    }
}
