//! Bundled ordered in-memory engine
//!
//! Per-CF `BTreeMap`s behind a single `parking_lot::RwLock`, a global
//! commit version advanced once per batch, and `Arc`-shared values so
//! snapshots clone pointers instead of payloads.
//!
//! All writes, including single-key `put`/`delete`, funnel through
//! `batch_write`, which is the only place the version advances.

use crate::batch::{BatchOp, WriteBatch};
use crate::checkpoint::{self, CheckpointInfo};
use crate::engine::{Cf, KvEngine, PrefixIter};
use crate::snapshot::{CfMap, EngineSnapshot, StoredValue};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use themis_core::{Limits, Result};

struct Inner {
    cfs: [CfMap; 5],
    version: u64,
}

/// The bundled ordered key-value engine.
pub struct MemoryEngine {
    inner: RwLock<Inner>,
    limits: Limits,
}

impl MemoryEngine {
    /// Create an empty engine with default limits.
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    /// Create an empty engine with explicit limits.
    pub fn with_limits(limits: Limits) -> Self {
        MemoryEngine {
            inner: RwLock::new(Inner {
                cfs: Default::default(),
                version: 0,
            }),
            limits,
        }
    }

    /// Restore an engine from a checkpoint directory.
    ///
    /// Fails with `Corruption` when the manifest or any column-family
    /// file fails its checksum.
    pub fn open_checkpoint(dir: &Path) -> Result<Self> {
        Self::open_checkpoint_with_limits(dir, Limits::default())
    }

    /// Restore from a checkpoint with explicit limits.
    pub fn open_checkpoint_with_limits(dir: &Path, limits: Limits) -> Result<Self> {
        let (cfs, version) = checkpoint::load(dir)?;
        tracing::info!(version, dir = %dir.display(), "restored engine from checkpoint");
        Ok(MemoryEngine {
            inner: RwLock::new(Inner { cfs, version }),
            limits,
        })
    }

    /// Total number of live keys across all column families.
    pub fn key_count(&self) -> usize {
        let inner = self.inner.read();
        inner.cfs.iter().map(|cf| cf.len()).sum()
    }

    /// The limits this engine enforces.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl KvEngine for MemoryEngine {
    fn put(&self, cf: Cf, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(cf, key.to_vec(), value.to_vec());
        self.batch_write(batch)?;
        Ok(())
    }

    fn get(&self, cf: Cf, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.read();
        Ok(inner.cfs[cf.ordinal()].get(key).map(|v| v.data.to_vec()))
    }

    fn delete(&self, cf: Cf, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(cf, key.to_vec());
        self.batch_write(batch)?;
        Ok(())
    }

    fn batch_write(&self, batch: WriteBatch) -> Result<u64> {
        batch.validate(&self.limits)?;
        let mut inner = self.inner.write();
        if batch.is_empty() {
            return Ok(inner.version);
        }
        inner.version += 1;
        let version = inner.version;
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { cf, key, value } => {
                    inner.cfs[cf.ordinal()].insert(
                        key,
                        StoredValue {
                            data: Arc::from(value.into_boxed_slice()),
                            version,
                        },
                    );
                }
                BatchOp::Delete { cf, key } => {
                    inner.cfs[cf.ordinal()].remove(&key);
                }
            }
        }
        Ok(version)
    }

    fn iter_prefix(&self, cf: Cf, prefix: &[u8]) -> Result<PrefixIter> {
        let inner = self.inner.read();
        let items: Vec<(Vec<u8>, Vec<u8>)> = inner.cfs[cf.ordinal()]
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.data.to_vec()))
            .collect();
        Ok(PrefixIter::new(items))
    }

    fn snapshot(&self) -> EngineSnapshot {
        let inner = self.inner.read();
        EngineSnapshot::new(inner.version, inner.cfs.clone())
    }

    fn key_version(&self, cf: Cf, key: &[u8]) -> Result<Option<u64>> {
        let inner = self.inner.read();
        Ok(inner.cfs[cf.ordinal()].get(key).map(|v| v.version))
    }

    fn commit_version(&self) -> u64 {
        self.inner.read().version
    }

    fn create_checkpoint(&self, dir: &Path) -> Result<CheckpointInfo> {
        // Hold the read lock for the whole dump so the copy is consistent.
        let inner = self.inner.read();
        checkpoint::save(dir, &inner.cfs, inner.version)
    }
}
