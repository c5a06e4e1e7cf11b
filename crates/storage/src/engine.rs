//! The `KvEngine` contract
//!
//! An ordered key-value store with column families, atomic write
//! batches, snapshots, and checkpoints. The bundled implementation is
//! `MemoryEngine`; a persistent engine plugs in behind the same trait.
//!
//! Failure semantics: I/O failures surface as `Error::Io`, conflicts as
//! `Error::Conflict` (retriable), checkpoint inconsistencies as
//! `Error::Corruption` (fatal).

use crate::batch::WriteBatch;
use crate::checkpoint::CheckpointInfo;
use crate::snapshot::EngineSnapshot;
use std::path::Path;
use themis_core::Result;

/// Column families. Each is an independent ordered keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cf {
    /// Rows, documents, graph entities, vector mirrors, misc metadata
    Default,
    /// Secondary index entries and definitions
    Index,
    /// Graph adjacency records
    Graph,
    /// Content blobs, chunk records, hash reverse-lookups
    Content,
    /// Changefeed events and the sequence allocator
    Changefeed,
}

impl Cf {
    /// All column families, in stable order.
    pub const ALL: [Cf; 5] = [Cf::Default, Cf::Index, Cf::Graph, Cf::Content, Cf::Changefeed];

    /// Stable name, used in checkpoint file names and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Cf::Default => "default",
            Cf::Index => "index",
            Cf::Graph => "graph",
            Cf::Content => "content",
            Cf::Changefeed => "changefeed",
        }
    }

    /// Position in `ALL`, used for array-indexed CF storage.
    pub fn ordinal(&self) -> usize {
        match self {
            Cf::Default => 0,
            Cf::Index => 1,
            Cf::Graph => 2,
            Cf::Content => 3,
            Cf::Changefeed => 4,
        }
    }
}

/// Finite, ordered, non-restartable stream of `(key, value)` pairs.
///
/// The iterator owns its data; dropping it mid-stream discards the
/// remainder.
pub struct PrefixIter {
    items: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl PrefixIter {
    pub(crate) fn new(items: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        PrefixIter {
            items: items.into_iter(),
        }
    }

    /// Number of pairs remaining.
    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

impl Iterator for PrefixIter {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }
}

/// Ordered key-value engine with column families.
///
/// # Versions
///
/// Every committed mutation advances a global commit version; each key
/// remembers the version that last modified it. Transactions use
/// `key_version` for write-write conflict detection at commit.
pub trait KvEngine: Send + Sync {
    /// Write one key (single-op atomic batch).
    fn put(&self, cf: Cf, key: &[u8], value: &[u8]) -> Result<()>;

    /// Read one key.
    fn get(&self, cf: Cf, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Delete one key (single-op atomic batch). Deleting a missing key
    /// is a no-op.
    fn delete(&self, cf: Cf, key: &[u8]) -> Result<()>;

    /// Apply a batch atomically across column families. Returns the
    /// commit version assigned to the batch.
    fn batch_write(&self, batch: WriteBatch) -> Result<u64>;

    /// Iterate all pairs whose key starts with `prefix`, in key order.
    fn iter_prefix(&self, cf: Cf, prefix: &[u8]) -> Result<PrefixIter>;

    /// Point-in-time snapshot of all column families.
    fn snapshot(&self) -> EngineSnapshot;

    /// Version that last modified `key`, if present.
    fn key_version(&self, cf: Cf, key: &[u8]) -> Result<Option<u64>>;

    /// Current global commit version.
    fn commit_version(&self) -> u64;

    /// Write a consistent point-in-time copy of all column families
    /// into `dir`.
    fn create_checkpoint(&self, dir: &Path) -> Result<CheckpointInfo>;
}
