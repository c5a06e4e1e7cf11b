//! Storage abstraction for ThemisDB
//!
//! This crate defines the ordered key-value contract every higher layer
//! builds on:
//! - `KvEngine`: get/put/delete, atomic multi-CF write batches, prefix
//!   iteration, point-in-time snapshots, checkpoints
//! - `Cf`: the fixed set of column families
//! - `WriteBatch`: ordered operations applied atomically
//! - `MemoryEngine`: the bundled ordered in-memory engine
//!
//! Managers (secondary index, graph, vector, content, changefeed) are
//! the only writers to their namespaces; the engine owns bytes and
//! versions.

pub mod batch;
pub mod checkpoint;
pub mod engine;
pub mod memory;
pub mod snapshot;

pub use batch::{BatchOp, WriteBatch};
pub use checkpoint::CheckpointInfo;
pub use engine::{Cf, KvEngine, PrefixIter};
pub use memory::MemoryEngine;
pub use snapshot::EngineSnapshot;
