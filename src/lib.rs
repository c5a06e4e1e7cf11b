//! ThemisDB: a multi-model database
//!
//! Relational rows, documents, graph nodes/edges, and dense vectors
//! over one key-addressable storage substrate, with multi-version
//! transactions, a saga compensation log, an AQL-style query engine,
//! a durable changefeed, and hybrid (text × vector × graph) search.
//!
//! The crates compose bottom-up:
//!
//! - [`themis_core`]: errors, typed values, the entity codec, key
//!   schema
//! - [`themis_storage`]: the `KvEngine` contract and the bundled
//!   ordered in-memory engine with checkpoints
//! - [`themis_index`]: secondary indices and graph adjacency
//! - [`themis_vector`]: ANN namespaces (flat / HNSW)
//! - [`themis_txn`]: transactions, isolation, the saga log
//! - [`themis_changefeed`]: the CDC event log
//! - [`themis_content`]: blob ingestion and chunking
//! - [`themis_query`]: AQL parsing, planning, execution, fusion
//! - [`themis_engine`]: the `Database` facade
//!
//! # Example
//!
//! ```
//! use themisdb::{Database, Entity, Model, TypedValue};
//!
//! let db = Database::open().unwrap();
//! let mut row = Entity::new("acc-1");
//! row.set_field("balance", TypedValue::Int64(1000));
//! db.put_entity(Model::Relational, "accounts", &row).unwrap();
//!
//! let read = db.get_entity(Model::Relational, "accounts", "acc-1").unwrap();
//! assert!(read.is_some());
//! ```

pub use themis_changefeed::{ChangeEvent, EventType, ListOptions};
pub use themis_content::{ChunkSpec, ContentSpec, EdgeSpec, ImportResult};
pub use themis_core::keys::Model;
pub use themis_core::{Entity, Error, Limits, Result, RowFormat, TypedValue};
pub use themis_engine::{Database, DatabaseConfig, IsolationDefault};
pub use themis_index::{Direction, Edge};
pub use themis_query::{FusionMode, FusionRequest, HybridRequest, TieBreak};
pub use themis_txn::{IsolationLevel, TxStats};
pub use themis_vector::{AnnAlgorithm, DistanceMetric, Quantization, VectorConfig};
