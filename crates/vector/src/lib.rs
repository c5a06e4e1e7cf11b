//! Vector index (ANN) for ThemisDB
//!
//! Named namespaces (e.g. `"chunks"`), each an approximate
//! nearest-neighbor index with a fixed dimension and metric:
//!
//! - algorithms: `flat` (exhaustive) or `hnsw` (graph-based), behind
//!   one backend trait
//! - metrics: cosine (stored vectors pre-normalized, distances in
//!   `[0, 2]`) or L2
//! - optional scalar 8-bit quantization for the flat scan path
//! - persistence per namespace: `meta.txt`, `labels.txt`, `index.bin`,
//!   plus `rebuild_from_storage` as the recovery of last resort
//!
//! Determinism: results are ordered by ascending distance, ties by
//! ascending pk, for both algorithms.

pub mod backend;
pub mod distance;
pub mod flat;
pub mod hnsw;
pub mod manager;
pub mod namespace;
pub mod persistence;
pub mod quantization;
pub mod types;

pub use manager::VectorIndexManager;
pub use types::{AnnAlgorithm, DistanceMetric, Quantization, SearchHit, VectorConfig};
