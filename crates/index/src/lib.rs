//! Derived indices for ThemisDB
//!
//! Two managers over the key-value engine:
//! - `SecondaryIndexManager`: composite `idx:` keys answering equality,
//!   range, and IN predicates with primary-key candidate sets
//! - `GraphIndexManager`: dual adjacency records with BFS and weighted
//!   traversal
//!
//! Both managers stage their mutations into the caller's `WriteBatch`,
//! so index maintenance commits atomically with the row mutation that
//! caused it.

pub mod encoding;
pub mod graph;
pub mod secondary;

pub use graph::{
    Direction, Edge, GraphIndexManager, Traversal, Visit, WeightedTraversal, WeightedVisit,
};
pub use secondary::SecondaryIndexManager;
