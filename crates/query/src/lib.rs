//! Query engine for ThemisDB
//!
//! An AQL-style subset over the multi-model storage:
//!
//! ```text
//! FOR doc IN users
//!   FILTER doc.age >= 21 && doc.city == "oslo"
//!   SORT doc.age DESC
//!   LIMIT 10
//!   RETURN doc.name
//!
//! FOR v, e, p IN 1..3 OUTBOUND "node-1" GRAPH "main"
//!   RETURN v
//! ```
//!
//! Pipeline: `lexer` → `parser` (AST) → `planner` (index access path
//! selection) → `executor`. Full-text relevance comes from the BM25
//! scorer in `fulltext`; `fusion` combines text and vector rankings
//! deterministically; `hybrid` couples vector k-NN with graph
//! expansion.

pub mod ast;
pub mod executor;
pub mod fulltext;
pub mod fusion;
pub mod hybrid;
pub mod lexer;
pub mod parser;
pub mod planner;

pub use executor::QueryEngine;
pub use fusion::{FusedHit, FusionMode, FusionRequest, TieBreak};
pub use hybrid::{HybridHit, HybridRequest, HybridSearch};
