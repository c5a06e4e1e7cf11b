//! Database facade for ThemisDB
//!
//! `Database` wires the storage engine, derived-index managers, the
//! vector index, the transaction manager, the changefeed, the content
//! pipeline, and the query engine behind one handle. It is `Send +
//! Sync`; share it via `Arc` and hand out stateless facades.

pub mod config;
pub mod database;

pub use config::{DatabaseConfig, IsolationDefault};
pub use database::Database;
