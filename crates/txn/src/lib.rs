//! Multi-version transaction manager for ThemisDB
//!
//! Sessions issue `begin → read/write → commit | rollback`. A
//! transaction buffers every mutation (row puts, secondary-index
//! diffs, graph adjacency, vector mirrors, changefeed events) into
//! one write batch applied atomically at commit. Vector index updates
//! apply after the batch succeeds; if they fail, the saga log
//! compensates the already-applied state in LIFO order.
//!
//! Isolation levels:
//! - `ReadCommitted`: every read observes the latest committed value
//! - `Snapshot`: reads observe the begin-time snapshot; write-write
//!   conflicts abort the commit with `Conflict`

pub mod manager;
pub mod saga;
pub mod transaction;

pub use manager::{TransactionManager, TxStats};
pub use saga::{SagaLog, SagaOp};
pub use transaction::{IsolationLevel, Transaction, TxState, VectorOp};
