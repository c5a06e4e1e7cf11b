//! Transaction manager: registry, lifecycle, statistics, janitor

use crate::transaction::{IsolationLevel, Transaction, TxContext, TxState};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use themis_changefeed::Changefeed;
use themis_core::{Error, Result};
use themis_index::SecondaryIndexManager;
use themis_storage::KvEngine;
use themis_vector::VectorIndexManager;

/// Transaction counters and durations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxStats {
    pub begun: u64,
    pub committed: u64,
    pub aborted: u64,
    pub active: u64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: u64,
}

#[derive(Debug, Clone)]
struct CompletedTx {
    id: u64,
    outcome: TxState,
    finished_at: Instant,
}

/// Coordinates sessions: `begin → operate → commit | rollback`.
///
/// Short mutex critical sections only: the registry maps ids to
/// `Arc<Mutex<Transaction>>`, and callers lock one transaction at a
/// time. Commit serialization happens inside `Transaction::commit`
/// via the changefeed publish guard.
pub struct TransactionManager {
    ctx: TxContext,
    active: DashMap<u64, Arc<Mutex<Transaction>>>,
    completed: Mutex<VecDeque<CompletedTx>>,
    next_id: AtomicU64,
    begun: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    duration_total_ms: AtomicU64,
    duration_count: AtomicU64,
    duration_max_ms: AtomicU64,
    default_isolation: IsolationLevel,
}

impl TransactionManager {
    pub fn new(
        engine: Arc<dyn KvEngine>,
        index: Arc<SecondaryIndexManager>,
        vectors: Arc<VectorIndexManager>,
        changefeed: Arc<Changefeed>,
        default_isolation: IsolationLevel,
    ) -> Self {
        TransactionManager {
            ctx: TxContext {
                engine,
                index,
                vectors,
                changefeed,
            },
            active: DashMap::new(),
            completed: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            begun: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            duration_total_ms: AtomicU64::new(0),
            duration_count: AtomicU64::new(0),
            duration_max_ms: AtomicU64::new(0),
            default_isolation,
        }
    }

    /// Begin a transaction at the default isolation level.
    pub fn begin_default(&self) -> u64 {
        self.begin(self.default_isolation, None)
    }

    /// Begin a transaction. `timeout` becomes a deadline; operations
    /// after expiry fail with `Cancelled` and abort the transaction.
    pub fn begin(&self, isolation: IsolationLevel, timeout: Option<Duration>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let deadline = timeout.map(|t| Instant::now() + t);
        let txn = Transaction::new(id, isolation, deadline, self.ctx.clone());
        self.active.insert(id, Arc::new(Mutex::new(txn)));
        self.begun.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(tx_id = id, ?isolation, "transaction begun");
        id
    }

    fn lookup(&self, id: u64) -> Result<Arc<Mutex<Transaction>>> {
        if let Some(entry) = self.active.get(&id) {
            return Ok(entry.value().clone());
        }
        let completed = self.completed.lock();
        if completed.iter().any(|c| c.id == id) {
            return Err(Error::TxFinished(id));
        }
        Err(Error::NotFound(format!("transaction {id}")))
    }

    /// Run `f` against an active transaction.
    pub fn with_txn<R>(&self, id: u64, f: impl FnOnce(&mut Transaction) -> Result<R>) -> Result<R> {
        let txn = self.lookup(id)?;
        let mut guard = txn.lock();
        f(&mut guard)
    }

    /// True when the transaction reached a terminal state.
    pub fn is_finished(&self, id: u64) -> Result<bool> {
        if let Some(entry) = self.active.get(&id) {
            return Ok(entry.value().lock().is_finished());
        }
        let completed = self.completed.lock();
        if completed.iter().any(|c| c.id == id) {
            return Ok(true);
        }
        Err(Error::NotFound(format!("transaction {id}")))
    }

    fn finish(&self, id: u64, txn: &Transaction) {
        let outcome = txn.state();
        let duration = txn.duration_ms();
        self.active.remove(&id);
        self.completed.lock().push_back(CompletedTx {
            id,
            outcome,
            finished_at: Instant::now(),
        });
        match outcome {
            TxState::Committed => {
                self.committed.fetch_add(1, Ordering::Relaxed);
            }
            TxState::Aborted => {
                self.aborted.fetch_add(1, Ordering::Relaxed);
            }
            TxState::Active => unreachable!("finish on an active transaction"),
        }
        self.duration_total_ms.fetch_add(duration, Ordering::Relaxed);
        self.duration_count.fetch_add(1, Ordering::Relaxed);
        self.duration_max_ms.fetch_max(duration, Ordering::Relaxed);
    }

    /// Commit. On `Conflict` the transaction is already aborted and
    /// the caller may retry with a fresh `begin`.
    pub fn commit(&self, id: u64) -> Result<u64> {
        let txn = self.lookup(id)?;
        let mut guard = txn.lock();
        let result = guard.commit();
        if guard.is_finished() {
            self.finish(id, &guard);
        }
        result
    }

    /// Roll back an active transaction.
    pub fn rollback(&self, id: u64) -> Result<()> {
        let txn = self.lookup(id)?;
        let mut guard = txn.lock();
        let result = guard.rollback();
        if guard.is_finished() {
            self.finish(id, &guard);
        }
        result
    }

    /// Current statistics.
    pub fn stats(&self) -> TxStats {
        let count = self.duration_count.load(Ordering::Relaxed);
        let total = self.duration_total_ms.load(Ordering::Relaxed);
        TxStats {
            begun: self.begun.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            active: self.active.len() as u64,
            avg_duration_ms: if count == 0 {
                0.0
            } else {
                total as f64 / count as f64
            },
            max_duration_ms: self.duration_max_ms.load(Ordering::Relaxed),
        }
    }

    /// Janitor: drop completed records older than `age`. Returns the
    /// number evicted.
    pub fn evict_completed(&self, age: Duration) -> usize {
        let cutoff = Instant::now() - age;
        let mut completed = self.completed.lock();
        let before = completed.len();
        completed.retain(|c| c.finished_at > cutoff);
        let evicted = before - completed.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted completed transactions");
        }
        evicted
    }
}
