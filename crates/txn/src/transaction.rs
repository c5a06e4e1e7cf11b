//! Transaction: buffered multi-subsystem mutations
//!
//! A transaction accumulates one `WriteBatch` covering rows, secondary
//! index diffs, graph adjacency, and vector mirrors, plus a list of
//! staged vector index operations and changefeed event drafts. Reads
//! implement read-your-writes through a local overlay.
//!
//! Commit sequence:
//! 1. take the changefeed publish guard (serializes validate → write)
//! 2. snapshot isolation: write-write conflict check per written key
//! 3. stage changefeed events (per-key in issue order, then TX_COMMIT)
//!    and the advanced sequence counter into the batch
//! 4. apply the batch atomically
//! 5. apply staged vector index ops; on failure run saga compensation
//!    and publish TX_ROLLBACK
//! 6. wake long-pollers, mark terminal

use crate::saga::{SagaLog, SagaOp};
use rustc_hash::FxHashSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use themis_changefeed::{Changefeed, EventDraft, EventType};
use themis_core::{keys, keys::Model, Entity, Error, Result, TypedValue};
use themis_index::{Edge, SecondaryIndexManager};
use themis_storage::{BatchOp, Cf, EngineSnapshot, KvEngine, WriteBatch};
use themis_vector::{DistanceMetric, VectorIndexManager};

/// Isolation level of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Reads observe the latest committed value at read time.
    ReadCommitted,
    /// Reads observe the begin-time snapshot; write-write conflicts
    /// fail the commit.
    #[default]
    Snapshot,
}

/// Lifecycle state. `Committed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    Aborted,
}

/// A staged vector index operation, applied after the KV batch.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorOp {
    Set {
        namespace: String,
        pk: String,
        embedding: Vec<f32>,
    },
    Remove {
        namespace: String,
        pk: String,
    },
}

/// Shared collaborators handed to every transaction.
#[derive(Clone)]
pub(crate) struct TxContext {
    pub engine: Arc<dyn KvEngine>,
    pub index: Arc<SecondaryIndexManager>,
    pub vectors: Arc<VectorIndexManager>,
    pub changefeed: Arc<Changefeed>,
}

pub struct Transaction {
    id: u64,
    isolation: IsolationLevel,
    state: TxState,
    started: Instant,
    deadline: Option<Instant>,
    snapshot: Option<EngineSnapshot>,
    batch: WriteBatch,
    /// Read-your-writes overlay: staged value per touched key.
    overlay: HashMap<(Cf, Vec<u8>), Option<Vec<u8>>>,
    /// Keys written by this transaction, for conflict detection.
    written: FxHashSet<(Cf, Vec<u8>)>,
    saga: SagaLog,
    drafts: Vec<EventDraft>,
    vector_ops: Vec<VectorOp>,
    ctx: TxContext,
}

impl Transaction {
    pub(crate) fn new(
        id: u64,
        isolation: IsolationLevel,
        deadline: Option<Instant>,
        ctx: TxContext,
    ) -> Self {
        let snapshot = match isolation {
            IsolationLevel::Snapshot => Some(ctx.engine.snapshot()),
            IsolationLevel::ReadCommitted => None,
        };
        Transaction {
            id,
            isolation,
            state: TxState::Active,
            started: Instant::now(),
            deadline,
            snapshot,
            batch: WriteBatch::new(),
            overlay: HashMap::new(),
            written: FxHashSet::default(),
            saga: SagaLog::new(),
            drafts: Vec::new(),
            vector_ops: Vec::new(),
            ctx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state != TxState::Active
    }

    pub fn duration_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Saga log (exposed for invariant tests).
    pub fn saga(&self) -> &SagaLog {
        &self.saga
    }

    fn ensure_active(&mut self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(Error::TxFinished(self.id));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                // Nothing has been applied yet, so there is nothing to
                // compensate; the transaction just dies.
                self.state = TxState::Aborted;
                return Err(Error::Cancelled(format!(
                    "transaction {} exceeded its deadline",
                    self.id
                )));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Raw read with read-your-writes: overlay, then snapshot (under
    /// `Snapshot`) or the latest committed state.
    fn read_raw(&self, cf: Cf, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = self.overlay.get(&(cf, key.to_vec())) {
            return Ok(staged.clone());
        }
        match &self.snapshot {
            Some(snapshot) => Ok(snapshot.get(cf, key)),
            None => self.ctx.engine.get(cf, key),
        }
    }

    /// Read an entity in this transaction's view.
    pub fn get_entity(&self, model: Model, container: &str, pk: &str) -> Result<Option<Entity>> {
        let key = model.row_key(container, pk)?;
        match self.read_raw(Cf::Default, &key)? {
            Some(bytes) => Ok(Some(Entity::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Staging
    // ========================================================================

    /// Move `ops` into the transaction batch, capturing a reverse op
    /// and updating the overlay for each.
    fn stage_ops(&mut self, ops: WriteBatch) -> Result<()> {
        for op in ops.into_ops() {
            let cf = op.cf();
            let key = op.key().to_vec();
            let prior = self.read_raw(cf, &key)?;
            self.saga.push(SagaOp::RestoreKey {
                cf,
                key: key.clone(),
                prior,
            });
            match op {
                BatchOp::Put { cf, key, value } => {
                    self.overlay.insert((cf, key.clone()), Some(value.clone()));
                    self.batch.put(cf, key, value);
                }
                BatchOp::Delete { cf, key } => {
                    self.overlay.insert((cf, key.clone()), None);
                    self.batch.delete(cf, key);
                }
            }
            self.written.insert((cf, key));
        }
        Ok(())
    }

    /// Write a row, maintaining secondary indices in the same batch.
    pub fn put_entity(&mut self, model: Model, container: &str, entity: &Entity) -> Result<()> {
        self.ensure_active()?;
        let key = model.row_key(container, entity.pk())?;
        let old_row = match self.read_raw(Cf::Default, &key)? {
            Some(bytes) => Some(Entity::from_bytes(&bytes)?),
            None => None,
        };

        let mut ops = WriteBatch::new();
        ops.put(Cf::Default, key.clone(), entity.encode()?);
        if model == Model::Relational {
            self.ctx
                .index
                .stage_on_put(&mut ops, container, entity, old_row.as_ref())?;
        }
        self.stage_ops(ops)?;

        self.drafts.push(
            EventDraft::new(EventType::Put, String::from_utf8_lossy(&key).into_owned())
                .with_value(TypedValue::Object(entity.fields().clone()).to_json())
                .with_metadata("model", model.name()),
        );
        Ok(())
    }

    /// Delete a row and its index entries. Returns the old row.
    pub fn erase_entity(&mut self, model: Model, container: &str, pk: &str) -> Result<Entity> {
        self.ensure_active()?;
        let key = model.row_key(container, pk)?;
        let old_row = match self.read_raw(Cf::Default, &key)? {
            Some(bytes) => Entity::from_bytes(&bytes)?,
            None => {
                return Err(Error::NotFound(String::from_utf8_lossy(&key).into_owned()))
            }
        };

        let mut ops = WriteBatch::new();
        ops.delete(Cf::Default, key.clone());
        if model == Model::Relational {
            self.ctx.index.stage_on_delete(&mut ops, container, &old_row)?;
        }
        self.stage_ops(ops)?;

        self.drafts.push(
            EventDraft::new(EventType::Delete, String::from_utf8_lossy(&key).into_owned())
                .with_metadata("model", model.name()),
        );
        Ok(old_row)
    }

    /// Insert an edge: record plus both adjacency keys, one batch.
    /// Re-adding an existing edge pk replaces it (stale adjacency is
    /// removed when the endpoints changed).
    pub fn add_edge(&mut self, edge: &Edge) -> Result<()> {
        self.ensure_active()?;
        let edge_key = keys::graph_edge(&edge.edge_pk)?;
        let old_edge: Option<Edge> = match self.read_raw(Cf::Graph, &edge_key)? {
            Some(bytes) => Some(serde_json::from_slice(&bytes)?),
            None => None,
        };

        let mut ops = WriteBatch::new();
        if let Some(old) = &old_edge {
            if old.from_pk != edge.from_pk || old.to_pk != edge.to_pk {
                ops.delete(Cf::Graph, keys::graph_out(&old.from_pk, &old.edge_pk)?);
                ops.delete(Cf::Graph, keys::graph_in(&old.to_pk, &old.edge_pk)?);
            }
        }
        ops.put(Cf::Graph, edge_key.clone(), serde_json::to_vec(edge)?);
        ops.put(Cf::Graph, keys::graph_out(&edge.from_pk, &edge.edge_pk)?, Vec::new());
        ops.put(Cf::Graph, keys::graph_in(&edge.to_pk, &edge.edge_pk)?, Vec::new());
        self.stage_ops(ops)?;

        self.drafts.push(
            EventDraft::new(EventType::Put, String::from_utf8_lossy(&edge_key).into_owned())
                .with_value(serde_json::to_value(edge)?)
                .with_metadata("model", "graph"),
        );
        Ok(())
    }

    /// Delete an edge and its adjacency keys. Returns the old edge.
    pub fn delete_edge(&mut self, edge_pk: &str) -> Result<Edge> {
        self.ensure_active()?;
        let edge_key = keys::graph_edge(edge_pk)?;
        let edge: Edge = match self.read_raw(Cf::Graph, &edge_key)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => {
                return Err(Error::NotFound(String::from_utf8_lossy(&edge_key).into_owned()))
            }
        };

        let mut ops = WriteBatch::new();
        ops.delete(Cf::Graph, edge_key.clone());
        ops.delete(Cf::Graph, keys::graph_out(&edge.from_pk, edge_pk)?);
        ops.delete(Cf::Graph, keys::graph_in(&edge.to_pk, edge_pk)?);
        self.stage_ops(ops)?;

        self.drafts.push(
            EventDraft::new(EventType::Delete, String::from_utf8_lossy(&edge_key).into_owned())
                .with_metadata("model", "graph"),
        );
        Ok(edge)
    }

    /// Write a graph node's field map at `graph:node:<pk>`.
    pub fn put_node(&mut self, entity: &Entity) -> Result<()> {
        self.ensure_active()?;
        let key = keys::graph_node(entity.pk())?;
        let mut ops = WriteBatch::new();
        ops.put(Cf::Graph, key.clone(), entity.encode()?);
        self.stage_ops(ops)?;
        self.drafts.push(
            EventDraft::new(EventType::Put, String::from_utf8_lossy(&key).into_owned())
                .with_value(TypedValue::Object(entity.fields().clone()).to_json())
                .with_metadata("model", "graph"),
        );
        Ok(())
    }

    /// Delete a graph node record. Edges referencing the node are the
    /// caller's responsibility; adjacency is not reference-counted.
    pub fn erase_node(&mut self, pk: &str) -> Result<Entity> {
        self.ensure_active()?;
        let key = keys::graph_node(pk)?;
        let old = match self.read_raw(Cf::Graph, &key)? {
            Some(bytes) => Entity::from_bytes(&bytes)?,
            None => return Err(Error::NotFound(String::from_utf8_lossy(&key).into_owned())),
        };
        let mut ops = WriteBatch::new();
        ops.delete(Cf::Graph, key.clone());
        self.stage_ops(ops)?;
        self.drafts.push(
            EventDraft::new(EventType::Delete, String::from_utf8_lossy(&key).into_owned())
                .with_metadata("model", "graph"),
        );
        Ok(old)
    }

    /// Current embedding mirrored for `(namespace, pk)` in this view.
    fn mirror_embedding(&self, namespace: &str, pk: &str) -> Result<Option<Vec<f32>>> {
        let key = keys::vector(namespace, pk)?;
        match self.read_raw(Cf::Default, &key)? {
            Some(bytes) => match themis_core::codec::decode(&bytes)? {
                TypedValue::VectorFloat(v) => Ok(Some(v)),
                other => Err(Error::Corruption(format!(
                    "vector mirror holds {}, not vector<f32>",
                    other.type_name()
                ))),
            },
            None => Ok(None),
        }
    }

    /// Stage a vector upsert: KV mirror in the batch, index op applied
    /// after commit. Dimension and zero-vector problems surface now,
    /// not mid-commit.
    pub fn add_vector(&mut self, namespace: &str, pk: &str, embedding: Vec<f32>) -> Result<()> {
        self.ensure_active()?;
        let config = self.ctx.vectors.config_of(namespace)?;
        if embedding.len() != config.dim {
            return Err(Error::DimensionMismatch {
                expected: config.dim,
                actual: embedding.len(),
            });
        }
        if config.metric == DistanceMetric::Cosine
            && embedding.iter().all(|x| x.abs() <= f32::EPSILON)
        {
            return Err(Error::InvalidArgument(
                "zero vector has no direction under cosine".to_string(),
            ));
        }

        let prior = self.mirror_embedding(namespace, pk)?;
        self.saga.push(SagaOp::RestoreVector {
            namespace: namespace.to_string(),
            pk: pk.to_string(),
            prior,
        });

        let key = keys::vector(namespace, pk)?;
        let mut ops = WriteBatch::new();
        ops.put(
            Cf::Default,
            key.clone(),
            themis_core::codec::encode(&TypedValue::VectorFloat(embedding.clone())),
        );
        self.stage_ops(ops)?;

        self.vector_ops.push(VectorOp::Set {
            namespace: namespace.to_string(),
            pk: pk.to_string(),
            embedding,
        });
        self.drafts.push(
            EventDraft::new(EventType::Put, String::from_utf8_lossy(&key).into_owned())
                .with_metadata("model", "vector"),
        );
        Ok(())
    }

    /// Stage a vector upsert from an entity field (default
    /// `"embedding"`).
    pub fn add_entity_vector(
        &mut self,
        namespace: &str,
        entity: &Entity,
        field: &str,
    ) -> Result<()> {
        let embedding = entity.field_as_f32_vector(field)?;
        self.add_vector(namespace, entity.pk(), embedding)
    }

    /// Equivalent to remove + add.
    pub fn update_vector(&mut self, namespace: &str, pk: &str, embedding: Vec<f32>) -> Result<()> {
        self.add_vector(namespace, pk, embedding)
    }

    /// Stage a vector removal (mirror delete + index tombstone).
    pub fn remove_vector(&mut self, namespace: &str, pk: &str) -> Result<()> {
        self.ensure_active()?;
        let prior = self.mirror_embedding(namespace, pk)?;
        self.saga.push(SagaOp::RestoreVector {
            namespace: namespace.to_string(),
            pk: pk.to_string(),
            prior,
        });

        let key = keys::vector(namespace, pk)?;
        let mut ops = WriteBatch::new();
        ops.delete(Cf::Default, key.clone());
        self.stage_ops(ops)?;

        self.vector_ops.push(VectorOp::Remove {
            namespace: namespace.to_string(),
            pk: pk.to_string(),
        });
        self.drafts.push(
            EventDraft::new(EventType::Delete, String::from_utf8_lossy(&key).into_owned())
                .with_metadata("model", "vector"),
        );
        Ok(())
    }

    // ========================================================================
    // Termination
    // ========================================================================

    /// Write-write conflict check: every key this transaction wrote
    /// must be unchanged since the snapshot.
    fn check_conflicts(&self, snapshot: &EngineSnapshot) -> Result<()> {
        for (cf, key) in &self.written {
            let current = self.ctx.engine.key_version(*cf, key)?;
            let conflict = match current {
                Some(version) => version > snapshot.version(),
                // Key gone now but present in our snapshot: someone
                // deleted it after we began.
                None => snapshot.contains(*cf, key),
            };
            if conflict {
                return Err(Error::Conflict(format!(
                    "write-write conflict on {}",
                    String::from_utf8_lossy(key)
                )));
            }
        }
        Ok(())
    }

    /// Commit. Returns the engine commit version (0 for a read-only
    /// transaction).
    pub fn commit(&mut self) -> Result<u64> {
        self.ensure_active()?;

        if self.batch.is_empty() && self.vector_ops.is_empty() {
            self.state = TxState::Committed;
            return Ok(0);
        }

        let changefeed = self.ctx.changefeed.clone();
        let guard = changefeed.publish_guard();

        if let Some(snapshot) = &self.snapshot {
            if let Err(e) = self.check_conflicts(snapshot) {
                drop(guard);
                // Nothing was applied: abort without compensation.
                self.state = TxState::Aborted;
                return Err(e);
            }
        }

        let mut batch = std::mem::take(&mut self.batch);
        let mut drafts = std::mem::take(&mut self.drafts);
        drafts.push(
            EventDraft::new(EventType::TxCommit, format!("tx:{}", self.id))
                .with_metadata("tx_id", self.id.to_string()),
        );
        let (_, last_seq) = match changefeed.stage(&mut batch, drafts) {
            Ok(range) => range,
            Err(e) => {
                drop(guard);
                self.state = TxState::Aborted;
                return Err(e);
            }
        };

        let version = match self.ctx.engine.batch_write(batch) {
            Ok(version) => version,
            Err(e) => {
                drop(guard);
                // Atomic batch: nothing applied, nothing to compensate.
                self.state = TxState::Aborted;
                return Err(e);
            }
        };

        // KV state is applied; vector index updates follow. A failure
        // here is the one case the saga exists for.
        for op in std::mem::take(&mut self.vector_ops) {
            let outcome = match &op {
                VectorOp::Set {
                    namespace,
                    pk,
                    embedding,
                } => self.ctx.vectors.update(namespace, pk, embedding.clone()),
                VectorOp::Remove { namespace, pk } => {
                    self.ctx.vectors.remove(namespace, pk).map(|_| ())
                }
            };
            if let Err(e) = outcome {
                tracing::error!(
                    tx_id = self.id,
                    error = %e,
                    "vector apply failed after commit; compensating"
                );
                if let Err(comp_err) = self.saga.compensate(&self.ctx.engine, &self.ctx.vectors) {
                    tracing::error!(tx_id = self.id, error = %comp_err, "saga compensation incomplete");
                }
                // Publish the rollback marker inside the same guard.
                let mut rollback_batch = WriteBatch::new();
                let rollback_draft =
                    EventDraft::new(EventType::TxRollback, format!("tx:{}", self.id))
                        .with_metadata("tx_id", self.id.to_string())
                        .with_metadata("reason", "vector apply failed");
                if let Ok((_, seq)) = changefeed.stage(&mut rollback_batch, vec![rollback_draft]) {
                    if self.ctx.engine.batch_write(rollback_batch).is_ok() {
                        changefeed.notify_published(seq);
                    }
                }
                drop(guard);
                self.state = TxState::Aborted;
                return Err(e);
            }
        }

        drop(guard);
        changefeed.notify_published(last_seq);
        self.state = TxState::Committed;
        tracing::debug!(tx_id = self.id, version, "transaction committed");
        Ok(version)
    }

    /// Roll back: drop the batch and publish a TX_ROLLBACK marker.
    /// Nothing was applied, so the saga has nothing to undo; reverse
    /// ops only run when a commit fails after the batch was applied.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        let had_mutations = !self.batch.is_empty() || !self.vector_ops.is_empty();
        self.batch = WriteBatch::new();
        self.vector_ops.clear();
        self.drafts.clear();
        self.overlay.clear();
        self.state = TxState::Aborted;
        if had_mutations {
            self.ctx.changefeed.append_standalone(vec![EventDraft::new(
                EventType::TxRollback,
                format!("tx:{}", self.id),
            )
            .with_metadata("tx_id", self.id.to_string())])?;
        }
        tracing::debug!(tx_id = self.id, "transaction rolled back");
        Ok(())
    }
}
