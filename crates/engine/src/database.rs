//! The `Database` handle

use crate::config::DatabaseConfig;
use rustc_hash::FxHashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use themis_changefeed::{ChangeEvent, Changefeed, ListOptions, RetentionPolicy};
use themis_content::{ContentConfig, ContentMeta, ContentPipeline, ContentSpec, ImportResult};
use themis_core::{keys::Model, Entity, Result, TypedValue};
use themis_index::{GraphIndexManager, SecondaryIndexManager};
use themis_query::{FusedHit, FusionRequest, HybridHit, HybridRequest, HybridSearch, QueryEngine};
use themis_storage::{CheckpointInfo, Cf, KvEngine, MemoryEngine};
use themis_txn::{IsolationLevel, Transaction, TransactionManager, TxStats};
use themis_vector::{SearchHit, VectorConfig, VectorIndexManager};

/// One handle over every subsystem.
pub struct Database {
    config: DatabaseConfig,
    engine: Arc<dyn KvEngine>,
    index: Arc<SecondaryIndexManager>,
    graph: Arc<GraphIndexManager>,
    vectors: Arc<VectorIndexManager>,
    changefeed: Arc<Changefeed>,
    transactions: TransactionManager,
    content: ContentPipeline,
    query: QueryEngine,
    hybrid: HybridSearch,
}

impl Database {
    /// Open with defaults (in-memory, snapshot isolation).
    pub fn open() -> Result<Database> {
        Self::open_with(DatabaseConfig::default())
    }

    /// Open with an explicit configuration. When `data_dir` holds a
    /// checkpoint, state is restored from it.
    pub fn open_with(config: DatabaseConfig) -> Result<Database> {
        let memory = match &config.data_dir {
            Some(dir) if dir.join("MANIFEST.json").exists() => {
                MemoryEngine::open_checkpoint_with_limits(dir, config.limits.clone())?
            }
            _ => MemoryEngine::with_limits(config.limits.clone()),
        };
        let engine: Arc<dyn KvEngine> = Arc::new(memory);

        let index = Arc::new(SecondaryIndexManager::new(engine.clone()));
        index.rebuild_stats()?;
        let graph = Arc::new(GraphIndexManager::with_limits(
            engine.clone(),
            config.limits.clone(),
        ));
        let vectors = Arc::new(VectorIndexManager::new());
        let changefeed = Arc::new(Changefeed::new(engine.clone())?);
        let transactions = TransactionManager::new(
            engine.clone(),
            index.clone(),
            vectors.clone(),
            changefeed.clone(),
            config.default_isolation.into(),
        );
        let content = ContentPipeline::new(
            engine.clone(),
            vectors.clone(),
            graph.clone(),
            ContentConfig {
                compression_level: config.compression_level,
                skip_mimes: config.compression_skip_mimes.clone(),
                min_compress_size: 4096,
                chunk_size_bytes: config.chunk_size_bytes,
            },
        );
        let query = QueryEngine::new(engine.clone(), index.clone(), graph.clone());
        let hybrid = HybridSearch::new(vectors.clone(), graph.clone());

        tracing::info!(
            restored = engine.commit_version() > 0,
            "database opened"
        );
        Ok(Database {
            config,
            engine,
            index,
            graph,
            vectors,
            changefeed,
            transactions,
            content,
            query,
            hybrid,
        })
    }

    // ========================================================================
    // Subsystem access
    // ========================================================================

    pub fn engine(&self) -> &Arc<dyn KvEngine> {
        &self.engine
    }

    pub fn secondary_index(&self) -> &SecondaryIndexManager {
        &self.index
    }

    pub fn graph(&self) -> &GraphIndexManager {
        &self.graph
    }

    pub fn vectors(&self) -> &VectorIndexManager {
        &self.vectors
    }

    pub fn changefeed(&self) -> &Changefeed {
        &self.changefeed
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn content(&self) -> &ContentPipeline {
        &self.content
    }

    // ========================================================================
    // Entities (auto-commit convenience)
    // ========================================================================

    /// Upsert an entity in its own transaction.
    pub fn put_entity(&self, model: Model, container: &str, entity: &Entity) -> Result<()> {
        self.autocommit(|txn| txn.put_entity(model, container, entity))
    }

    /// Read an entity from the latest committed state.
    pub fn get_entity(&self, model: Model, container: &str, pk: &str) -> Result<Option<Entity>> {
        let key = model.row_key(container, pk)?;
        match self.engine.get(Cf::Default, &key)? {
            Some(bytes) => Ok(Some(Entity::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Erase an entity in its own transaction. Returns the old row.
    pub fn erase_entity(&self, model: Model, container: &str, pk: &str) -> Result<Entity> {
        self.autocommit(|txn| txn.erase_entity(model, container, pk))
    }

    /// Create a secondary index (backfills existing rows).
    pub fn create_index(&self, table: &str, column: &str) -> Result<()> {
        self.index.create_index(table, column)
    }

    fn autocommit<R>(&self, f: impl FnOnce(&mut Transaction) -> Result<R>) -> Result<R> {
        let id = self.transactions.begin_default();
        match self.transactions.with_txn(id, f) {
            Ok(result) => {
                self.transactions.commit(id)?;
                Ok(result)
            }
            Err(e) => {
                let _ = self.transactions.rollback(id);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a transaction; operate through
    /// `transactions().with_txn(id, ..)`, then `commit`/`rollback`.
    pub fn begin(&self, isolation: Option<IsolationLevel>, timeout: Option<Duration>) -> u64 {
        match isolation {
            Some(level) => self.transactions.begin(level, timeout),
            None => self.transactions.begin_default(),
        }
    }

    pub fn commit(&self, tx_id: u64) -> Result<u64> {
        self.transactions.commit(tx_id)
    }

    pub fn rollback(&self, tx_id: u64) -> Result<()> {
        self.transactions.rollback(tx_id)
    }

    pub fn tx_stats(&self) -> TxStats {
        self.transactions.stats()
    }

    // ========================================================================
    // Vectors
    // ========================================================================

    /// Create (or re-open) a vector namespace. The database's
    /// `vector_save_path` is applied when the config has none; when
    /// persisted artifacts exist they are loaded.
    pub fn init_vector_namespace(&self, name: &str, mut config: VectorConfig) -> Result<()> {
        if config.auto_save_path.is_none() {
            config.auto_save_path = self.config.vector_save_path.clone();
        }
        self.vectors.init(name, config.clone())?;
        if let Some(root) = &config.auto_save_path {
            if root.join(name).join("meta.txt").exists() && self.vectors.count(name)? == 0 {
                self.vectors.load(name, &config)?;
            }
        }
        Ok(())
    }

    /// k-NN over a namespace with an optional pk whitelist.
    pub fn vector_search(
        &self,
        namespace: &str,
        query: &[f32],
        k: usize,
        mask: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        let mask: Option<FxHashSet<String>> =
            mask.map(|pks| pks.iter().cloned().collect());
        self.vectors.search_knn(namespace, query, k, mask.as_ref())
    }

    // ========================================================================
    // Content
    // ========================================================================

    pub fn import_content(&self, spec: &ContentSpec, blob: &[u8]) -> Result<ImportResult> {
        self.content.import_content(spec, blob)
    }

    pub fn get_content_blob(&self, id: &str) -> Result<Vec<u8>> {
        self.content.get_content_blob(id)
    }

    pub fn get_content_meta(&self, id: &str) -> Result<ContentMeta> {
        self.content.get_content_meta(id)
    }

    pub fn delete_content(&self, id: &str) -> Result<()> {
        self.content.delete_content(id)
    }

    // ========================================================================
    // Queries and search
    // ========================================================================

    /// Execute an AQL query.
    pub fn query(&self, aql: &str) -> Result<Vec<TypedValue>> {
        self.query.execute(aql)
    }

    /// Vector k-NN with graph expansion.
    pub fn hybrid_search(&self, req: &HybridRequest) -> Result<Vec<HybridHit>> {
        self.hybrid.search(req)
    }

    /// BM25 × vector score fusion.
    pub fn fusion_search(&self, req: &FusionRequest) -> Result<Vec<FusedHit>> {
        themis_query::fusion::fuse(req)
    }

    // ========================================================================
    // Changefeed
    // ========================================================================

    pub fn changefeed_list(&self, opts: &ListOptions) -> Result<Vec<ChangeEvent>> {
        self.changefeed.list(opts)
    }

    pub fn changefeed_delete_before(&self, cutoff: u64) -> Result<u64> {
        self.changefeed.delete_before(cutoff)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Write a consistent checkpoint of all column families.
    pub fn create_checkpoint(&self, dir: &Path) -> Result<CheckpointInfo> {
        self.engine.create_checkpoint(dir)
    }

    /// Periodic housekeeping: evict old completed transactions, apply
    /// changefeed retention, persist vector namespaces.
    pub fn maintenance_tick(&self) -> Result<()> {
        self.transactions
            .evict_completed(Duration::from_secs(self.config.janitor_age_secs));
        self.changefeed.apply_retention(&RetentionPolicy {
            keep_for: Duration::from_secs(self.config.changefeed_keep_for_secs),
        })?;
        self.vectors.save_all()?;
        Ok(())
    }
}
