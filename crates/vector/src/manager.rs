//! Vector index manager
//!
//! Namespaces live behind per-namespace RW locks; mutations take the
//! exclusive lock, searches the shared one. The manager is a stateless
//! facade apart from the namespace registry; share it via `Arc`.

use crate::namespace::Namespace;
use crate::persistence;
use crate::types::{SearchHit, VectorConfig};
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::path::PathBuf;
use std::sync::Arc;
use themis_core::{codec, keys, Error, Result, TypedValue};
use themis_storage::{Cf, KvEngine};

/// Manager for all ANN namespaces.
pub struct VectorIndexManager {
    namespaces: DashMap<String, Arc<RwLock<Namespace>>>,
}

impl VectorIndexManager {
    pub fn new() -> Self {
        VectorIndexManager {
            namespaces: DashMap::new(),
        }
    }

    fn namespace(&self, name: &str) -> Result<Arc<RwLock<Namespace>>> {
        self.namespaces
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::NotFound(format!("vector namespace {name}")))
    }

    fn save_dir(config: &VectorConfig, name: &str) -> Option<PathBuf> {
        config.auto_save_path.as_ref().map(|root| root.join(name))
    }

    /// Create a namespace. Idempotent: re-initializing with the same
    /// dimension is a no-op; a different dimension (live or persisted)
    /// fails with `DimensionMismatch`.
    pub fn init(&self, name: &str, config: VectorConfig) -> Result<()> {
        if config.dim == 0 {
            return Err(Error::InvalidArgument(
                "vector dimension must be positive".to_string(),
            ));
        }
        if let Some(existing) = self.namespaces.get(name) {
            let existing_dim = existing.value().read().config().dim;
            if existing_dim != config.dim {
                return Err(Error::DimensionMismatch {
                    expected: existing_dim,
                    actual: config.dim,
                });
            }
            return Ok(());
        }
        if let Some(dir) = Self::save_dir(&config, name) {
            if let Some(persisted) = persistence::persisted_dim(&dir)? {
                if persisted != config.dim {
                    return Err(Error::DimensionMismatch {
                        expected: persisted,
                        actual: config.dim,
                    });
                }
            }
        }
        self.namespaces.insert(
            name.to_string(),
            Arc::new(RwLock::new(Namespace::new(name, config))),
        );
        Ok(())
    }

    /// True when the namespace exists in memory.
    pub fn has_namespace(&self, name: &str) -> bool {
        self.namespaces.contains_key(name)
    }

    /// All namespace names, sorted.
    pub fn namespace_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Live vector count of a namespace.
    pub fn count(&self, name: &str) -> Result<usize> {
        Ok(self.namespace(name)?.read().live_count())
    }

    /// Configuration of a namespace (for pre-commit validation).
    pub fn config_of(&self, name: &str) -> Result<VectorConfig> {
        Ok(self.namespace(name)?.read().config().clone())
    }

    /// Insert or overwrite a vector.
    pub fn add(&self, name: &str, pk: &str, embedding: Vec<f32>) -> Result<()> {
        self.namespace(name)?.write().add(pk, embedding)
    }

    /// Equivalent to remove + add.
    pub fn update(&self, name: &str, pk: &str, embedding: Vec<f32>) -> Result<()> {
        self.add(name, pk, embedding)
    }

    /// Tombstone a vector. Returns `false` when absent.
    pub fn remove(&self, name: &str, pk: &str) -> Result<bool> {
        Ok(self.namespace(name)?.write().remove(pk))
    }

    /// True when `pk` has a live vector.
    pub fn contains(&self, name: &str, pk: &str) -> Result<bool> {
        Ok(self.namespace(name)?.read().contains(pk))
    }

    /// k-NN search with an optional pk whitelist. Results ascend by
    /// distance, ties by pk.
    pub fn search_knn(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
        mask: Option<&FxHashSet<String>>,
    ) -> Result<Vec<SearchHit>> {
        self.namespace(name)?.read().search_knn(query, k, mask)
    }

    /// Persist a namespace to its configured directory.
    pub fn save(&self, name: &str) -> Result<()> {
        let ns = self.namespace(name)?;
        let mut guard = ns.write();
        let dir = Self::save_dir(guard.config(), name).ok_or_else(|| {
            Error::InvalidArgument(format!("namespace {name} has no auto_save_path"))
        })?;
        persistence::save(&mut guard, &dir)
    }

    /// Persist every namespace that has a save path configured.
    pub fn save_all(&self) -> Result<usize> {
        let mut saved = 0;
        for name in self.namespace_names() {
            let ns = self.namespace(&name)?;
            let mut guard = ns.write();
            if let Some(dir) = Self::save_dir(guard.config(), &name) {
                persistence::save(&mut guard, &dir)?;
                saved += 1;
            }
        }
        Ok(saved)
    }

    /// Load a namespace from `config.auto_save_path`, replacing any
    /// in-memory state. Inconsistent artifacts fail with `Corruption`;
    /// `rebuild_from_storage` is the recovery path.
    pub fn load(&self, name: &str, config: &VectorConfig) -> Result<()> {
        let dir = Self::save_dir(config, name).ok_or_else(|| {
            Error::InvalidArgument(format!("namespace {name} has no auto_save_path"))
        })?;
        let mut loaded = persistence::load(name, &dir)?;
        if loaded.config().dim != config.dim {
            return Err(Error::DimensionMismatch {
                expected: loaded.config().dim,
                actual: config.dim,
            });
        }
        // The save path may have moved between runs; trust the caller.
        loaded.set_auto_save_path(config.auto_save_path.clone());
        self.namespaces
            .insert(name.to_string(), Arc::new(RwLock::new(loaded)));
        Ok(())
    }

    /// Rebuild a namespace from the engine's `vector:<ns>:` mirror:
    /// scans every stored embedding and re-adds it.
    pub fn rebuild_from_storage(&self, name: &str, engine: &dyn KvEngine) -> Result<usize> {
        let ns = self.namespace(name)?;
        let mut guard = ns.write();
        let config = guard.config().clone();
        let mut fresh = Namespace::new(name, config);

        let prefix = keys::vector_prefix(name)?;
        let mut restored = 0usize;
        for (key, value) in engine.iter_prefix(Cf::Default, &prefix)? {
            let (_, pk) = keys::parse_vector_key(&key)?;
            let embedding = match codec::decode(&value)? {
                TypedValue::VectorFloat(v) => v,
                other => {
                    return Err(Error::Corruption(format!(
                        "vector mirror for {pk} holds {}, not vector<f32>",
                        other.type_name()
                    )))
                }
            };
            fresh.add(&pk, embedding)?;
            restored += 1;
        }
        *guard = fresh;
        tracing::info!(namespace = name, restored, "vector namespace rebuilt from storage");
        Ok(restored)
    }
}

impl Default for VectorIndexManager {
    fn default() -> Self {
        Self::new()
    }
}
