//! Per-namespace index state
//!
//! A namespace owns the pk↔label mapping, the vector arena, the ANN
//! backend, tombstones, and the optional quantizer. Mutations go
//! through the manager, which serializes them with a per-namespace
//! write lock.
//!
//! Tombstoned labels stay in the arena as routing points; `compact`
//! (run by save and rebuild) drops them and relabels densely.

use crate::backend::{AnnBackend, Arena};
use crate::flat::FlatBackend;
use crate::hnsw::HnswBackend;
use crate::quantization::Sq8Quantizer;
use crate::types::{AnnAlgorithm, Quantization, SearchHit, VectorConfig};
use rustc_hash::{FxHashMap, FxHashSet};
use themis_core::{Error, Result};

/// Over-fetch factor for deterministic tie-breaking and quantized
/// re-ranking: backends return by (distance, label), the namespace
/// re-orders by (distance, pk) on a wider candidate set.
const CANDIDATE_SLACK: usize = 4;

pub struct Namespace {
    name: String,
    config: VectorConfig,
    arena: Arena,
    backend: Box<dyn AnnBackend>,
    pk_to_label: FxHashMap<String, u32>,
    label_to_pk: Vec<Option<String>>,
    tombstones: FxHashSet<u32>,
    quantizer: Option<Sq8Quantizer>,
    codes: Vec<Vec<u8>>,
}

fn make_backend(config: &VectorConfig) -> Box<dyn AnnBackend> {
    match config.algorithm {
        AnnAlgorithm::Flat => Box::new(FlatBackend::new()),
        AnnAlgorithm::Hnsw => Box::new(HnswBackend::new(
            config.m,
            config.ef_construction,
            config.ef_search,
        )),
    }
}

impl Namespace {
    pub fn new(name: impl Into<String>, config: VectorConfig) -> Self {
        let quantizer = match config.quantization {
            Quantization::None => None,
            Quantization::Sq8 => Some(Sq8Quantizer::new(config.dim)),
        };
        Namespace {
            name: name.into(),
            arena: Arena::new(config.dim, config.metric),
            backend: make_backend(&config),
            pk_to_label: FxHashMap::default(),
            label_to_pk: Vec::new(),
            tombstones: FxHashSet::default(),
            quantizer,
            codes: Vec::new(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &VectorConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Algorithm-specific payload for `index.bin`.
    pub(crate) fn backend_payload(&self) -> Vec<u8> {
        self.backend.serialize()
    }

    /// Point the namespace at a (possibly relocated) save root.
    pub fn set_auto_save_path(&mut self, path: Option<std::path::PathBuf>) {
        self.config.auto_save_path = path;
    }

    /// Number of live (non-tombstoned) vectors.
    pub fn live_count(&self) -> usize {
        self.pk_to_label.len()
    }

    pub fn contains(&self, pk: &str) -> bool {
        self.pk_to_label.contains_key(pk)
    }

    fn check_dim(&self, len: usize) -> Result<()> {
        if len != self.config.dim {
            return Err(Error::DimensionMismatch {
                expected: self.config.dim,
                actual: len,
            });
        }
        Ok(())
    }

    fn prepare(&self, mut embedding: Vec<f32>) -> Result<Vec<f32>> {
        self.check_dim(embedding.len())?;
        if self.config.metric == crate::types::DistanceMetric::Cosine
            && !crate::distance::normalize(&mut embedding)
        {
            return Err(Error::InvalidArgument(format!(
                "zero vector has no direction under cosine (namespace {})",
                self.name
            )));
        }
        Ok(embedding)
    }

    /// Insert or overwrite the vector for `pk`.
    pub fn add(&mut self, pk: &str, embedding: Vec<f32>) -> Result<()> {
        let embedding = self.prepare(embedding)?;
        if let Some(&old) = self.pk_to_label.get(pk) {
            self.tombstones.insert(old);
            self.label_to_pk[old as usize] = None;
            self.backend.remove(old);
        }
        let label = self.arena.push(embedding);
        if let Some(q) = &mut self.quantizer {
            q.observe(self.arena.get(label));
            self.codes.push(q.encode(self.arena.get(label)));
        }
        self.label_to_pk.push(Some(pk.to_string()));
        self.pk_to_label.insert(pk.to_string(), label);
        self.backend.insert(label, &self.arena);
        Ok(())
    }

    /// Tombstone the vector for `pk`. Returns `false` when absent.
    pub fn remove(&mut self, pk: &str) -> bool {
        match self.pk_to_label.remove(pk) {
            Some(label) => {
                self.tombstones.insert(label);
                self.label_to_pk[label as usize] = None;
                self.backend.remove(label);
                true
            }
            None => false,
        }
    }

    /// k-NN search with an optional pk whitelist.
    ///
    /// Results are ordered by ascending distance, ties by ascending pk.
    pub fn search_knn(
        &self,
        query: &[f32],
        k: usize,
        mask: Option<&FxHashSet<String>>,
    ) -> Result<Vec<SearchHit>> {
        self.check_dim(query.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let query = self.prepare(query.to_vec())?;

        let allowed_labels: Option<FxHashSet<u32>> = mask.map(|pks| {
            pks.iter()
                .filter_map(|pk| self.pk_to_label.get(pk).copied())
                .collect()
        });
        let filter = |label: u32| -> bool {
            if self.tombstones.contains(&label) || self.label_to_pk[label as usize].is_none() {
                return false;
            }
            match &allowed_labels {
                Some(set) => set.contains(&label),
                None => true,
            }
        };

        let fetch = k.saturating_mul(CANDIDATE_SLACK);
        let raw = match (&self.quantizer, self.config.algorithm) {
            (Some(q), AnnAlgorithm::Flat) => {
                // Approximate scan over codes, exact re-rank of the top.
                let mut approx: Vec<(u32, f32)> = (0..self.arena.len() as u32)
                    .filter(|&label| filter(label))
                    .map(|label| {
                        (
                            label,
                            q.asymmetric_distance(
                                self.config.metric,
                                &query,
                                &self.codes[label as usize],
                            ),
                        )
                    })
                    .collect();
                approx.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
                approx.truncate(fetch);
                approx
                    .into_iter()
                    .map(|(label, _)| (label, self.arena.distance_to(label, &query)))
                    .collect()
            }
            _ => self.backend.search(&query, fetch, &self.arena, &filter),
        };

        let mut hits: Vec<SearchHit> = raw
            .into_iter()
            .filter_map(|(label, distance)| {
                self.label_to_pk[label as usize]
                    .as_ref()
                    .map(|pk| SearchHit {
                        pk: pk.clone(),
                        distance,
                    })
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.pk.cmp(&b.pk))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Live entries ordered by label: `(pk, vector)`.
    pub fn live_entries(&self) -> Vec<(String, Vec<f32>)> {
        (0..self.arena.len() as u32)
            .filter_map(|label| {
                self.label_to_pk[label as usize]
                    .as_ref()
                    .map(|pk| (pk.clone(), self.arena.get(label).to_vec()))
            })
            .collect()
    }

    /// Drop tombstones: rebuild the arena, backend, mapping, and codes
    /// with dense labels in the old label order.
    pub fn compact(&mut self) {
        let live = self.live_entries();
        let dropped = self.tombstones.len();

        self.arena = Arena::new(self.config.dim, self.config.metric);
        self.backend = make_backend(&self.config);
        self.pk_to_label = FxHashMap::default();
        self.label_to_pk = Vec::new();
        self.tombstones = FxHashSet::default();
        self.codes = Vec::new();
        self.quantizer = match self.config.quantization {
            Quantization::None => None,
            Quantization::Sq8 => {
                // Retrain ranges from the live set before encoding.
                let mut q = Sq8Quantizer::new(self.config.dim);
                for (_, v) in &live {
                    q.observe(v);
                }
                Some(q)
            }
        };

        for (pk, vector) in live {
            let label = self.arena.push(vector);
            if let Some(q) = &self.quantizer {
                self.codes.push(q.encode(self.arena.get(label)));
            }
            self.label_to_pk.push(Some(pk.clone()));
            self.pk_to_label.insert(pk, label);
            self.backend.insert(label, &self.arena);
        }
        if dropped > 0 {
            tracing::debug!(namespace = %self.name, dropped, "compacted vector namespace");
        }
    }

    /// Restore from persisted parts (see `persistence`).
    pub(crate) fn from_parts(
        name: String,
        config: VectorConfig,
        entries: Vec<(String, Vec<f32>)>,
        backend: Option<Box<dyn AnnBackend>>,
    ) -> Self {
        let mut ns = Namespace::new(name, config);
        match backend {
            Some(backend) => {
                // Backend was deserialized; fill the arena and mappings
                // without re-inserting.
                ns.backend = backend;
                for (pk, vector) in entries {
                    let label = ns.arena.push(vector);
                    if let Some(q) = &mut ns.quantizer {
                        q.observe(ns.arena.get(label));
                        ns.codes.push(q.encode(ns.arena.get(label)));
                    }
                    ns.label_to_pk.push(Some(pk.clone()));
                    ns.pk_to_label.insert(pk, label);
                }
            }
            None => {
                for (pk, vector) in entries {
                    // Already validated/normalized before persisting.
                    let label = ns.arena.push(vector);
                    if let Some(q) = &mut ns.quantizer {
                        q.observe(ns.arena.get(label));
                        ns.codes.push(q.encode(ns.arena.get(label)));
                    }
                    ns.label_to_pk.push(Some(pk.clone()));
                    ns.pk_to_label.insert(pk, label);
                    ns.backend.insert(label, &ns.arena);
                }
            }
        }
        ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DistanceMetric;

    fn ns(dim: usize) -> Namespace {
        Namespace::new("test", VectorConfig::new(dim))
    }

    #[test]
    fn test_add_and_self_search() {
        let mut ns = ns(4);
        ns.add("p1", vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        let hits = ns.search_knn(&[1.0, 0.0, 0.0, 0.0], 1, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pk, "p1");
        assert!(hits[0].distance < 1e-5);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut ns = ns(4);
        let err = ns.add("p1", vec![1.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 4,
                actual: 2
            }
        ));
        assert!(ns.search_knn(&[1.0], 1, None).is_err());
    }

    #[test]
    fn test_zero_vector_rejected_under_cosine() {
        let mut ns = ns(2);
        assert!(ns.add("p1", vec![0.0, 0.0]).is_err());
    }

    #[test]
    fn test_zero_vector_allowed_under_l2() {
        let mut ns = Namespace::new(
            "l2",
            VectorConfig::new(2).with_metric(DistanceMetric::L2),
        );
        ns.add("p1", vec![0.0, 0.0]).unwrap();
        let hits = ns.search_knn(&[0.0, 0.0], 1, None).unwrap();
        assert_eq!(hits[0].distance, 0.0);
    }

    #[test]
    fn test_overwrite_replaces_vector() {
        let mut ns = ns(2);
        ns.add("p1", vec![1.0, 0.0]).unwrap();
        ns.add("p1", vec![0.0, 1.0]).unwrap();
        assert_eq!(ns.live_count(), 1);
        let hits = ns.search_knn(&[0.0, 1.0], 1, None).unwrap();
        assert_eq!(hits[0].pk, "p1");
        assert!(hits[0].distance < 1e-5);
    }

    #[test]
    fn test_remove_tombstones() {
        let mut ns = ns(2);
        ns.add("p1", vec![1.0, 0.0]).unwrap();
        ns.add("p2", vec![0.0, 1.0]).unwrap();
        assert!(ns.remove("p1"));
        assert!(!ns.remove("p1"));
        assert_eq!(ns.live_count(), 1);
        let hits = ns.search_knn(&[1.0, 0.0], 2, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pk, "p2");
    }

    #[test]
    fn test_mask_prefilter() {
        let mut ns = ns(2);
        ns.add("near", vec![1.0, 0.0]).unwrap();
        ns.add("far", vec![0.0, 1.0]).unwrap();
        let mask: FxHashSet<String> = ["far".to_string()].into_iter().collect();
        let hits = ns.search_knn(&[1.0, 0.0], 2, Some(&mask)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pk, "far");
    }

    #[test]
    fn test_tie_break_by_pk() {
        let mut ns = ns(2);
        // Same vector under different pks: identical distance.
        ns.add("zeta", vec![1.0, 0.0]).unwrap();
        ns.add("alpha", vec![1.0, 0.0]).unwrap();
        let hits = ns.search_knn(&[1.0, 0.0], 2, None).unwrap();
        assert_eq!(hits[0].pk, "alpha");
        assert_eq!(hits[1].pk, "zeta");
    }

    #[test]
    fn test_compact_drops_tombstones() {
        let mut ns = ns(2);
        ns.add("p1", vec![1.0, 0.0]).unwrap();
        ns.add("p2", vec![0.0, 1.0]).unwrap();
        ns.remove("p1");
        ns.compact();
        assert_eq!(ns.live_count(), 1);
        assert_eq!(ns.arena.len(), 1);
        let hits = ns.search_knn(&[0.0, 1.0], 2, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pk, "p2");
    }

    #[test]
    fn test_quantized_search_reranks_exactly() {
        let mut ns = Namespace::new(
            "q",
            VectorConfig::new(4)
                .with_metric(DistanceMetric::L2)
                .with_quantization(Quantization::Sq8),
        );
        for i in 0..50 {
            let v: Vec<f32> = (0..4).map(|d| ((i * 7 + d * 3) % 11) as f32).collect();
            ns.add(&format!("p{i:02}"), v).unwrap();
        }
        let probe: Vec<f32> = (0..4).map(|d| ((21 + d * 3) % 11) as f32).collect();
        let hits = ns.search_knn(&probe, 1, None).unwrap();
        // p03 stores exactly this vector (i=3: 21 = 3*7).
        assert_eq!(hits[0].pk, "p03");
        assert!(hits[0].distance < 1e-5);
    }

    #[test]
    fn test_search_k_zero() {
        let mut ns = ns(2);
        ns.add("p1", vec![1.0, 0.0]).unwrap();
        assert!(ns.search_knn(&[1.0, 0.0], 0, None).unwrap().is_empty());
    }
}
