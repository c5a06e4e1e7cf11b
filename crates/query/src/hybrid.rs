//! Hybrid search: vector k-NN plus graph expansion
//!
//! The vector side finds seed candidates; bounded BFS expansion pulls
//! in graph neighbors with a per-hop score decay. Scores are
//! `1 / (1 + distance)` for seeds and `seed_score · decay^hop` for
//! expanded nodes; a node reached several ways keeps its best score.

use rustc_hash::FxHashSet;
use std::collections::HashMap;
use std::sync::Arc;
use themis_core::{Error, Result};
use themis_index::{Direction, GraphIndexManager};
use themis_vector::VectorIndexManager;

/// Hybrid search request.
#[derive(Debug, Clone)]
pub struct HybridRequest {
    /// Vector namespace to search.
    pub namespace: String,
    pub embedding: Vec<f32>,
    pub k: usize,
    /// Whitelist applied to vector candidates before ranking.
    pub pre_filter: Option<Vec<String>>,
    /// Graph hops to expand each seed by; 0 disables expansion.
    pub expand_hops: u32,
    /// Score multiplier per hop (default 0.5).
    pub expansion_decay: f64,
}

impl HybridRequest {
    pub fn new(namespace: impl Into<String>, embedding: Vec<f32>, k: usize) -> Self {
        HybridRequest {
            namespace: namespace.into(),
            embedding,
            k,
            pre_filter: None,
            expand_hops: 0,
            expansion_decay: 0.5,
        }
    }
}

/// One hybrid result.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridHit {
    pub pk: String,
    pub score: f64,
    /// Vector distance for seeds; `None` for purely expanded nodes.
    pub distance: Option<f32>,
    /// Hops from the nearest seed (0 for seeds themselves).
    pub hops: u32,
}

/// Orchestrates vector search and graph expansion. Stateless: holds
/// only manager references.
pub struct HybridSearch {
    vectors: Arc<VectorIndexManager>,
    graph: Arc<GraphIndexManager>,
}

impl HybridSearch {
    pub fn new(vectors: Arc<VectorIndexManager>, graph: Arc<GraphIndexManager>) -> Self {
        HybridSearch { vectors, graph }
    }

    pub fn search(&self, req: &HybridRequest) -> Result<Vec<HybridHit>> {
        if req.k == 0 {
            return Err(Error::InvalidArgument("k must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&req.expansion_decay) {
            return Err(Error::InvalidArgument(format!(
                "expansion decay {} outside [0, 1]",
                req.expansion_decay
            )));
        }

        let mask: Option<FxHashSet<String>> = req
            .pre_filter
            .as_ref()
            .map(|pks| pks.iter().cloned().collect());
        let seeds = self
            .vectors
            .search_knn(&req.namespace, &req.embedding, req.k, mask.as_ref())?;

        let mut best: HashMap<String, HybridHit> = HashMap::new();
        for seed in &seeds {
            let score = 1.0 / (1.0 + seed.distance as f64);
            best.insert(
                seed.pk.clone(),
                HybridHit {
                    pk: seed.pk.clone(),
                    score,
                    distance: Some(seed.distance),
                    hops: 0,
                },
            );
        }

        if req.expand_hops > 0 {
            for seed in &seeds {
                let seed_score = 1.0 / (1.0 + seed.distance as f64);
                let traversal =
                    self.graph
                        .bfs(&seed.pk, req.expand_hops, Direction::Both, None)?;
                for visit in traversal.visits {
                    if visit.hop == 0 {
                        continue;
                    }
                    let score = seed_score * req.expansion_decay.powi(visit.hop as i32);
                    let candidate = HybridHit {
                        pk: visit.pk.clone(),
                        score,
                        distance: None,
                        hops: visit.hop,
                    };
                    match best.get(&visit.pk) {
                        Some(existing) if existing.score >= score => {}
                        _ => {
                            // Keep the vector distance when an expanded
                            // node is also a seed.
                            let merged = match best.get(&visit.pk) {
                                Some(existing) if existing.distance.is_some() => HybridHit {
                                    distance: existing.distance,
                                    ..candidate
                                },
                                _ => candidate,
                            };
                            best.insert(visit.pk.clone(), merged);
                        }
                    }
                }
            }
        }

        let mut hits: Vec<HybridHit> = best.into_values().collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.pk.cmp(&b.pk)));
        hits.truncate(req.k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use themis_index::Edge;
    use themis_storage::{KvEngine, MemoryEngine};
    use themis_vector::{DistanceMetric, VectorConfig};

    fn setup() -> (Arc<VectorIndexManager>, Arc<GraphIndexManager>, HybridSearch) {
        let engine: Arc<dyn KvEngine> = Arc::new(MemoryEngine::new());
        let vectors = Arc::new(VectorIndexManager::new());
        vectors
            .init(
                "chunks",
                VectorConfig::new(2).with_metric(DistanceMetric::L2),
            )
            .unwrap();
        let graph = Arc::new(GraphIndexManager::new(engine));
        let search = HybridSearch::new(vectors.clone(), graph.clone());
        (vectors, graph, search)
    }

    fn edge(e: &str, from: &str, to: &str) -> Edge {
        Edge {
            edge_pk: e.to_string(),
            from_pk: from.to_string(),
            to_pk: to.to_string(),
            weight: 1.0,
            fields: Default::default(),
        }
    }

    #[test]
    fn test_vector_only() {
        let (vectors, _graph, search) = setup();
        vectors.add("chunks", "near", vec![0.0, 0.0]).unwrap();
        vectors.add("chunks", "far", vec![10.0, 0.0]).unwrap();

        let hits = search
            .search(&HybridRequest::new("chunks", vec![0.1, 0.0], 2))
            .unwrap();
        assert_eq!(hits[0].pk, "near");
        assert_eq!(hits[0].hops, 0);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_graph_expansion_adds_neighbors() {
        let (vectors, graph, search) = setup();
        vectors.add("chunks", "seed", vec![0.0, 0.0]).unwrap();
        graph.add_edge(&edge("e1", "seed", "linked")).unwrap();
        graph.add_edge(&edge("e2", "linked", "distant")).unwrap();

        let mut req = HybridRequest::new("chunks", vec![0.0, 0.0], 5);
        req.expand_hops = 2;
        let hits = search.search(&req).unwrap();
        let pks: Vec<&str> = hits.iter().map(|h| h.pk.as_str()).collect();
        assert_eq!(pks, vec!["seed", "linked", "distant"]);
        assert_eq!(hits[1].hops, 1);
        assert_eq!(hits[2].hops, 2);
        assert!(hits[1].score > hits[2].score);
        assert_eq!(hits[1].distance, None);
    }

    #[test]
    fn test_pre_filter_masks_seeds() {
        let (vectors, _graph, search) = setup();
        vectors.add("chunks", "a", vec![0.0, 0.0]).unwrap();
        vectors.add("chunks", "b", vec![1.0, 0.0]).unwrap();

        let mut req = HybridRequest::new("chunks", vec![0.0, 0.0], 2);
        req.pre_filter = Some(vec!["b".to_string()]);
        let hits = search.search(&req).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pk, "b");
    }

    #[test]
    fn test_seed_keeps_distance_when_also_expanded() {
        let (vectors, graph, search) = setup();
        vectors.add("chunks", "a", vec![0.0, 0.0]).unwrap();
        vectors.add("chunks", "b", vec![0.5, 0.0]).unwrap();
        graph.add_edge(&edge("e1", "a", "b")).unwrap();

        let mut req = HybridRequest::new("chunks", vec![0.0, 0.0], 2);
        req.expand_hops = 1;
        let hits = search.search(&req).unwrap();
        let b = hits.iter().find(|h| h.pk == "b").unwrap();
        assert!(b.distance.is_some(), "seed distance must survive expansion");
    }

    #[test]
    fn test_determinism() {
        let (vectors, graph, search) = setup();
        for i in 0..10 {
            vectors
                .add("chunks", &format!("p{i}"), vec![i as f32, 0.0])
                .unwrap();
        }
        graph.add_edge(&edge("e1", "p0", "p9")).unwrap();
        let mut req = HybridRequest::new("chunks", vec![0.0, 0.0], 5);
        req.expand_hops = 1;
        let a = search.search(&req).unwrap();
        let b = search.search(&req).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_arguments() {
        let (_vectors, _graph, search) = setup();
        assert!(search
            .search(&HybridRequest::new("chunks", vec![0.0, 0.0], 0))
            .is_err());
        let mut req = HybridRequest::new("chunks", vec![0.0, 0.0], 1);
        req.expansion_decay = 2.0;
        assert!(search.search(&req).is_err());
    }
}
