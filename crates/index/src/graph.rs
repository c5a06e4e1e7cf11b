//! Graph index manager
//!
//! Adjacency is kept as indexed records, not owning pointers: an edge
//! owns its `graph:edge:<e>` record, and two adjacency keys
//! (`graph:out:<from>:<e>`, `graph:in:<to>:<e>`) make both directions a
//! prefix scan. All three keys are staged into one batch so the
//! adjacency invariant holds at every commit.
//!
//! Traversals bound time and frontier size; hitting a bound aborts and
//! returns partial results flagged `truncated`.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::sync::Arc;
use themis_core::{keys, Error, Limits, Result, TypedValue};
use themis_storage::{Cf, KvEngine, WriteBatch};

/// Direction of adjacency to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
    Both,
}

/// An edge record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub edge_pk: String,
    pub from_pk: String,
    pub to_pk: String,
    pub weight: f64,
    #[serde(default)]
    pub fields: BTreeMap<String, TypedValue>,
}

/// One visited node in a BFS traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct Visit {
    pub pk: String,
    pub hop: u32,
    /// Edge pks on the path from the start node, in order.
    pub path_edges: Vec<String>,
}

/// BFS result; `truncated` marks partial results after a bound hit.
#[derive(Debug, Clone)]
pub struct Traversal {
    pub visits: Vec<Visit>,
    pub truncated: bool,
}

/// One settled node in a weighted traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedVisit {
    pub pk: String,
    pub cost: f64,
    pub path_edges: Vec<String>,
}

/// Weighted traversal result.
#[derive(Debug, Clone)]
pub struct WeightedTraversal {
    pub visits: Vec<WeightedVisit>,
    pub truncated: bool,
}

/// Heap entry for Dijkstra: ordered by cost, ties by pk.
#[derive(Debug, Clone, PartialEq)]
struct HeapEntry {
    cost: f64,
    pk: String,
    path_edges: Vec<String>,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.cost
            .partial_cmp(&other.cost)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| self.pk.cmp(&other.pk))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Manager for graph adjacency and edge records.
pub struct GraphIndexManager {
    engine: Arc<dyn KvEngine>,
    limits: Limits,
}

impl GraphIndexManager {
    pub fn new(engine: Arc<dyn KvEngine>) -> Self {
        Self::with_limits(engine, Limits::default())
    }

    pub fn with_limits(engine: Arc<dyn KvEngine>, limits: Limits) -> Self {
        GraphIndexManager { engine, limits }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Stage an edge insert: edge record plus both adjacency keys.
    pub fn stage_add_edge(&self, batch: &mut WriteBatch, edge: &Edge) -> Result<()> {
        let record = serde_json::to_vec(edge)?;
        batch.put(Cf::Graph, keys::graph_edge(&edge.edge_pk)?, record);
        batch.put(
            Cf::Graph,
            keys::graph_out(&edge.from_pk, &edge.edge_pk)?,
            Vec::new(),
        );
        batch.put(
            Cf::Graph,
            keys::graph_in(&edge.to_pk, &edge.edge_pk)?,
            Vec::new(),
        );
        Ok(())
    }

    /// Stage an edge delete, reversing all three keys. Returns the old
    /// edge so callers can build compensation entries; fails with
    /// `NotFound` when the edge does not exist.
    pub fn stage_delete_edge(&self, batch: &mut WriteBatch, edge_pk: &str) -> Result<Edge> {
        let edge = self
            .get_edge(edge_pk)?
            .ok_or_else(|| Error::NotFound(format!("graph:edge:{edge_pk}")))?;
        batch.delete(Cf::Graph, keys::graph_edge(edge_pk)?);
        batch.delete(Cf::Graph, keys::graph_out(&edge.from_pk, edge_pk)?);
        batch.delete(Cf::Graph, keys::graph_in(&edge.to_pk, edge_pk)?);
        Ok(edge)
    }

    /// Insert an edge in one atomic batch.
    pub fn add_edge(&self, edge: &Edge) -> Result<()> {
        let mut batch = WriteBatch::new();
        self.stage_add_edge(&mut batch, edge)?;
        self.engine.batch_write(batch)?;
        Ok(())
    }

    /// Delete an edge in one atomic batch.
    pub fn delete_edge(&self, edge_pk: &str) -> Result<Edge> {
        let mut batch = WriteBatch::new();
        let edge = self.stage_delete_edge(&mut batch, edge_pk)?;
        self.engine.batch_write(batch)?;
        Ok(edge)
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Load an edge record.
    pub fn get_edge(&self, edge_pk: &str) -> Result<Option<Edge>> {
        match self.engine.get(Cf::Graph, &keys::graph_edge(edge_pk)?)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Edge pks adjacent to `pk`, ascending. `Both` merges the two
    /// directions and deduplicates.
    pub fn neighbors(&self, pk: &str, direction: Direction) -> Result<Vec<String>> {
        let mut edges = match direction {
            Direction::Out => self.adjacent(pk, true)?,
            Direction::In => self.adjacent(pk, false)?,
            Direction::Both => {
                let mut out = self.adjacent(pk, true)?;
                out.extend(self.adjacent(pk, false)?);
                out.sort();
                out.dedup();
                out
            }
        };
        edges.sort();
        Ok(edges)
    }

    fn adjacent(&self, pk: &str, outgoing: bool) -> Result<Vec<String>> {
        let prefix = keys::graph_adjacency_prefix(pk, outgoing)?;
        let mut edges = Vec::new();
        for (key, _) in self.engine.iter_prefix(Cf::Graph, &prefix)? {
            edges.push(keys::parse_adjacency_edge(&key)?);
        }
        Ok(edges)
    }

    // ========================================================================
    // Traversals
    // ========================================================================

    /// Breadth-first traversal bounded by `max_hops`.
    ///
    /// Visit order is by hop, then by ascending edge pk within a hop.
    /// `filter` (when given) decides whether a node is reported *and*
    /// expanded. The start node is always visited at hop 0.
    pub fn bfs(
        &self,
        start: &str,
        max_hops: u32,
        direction: Direction,
        filter: Option<&dyn Fn(&str) -> bool>,
    ) -> Result<Traversal> {
        let mut visits = Vec::new();
        let mut truncated = false;
        let mut seen = std::collections::HashSet::new();
        let mut frontier = VecDeque::new();

        seen.insert(start.to_string());
        frontier.push_back(Visit {
            pk: start.to_string(),
            hop: 0,
            path_edges: Vec::new(),
        });

        while let Some(visit) = frontier.pop_front() {
            if visits.len() >= self.limits.max_traversal_visited {
                truncated = true;
                break;
            }
            let hop = visit.hop;
            visits.push(visit.clone());
            if hop >= max_hops {
                continue;
            }
            for edge_pk in self.neighbors(&visit.pk, direction)? {
                let edge = match self.get_edge(&edge_pk)? {
                    Some(e) => e,
                    None => {
                        return Err(Error::Corruption(format!(
                            "adjacency references missing edge {edge_pk}"
                        )))
                    }
                };
                let next = if edge.from_pk == visit.pk {
                    edge.to_pk.clone()
                } else {
                    edge.from_pk.clone()
                };
                if seen.contains(&next) {
                    continue;
                }
                if let Some(filter) = filter {
                    if !filter(&next) {
                        continue;
                    }
                }
                if frontier.len() >= self.limits.max_frontier {
                    truncated = true;
                    break;
                }
                seen.insert(next.clone());
                let mut path = visit.path_edges.clone();
                path.push(edge_pk);
                frontier.push_back(Visit {
                    pk: next,
                    hop: hop + 1,
                    path_edges: path,
                });
            }
            if truncated {
                // Report what was settled so far.
                break;
            }
        }
        Ok(Traversal { visits, truncated })
    }

    /// Dijkstra traversal bounded by path cost.
    ///
    /// `cost_fn` maps each edge to a non-negative step cost (commonly
    /// `|e| e.weight`). Nodes are settled in ascending cost order, ties
    /// broken by pk.
    pub fn weighted_traverse(
        &self,
        start: &str,
        max_cost: f64,
        direction: Direction,
        cost_fn: &dyn Fn(&Edge) -> f64,
    ) -> Result<WeightedTraversal> {
        let mut visits = Vec::new();
        let mut truncated = false;
        let mut settled = std::collections::HashSet::new();
        let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::new();

        heap.push(Reverse(HeapEntry {
            cost: 0.0,
            pk: start.to_string(),
            path_edges: Vec::new(),
        }));

        while let Some(Reverse(entry)) = heap.pop() {
            if settled.contains(&entry.pk) {
                continue;
            }
            if visits.len() >= self.limits.max_traversal_visited {
                truncated = true;
                break;
            }
            settled.insert(entry.pk.clone());
            visits.push(WeightedVisit {
                pk: entry.pk.clone(),
                cost: entry.cost,
                path_edges: entry.path_edges.clone(),
            });

            for edge_pk in self.neighbors(&entry.pk, direction)? {
                let edge = match self.get_edge(&edge_pk)? {
                    Some(e) => e,
                    None => {
                        return Err(Error::Corruption(format!(
                            "adjacency references missing edge {edge_pk}"
                        )))
                    }
                };
                let next = if edge.from_pk == entry.pk {
                    edge.to_pk.clone()
                } else {
                    edge.from_pk.clone()
                };
                if settled.contains(&next) {
                    continue;
                }
                let step = cost_fn(&edge);
                if step < 0.0 {
                    return Err(Error::InvalidArgument(
                        "negative edge cost in weighted traversal".to_string(),
                    ));
                }
                let cost = entry.cost + step;
                if cost > max_cost {
                    continue;
                }
                if heap.len() >= self.limits.max_frontier {
                    truncated = true;
                    continue;
                }
                let mut path = entry.path_edges.clone();
                path.push(edge_pk);
                heap.push(Reverse(HeapEntry {
                    cost,
                    pk: next,
                    path_edges: path,
                }));
            }
        }
        Ok(WeightedTraversal { visits, truncated })
    }
}
