//! HNSW backend
//!
//! Hierarchical navigable small world graph: greedy descent through the
//! upper layers, beam search (bounded by `ef`) at the target layer.
//! Level assignment uses a seeded RNG, so index construction is
//! deterministic for a given insertion sequence.
//!
//! Removal keeps the node as a routing point (the namespace filters
//! tombstoned labels out of results); the graph is compacted when the
//! namespace saves or rebuilds.

use crate::backend::{AnnBackend, Arena};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Fixed RNG seed: construction must be reproducible.
const LEVEL_SEED: u64 = 0x7E15_D00D;

/// Hard cap on layer count.
const MAX_LEVEL: usize = 16;

/// f32 wrapper with a total order for heap use.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrdF32(f32);

impl Eq for OrdF32 {}

impl Ord for OrdF32 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for OrdF32 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) level: u8,
    /// `links[l]` = neighbor labels at layer `l`, `0..=level`.
    pub(crate) links: Vec<Vec<u32>>,
}

/// Graph-based ANN backend.
pub struct HnswBackend {
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    ef_search: usize,
    level_mult: f64,
    pub(crate) nodes: Vec<Node>,
    pub(crate) entry: Option<u32>,
    rng: StdRng,
}

impl HnswBackend {
    pub fn new(m: usize, ef_construction: usize, ef_search: usize) -> Self {
        let m = m.max(2);
        HnswBackend {
            m,
            m_max0: m * 2,
            ef_construction: ef_construction.max(m),
            ef_search: ef_search.max(1),
            level_mult: 1.0 / (m as f64).ln(),
            nodes: Vec::new(),
            entry: None,
            rng: StdRng::seed_from_u64(LEVEL_SEED),
        }
    }

    /// Rebuild a backend from persisted nodes (see `persistence`).
    pub(crate) fn from_parts(
        m: usize,
        ef_construction: usize,
        ef_search: usize,
        nodes: Vec<Node>,
        entry: Option<u32>,
    ) -> Self {
        let mut backend = Self::new(m, ef_construction, ef_search);
        backend.nodes = nodes;
        backend.entry = entry;
        backend
    }

    fn random_level(&mut self) -> u8 {
        let r: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
        ((-r.ln() * self.level_mult) as usize).min(MAX_LEVEL) as u8
    }

    fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0
        } else {
            self.m
        }
    }

    /// Greedy walk at one layer: move to the closest neighbor until no
    /// neighbor improves.
    fn greedy_closest(&self, query: &[f32], start: u32, layer: usize, arena: &Arena) -> u32 {
        let mut current = start;
        let mut current_dist = arena.distance_to(current, query);
        loop {
            let mut improved = false;
            for &neighbor in &self.nodes[current as usize].links[layer] {
                let d = arena.distance_to(neighbor, query);
                if d < current_dist || (d == current_dist && neighbor < current) {
                    current = neighbor;
                    current_dist = d;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Beam search at one layer. Traverses every reachable candidate
    /// but collects only labels passing `keep` into the result heap.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[u32],
        ef: usize,
        layer: usize,
        arena: &Arena,
        keep: &dyn Fn(u32) -> bool,
    ) -> Vec<(f32, u32)> {
        let mut visited: FxHashSet<u32> = FxHashSet::default();
        // Min-heap of candidates to expand.
        let mut candidates: BinaryHeap<Reverse<(OrdF32, u32)>> = BinaryHeap::new();
        // Max-heap of kept results, capped at ef.
        let mut results: BinaryHeap<(OrdF32, u32)> = BinaryHeap::new();

        for &ep in entry_points {
            if !visited.insert(ep) {
                continue;
            }
            let d = arena.distance_to(ep, query);
            candidates.push(Reverse((OrdF32(d), ep)));
            if keep(ep) {
                results.push((OrdF32(d), ep));
            }
        }

        while let Some(Reverse((OrdF32(dist), label))) = candidates.pop() {
            if results.len() >= ef {
                if let Some(&(OrdF32(worst), _)) = results.peek() {
                    if dist > worst {
                        break;
                    }
                }
            }
            for &neighbor in &self.nodes[label as usize].links[layer] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let d = arena.distance_to(neighbor, query);
                let admit = match results.peek() {
                    Some(&(OrdF32(worst), _)) => results.len() < ef || d < worst,
                    None => true,
                };
                if admit {
                    candidates.push(Reverse((OrdF32(d), neighbor)));
                    if keep(neighbor) {
                        results.push((OrdF32(d), neighbor));
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out: Vec<(f32, u32)> = results
            .into_iter()
            .map(|(OrdF32(d), label)| (d, label))
            .collect();
        out.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        out
    }

    /// Keep the `count` closest candidates as neighbors.
    fn select_neighbors(candidates: &[(f32, u32)], count: usize) -> Vec<u32> {
        candidates.iter().take(count).map(|&(_, l)| l).collect()
    }

    /// Trim a node's links at `layer` back to the per-layer cap,
    /// keeping the closest.
    fn prune(&mut self, label: u32, layer: usize, arena: &Arena) {
        let cap = self.max_links(layer);
        let node = &self.nodes[label as usize];
        if node.links[layer].len() <= cap {
            return;
        }
        let base = arena.get(label).to_vec();
        let mut scored: Vec<(f32, u32)> = node.links[layer]
            .iter()
            .map(|&n| (arena.distance_to(n, &base), n))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        self.nodes[label as usize].links[layer] = Self::select_neighbors(&scored, cap);
    }
}

impl AnnBackend for HnswBackend {
    fn insert(&mut self, label: u32, arena: &Arena) {
        debug_assert_eq!(label as usize, self.nodes.len(), "labels must be dense");
        let level = self.random_level();
        self.nodes.push(Node {
            level,
            links: vec![Vec::new(); level as usize + 1],
        });

        let entry = match self.entry {
            Some(e) => e,
            None => {
                self.entry = Some(label);
                return;
            }
        };

        let query = arena.get(label).to_vec();
        let top = self.nodes[entry as usize].level;

        // Greedy descent above the node's level.
        let mut ep = entry;
        let mut layer = top as usize;
        while layer > level as usize {
            ep = self.greedy_closest(&query, ep, layer, arena);
            layer -= 1;
        }

        // Connect at every layer the node participates in.
        let mut entry_points = vec![ep];
        for lc in (0..=(level.min(top) as usize)).rev() {
            let candidates =
                self.search_layer(&query, &entry_points, self.ef_construction, lc, arena, &|_| {
                    true
                });
            let neighbors = Self::select_neighbors(&candidates, self.m);
            for &neighbor in &neighbors {
                self.nodes[label as usize].links[lc].push(neighbor);
                self.nodes[neighbor as usize].links[lc].push(label);
                self.prune(neighbor, lc, arena);
            }
            entry_points = candidates.iter().map(|&(_, l)| l).collect();
            if entry_points.is_empty() {
                entry_points = vec![ep];
            }
        }

        if level > top {
            self.entry = Some(label);
        }
    }

    fn remove(&mut self, _label: u32) {
        // Tombstoned labels stay in the graph as routing points; the
        // namespace filters them out of results and compaction drops
        // them at the next save/rebuild.
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        arena: &Arena,
        filter: &dyn Fn(u32) -> bool,
    ) -> Vec<(u32, f32)> {
        let entry = match self.entry {
            Some(e) => e,
            None => return Vec::new(),
        };

        let mut ep = entry;
        let top = self.nodes[entry as usize].level as usize;
        for layer in (1..=top).rev() {
            ep = self.greedy_closest(query, ep, layer, arena);
        }

        let ef = self.ef_search.max(k);
        let hits = self.search_layer(query, &[ep], ef, 0, arena, filter);
        hits.into_iter()
            .take(k)
            .map(|(d, label)| (label, d))
            .collect()
    }

    fn name(&self) -> &'static str {
        "hnsw"
    }

    fn serialize(&self) -> Vec<u8> {
        use byteorder::{LittleEndian, WriteBytesExt};
        let mut out = Vec::new();
        let entry = self.entry.map(|e| e as i64).unwrap_or(-1);
        out.write_i64::<LittleEndian>(entry).expect("vec write");
        out.write_u64::<LittleEndian>(self.nodes.len() as u64)
            .expect("vec write");
        for node in &self.nodes {
            out.push(node.level);
            for layer in &node.links {
                out.write_u32::<LittleEndian>(layer.len() as u32)
                    .expect("vec write");
                for &neighbor in layer {
                    out.write_u32::<LittleEndian>(neighbor).expect("vec write");
                }
            }
        }
        out
    }
}

impl HnswBackend {
    /// Inverse of `serialize`. `m`/`ef_*` come from the persisted
    /// config; the payload carries only the graph.
    pub(crate) fn deserialize(
        bytes: &[u8],
        m: usize,
        ef_construction: usize,
        ef_search: usize,
    ) -> themis_core::Result<Self> {
        use byteorder::{LittleEndian, ReadBytesExt};
        use themis_core::Error;
        let corrupt = |what: &str| Error::Corruption(format!("hnsw payload: {what}"));

        let mut cursor = std::io::Cursor::new(bytes);
        let entry_raw = cursor
            .read_i64::<LittleEndian>()
            .map_err(|_| corrupt("missing entry point"))?;
        let count = cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| corrupt("missing node count"))? as usize;

        let mut nodes = Vec::with_capacity(count.min(1 << 20));
        for _ in 0..count {
            let mut level_byte = [0u8; 1];
            std::io::Read::read_exact(&mut cursor, &mut level_byte)
                .map_err(|_| corrupt("truncated node level"))?;
            let level = level_byte[0];
            let mut links = Vec::with_capacity(level as usize + 1);
            for _ in 0..=level {
                let n = cursor
                    .read_u32::<LittleEndian>()
                    .map_err(|_| corrupt("truncated link count"))?
                    as usize;
                let mut layer = Vec::with_capacity(n.min(1 << 16));
                for _ in 0..n {
                    let neighbor = cursor
                        .read_u32::<LittleEndian>()
                        .map_err(|_| corrupt("truncated link"))?;
                    if neighbor as usize >= count {
                        return Err(corrupt("link references missing node"));
                    }
                    layer.push(neighbor);
                }
                links.push(layer);
            }
            nodes.push(Node { level, links });
        }
        let entry = match entry_raw {
            -1 => None,
            e if e >= 0 && (e as usize) < count => Some(e as u32),
            _ => return Err(corrupt("entry point out of range")),
        };
        Ok(Self::from_parts(m, ef_construction, ef_search, nodes, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DistanceMetric;

    fn build(count: usize, dim: usize) -> (Arena, HnswBackend) {
        let mut arena = Arena::new(dim, DistanceMetric::L2);
        let mut backend = HnswBackend::new(8, 64, 64);
        for i in 0..count {
            // Deterministic pseudo-random points on a grid.
            let v: Vec<f32> = (0..dim)
                .map(|d| ((i * 31 + d * 17) % 97) as f32 / 97.0)
                .collect();
            let label = arena.push(v);
            backend.insert(label, &arena);
        }
        (arena, backend)
    }

    #[test]
    fn test_hnsw_finds_exact_match() {
        let (arena, backend) = build(200, 8);
        for probe in [0u32, 57, 199] {
            let query = arena.get(probe).to_vec();
            let hits = backend.search(&query, 1, &arena, &|_| true);
            assert_eq!(hits[0].0, probe, "self-query must return the point itself");
            assert!(hits[0].1 < 1e-6);
        }
    }

    #[test]
    fn test_hnsw_matches_flat_on_small_sets() {
        use crate::flat::FlatBackend;
        use crate::backend::AnnBackend as _;
        let (arena, backend) = build(100, 4);
        let flat = FlatBackend::new();
        let query = vec![0.5, 0.5, 0.5, 0.5];
        // ef_search (64) covers most of the set; top-1 must agree.
        let h = backend.search(&query, 1, &arena, &|_| true);
        let f = flat.search(&query, 1, &arena, &|_| true);
        assert_eq!(h[0].0, f[0].0);
        assert!((h[0].1 - f[0].1).abs() < 1e-6);
    }

    #[test]
    fn test_hnsw_deterministic_construction() {
        let (arena_a, backend_a) = build(150, 6);
        let (_arena_b, backend_b) = build(150, 6);
        let query = vec![0.3; 6];
        let a = backend_a.search(&query, 10, &arena_a, &|_| true);
        let b = backend_b.search(&query, 10, &arena_a, &|_| true);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hnsw_filter_excludes_labels() {
        let (arena, backend) = build(50, 4);
        let query = arena.get(10).to_vec();
        let hits = backend.search(&query, 5, &arena, &|label| label != 10);
        assert!(hits.iter().all(|&(l, _)| l != 10));
        assert!(!hits.is_empty());
    }

    #[test]
    fn test_hnsw_empty_index() {
        let arena = Arena::new(4, DistanceMetric::L2);
        let backend = HnswBackend::new(8, 64, 32);
        assert!(backend.search(&[0.0; 4], 3, &arena, &|_| true).is_empty());
    }

    #[test]
    fn test_link_counts_bounded() {
        let (_arena, backend) = build(300, 4);
        for node in &backend.nodes {
            for (layer, links) in node.links.iter().enumerate() {
                let cap = if layer == 0 { 16 } else { 8 };
                assert!(
                    links.len() <= cap,
                    "layer {layer} has {} links, cap {cap}",
                    links.len()
                );
            }
        }
    }
}
