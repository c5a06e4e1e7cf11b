//! ANN backend trait and the shared vector arena
//!
//! Backends index *labels* (dense u32 handles); the namespace owns the
//! pk↔label mapping, tombstones, and quantization. The arena stores the
//! actual vectors so both backends share one representation; removed
//! labels keep their vector as a routing point until the next
//! save/rebuild compaction.

use crate::distance;
use crate::types::DistanceMetric;

/// Shared vector storage indexed by label.
pub struct Arena {
    dim: usize,
    metric: DistanceMetric,
    slots: Vec<Vec<f32>>,
}

impl Arena {
    pub fn new(dim: usize, metric: DistanceMetric) -> Self {
        Arena {
            dim,
            metric,
            slots: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Number of slots ever allocated (including tombstoned labels).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Append a vector, returning its label.
    pub fn push(&mut self, vector: Vec<f32>) -> u32 {
        debug_assert_eq!(vector.len(), self.dim);
        self.slots.push(vector);
        (self.slots.len() - 1) as u32
    }

    /// Vector for a label.
    pub fn get(&self, label: u32) -> &[f32] {
        &self.slots[label as usize]
    }

    /// Distance from `query` to the vector at `label`.
    pub fn distance_to(&self, label: u32, query: &[f32]) -> f32 {
        distance::distance(self.metric, self.get(label), query)
    }
}

/// Pluggable ANN index over arena labels.
///
/// `filter` decides which labels may appear in results (tombstones and
/// candidate masks); backends still traverse filtered-out labels as
/// routing points.
pub trait AnnBackend: Send + Sync {
    /// Index a freshly pushed label.
    fn insert(&mut self, label: u32, arena: &Arena);

    /// Forget a label. Backends may keep it as a routing point;
    /// physical removal happens when the namespace compacts.
    fn remove(&mut self, label: u32);

    /// `k` nearest labels to `query`, ascending distance. Ties may be
    /// returned in any order; the namespace applies the final
    /// deterministic (distance, pk) ordering.
    fn search(
        &self,
        query: &[f32],
        k: usize,
        arena: &Arena,
        filter: &dyn Fn(u32) -> bool,
    ) -> Vec<(u32, f32)>;

    /// Name for `meta.txt` and logs.
    fn name(&self) -> &'static str;

    /// Algorithm-specific payload for `index.bin`. Flat has no state
    /// and returns an empty buffer.
    fn serialize(&self) -> Vec<u8>;
}
