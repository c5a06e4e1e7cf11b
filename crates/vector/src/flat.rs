//! Exhaustive (flat) backend
//!
//! Exact k-NN by scanning every live label. The namespace handles the
//! quantized fast path; this backend always computes exact distances.

use crate::backend::{AnnBackend, Arena};

/// Exhaustive scan backend. Stateless: the arena is the index.
#[derive(Debug, Default)]
pub struct FlatBackend;

impl FlatBackend {
    pub fn new() -> Self {
        FlatBackend
    }
}

impl AnnBackend for FlatBackend {
    fn insert(&mut self, _label: u32, _arena: &Arena) {}

    fn remove(&mut self, _label: u32) {}

    fn search(
        &self,
        query: &[f32],
        k: usize,
        arena: &Arena,
        filter: &dyn Fn(u32) -> bool,
    ) -> Vec<(u32, f32)> {
        let mut hits: Vec<(u32, f32)> = (0..arena.len() as u32)
            .filter(|&label| filter(label))
            .map(|label| (label, arena.distance_to(label, query)))
            .collect();
        hits.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(k);
        hits
    }

    fn name(&self) -> &'static str {
        "flat"
    }

    fn serialize(&self) -> Vec<u8> {
        Vec::new()
    }
}
