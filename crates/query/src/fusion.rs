//! Deterministic score fusion for hybrid retrieval
//!
//! Combines a text ranking (descending score) and a vector ranking
//! (ascending distance) into one ordered list:
//!
//! - **RRF**: rank-based, position `r` contributes `1 / (k + r)`; the
//!   text list counts positions from 0, the vector list from 1, so the
//!   best text hit carries slightly more weight than the best vector
//!   hit at equal `k`.
//! - **Weighted**: text scores min-max normalized to `[0, 1]`, vector
//!   distances converted to `1 - d/d_max`; final score is
//!   `w·text + (1-w)·vector`.
//!
//! Identical inputs and parameters produce identical output order:
//! scores within the tie epsilon are ordered by ascending pk (when
//! tie-breaking is enabled).

use std::collections::BTreeMap;
use themis_core::{Error, Result};

/// Fusion algorithm and its parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionMode {
    /// Reciprocal rank fusion with constant `k` (default 60).
    Rrf { k: f64 },
    /// Linear blend; `weight` applies to the text side (default 0.5,
    /// alias `alpha`).
    Weighted { weight: f64 },
}

impl Default for FusionMode {
    fn default() -> Self {
        FusionMode::Rrf { k: 60.0 }
    }
}

impl FusionMode {
    /// Default tie epsilon for this mode.
    pub fn default_epsilon(&self) -> f64 {
        match self {
            FusionMode::Rrf { .. } => 1e-12,
            FusionMode::Weighted { .. } => 1e-9,
        }
    }
}

/// How to order results whose scores are within the epsilon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Ascending primary key.
    #[default]
    Pk,
    /// Leave the descending-score order as computed.
    None,
}

/// Fusion input. At least one of `text` / `vector` must be non-empty.
#[derive(Debug, Clone, Default)]
pub struct FusionRequest {
    /// Text ranking: `(pk, score)`, best first.
    pub text: Vec<(String, f64)>,
    /// Vector ranking: `(pk, distance)`, closest first.
    pub vector: Vec<(String, f64)>,
    pub mode: FusionMode,
    pub tie_break: TieBreak,
    /// Overrides the mode's default tie epsilon.
    pub epsilon: Option<f64>,
    /// Result count.
    pub k: usize,
}

/// One fused result.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub pk: String,
    pub score: f64,
    /// 1-based position in the text input, when present there.
    pub text_rank: Option<usize>,
    /// 1-based position in the vector input, when present there.
    pub vector_rank: Option<usize>,
}

/// Fuse the two rankings.
pub fn fuse(req: &FusionRequest) -> Result<Vec<FusedHit>> {
    if req.text.is_empty() && req.vector.is_empty() {
        return Err(Error::InvalidArgument(
            "fusion requires at least one of text or vector results".to_string(),
        ));
    }
    if let FusionMode::Weighted { weight } = req.mode {
        if !(0.0..=1.0).contains(&weight) {
            return Err(Error::InvalidArgument(format!(
                "fusion weight {weight} outside [0, 1]"
            )));
        }
    }

    // BTreeMap keyed by pk keeps accumulation order-independent.
    let mut acc: BTreeMap<String, FusedHit> = BTreeMap::new();
    fn entry<'a>(acc: &'a mut BTreeMap<String, FusedHit>, pk: &str) -> &'a mut FusedHit {
        acc.entry(pk.to_string()).or_insert_with(|| FusedHit {
            pk: pk.to_string(),
            score: 0.0,
            text_rank: None,
            vector_rank: None,
        })
    }

    match req.mode {
        FusionMode::Rrf { k } => {
            for (position, (pk, _score)) in req.text.iter().enumerate() {
                let hit = entry(&mut acc, pk);
                hit.score += 1.0 / (k + position as f64);
                hit.text_rank = Some(position + 1);
            }
            for (position, (pk, _distance)) in req.vector.iter().enumerate() {
                let hit = entry(&mut acc, pk);
                hit.score += 1.0 / (k + position as f64 + 1.0);
                hit.vector_rank = Some(position + 1);
            }
        }
        FusionMode::Weighted { weight } => {
            let (lo, hi) = min_max(req.text.iter().map(|(_, s)| *s));
            for (position, (pk, score)) in req.text.iter().enumerate() {
                let normalized = if hi > lo { (score - lo) / (hi - lo) } else { 1.0 };
                let hit = entry(&mut acc, pk);
                hit.score += weight * normalized;
                hit.text_rank = Some(position + 1);
            }
            let d_max = req
                .vector
                .iter()
                .map(|(_, d)| *d)
                .fold(0.0f64, f64::max);
            for (position, (pk, distance)) in req.vector.iter().enumerate() {
                let similarity = if d_max > 0.0 { 1.0 - distance / d_max } else { 1.0 };
                let hit = entry(&mut acc, pk);
                hit.score += (1.0 - weight) * similarity;
                hit.vector_rank = Some(position + 1);
            }
        }
    }

    let mut hits: Vec<FusedHit> = acc.into_values().collect();
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.pk.cmp(&b.pk)));

    // Reorder runs of epsilon-equal scores by pk.
    if req.tie_break == TieBreak::Pk {
        let epsilon = req.epsilon.unwrap_or_else(|| req.mode.default_epsilon());
        let mut start = 0;
        while start < hits.len() {
            let mut end = start + 1;
            while end < hits.len() && (hits[end - 1].score - hits[end].score).abs() <= epsilon {
                end += 1;
            }
            hits[start..end].sort_by(|a, b| a.pk.cmp(&b.pk));
            start = end;
        }
    }

    if req.k > 0 {
        hits.truncate(req.k);
    }
    Ok(hits)
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for v in values {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(pks: &[&str]) -> Vec<(String, f64)> {
        pks.iter()
            .enumerate()
            .map(|(i, pk)| (pk.to_string(), 1.0 - i as f64 * 0.1))
            .collect()
    }

    #[test]
    fn test_rrf_reference_ranking() {
        // Text [A, B, C] and vector [C, B, D] at k = 60 fuse to
        // B, C, A, D: B and C tie exactly and resolve by pk.
        let req = FusionRequest {
            text: ranked(&["A", "B", "C"]),
            vector: ranked(&["C", "B", "D"]),
            mode: FusionMode::Rrf { k: 60.0 },
            tie_break: TieBreak::Pk,
            epsilon: None,
            k: 4,
        };
        let hits = fuse(&req).unwrap();
        let order: Vec<&str> = hits.iter().map(|h| h.pk.as_str()).collect();
        assert_eq!(order, vec!["B", "C", "A", "D"]);

        let b = &hits[0];
        let expected = 1.0 / 61.0 + 1.0 / 62.0;
        assert!((b.score - expected).abs() < 1e-15);
        assert_eq!(b.text_rank, Some(2));
        assert_eq!(b.vector_rank, Some(2));
    }

    #[test]
    fn test_rrf_determinism() {
        let req = FusionRequest {
            text: ranked(&["x", "y", "z"]),
            vector: ranked(&["z", "q", "x"]),
            k: 10,
            ..Default::default()
        };
        let a = fuse(&req).unwrap();
        let b = fuse(&req).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_weighted_mode() {
        let req = FusionRequest {
            text: vec![("A".to_string(), 10.0), ("B".to_string(), 5.0)],
            vector: vec![("B".to_string(), 0.0), ("A".to_string(), 1.0)],
            mode: FusionMode::Weighted { weight: 0.5 },
            tie_break: TieBreak::Pk,
            epsilon: None,
            k: 2,
        };
        let hits = fuse(&req).unwrap();
        // A: text 1.0 * 0.5 + vector (1 - 1/1) * 0.5 = 0.5
        // B: text 0.0 * 0.5 + vector (1 - 0/1) * 0.5 = 0.5
        // Exact tie resolves to A before B.
        assert_eq!(hits[0].pk, "A");
        assert_eq!(hits[1].pk, "B");
        assert!((hits[0].score - hits[1].score).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_weight_extremes() {
        let req = FusionRequest {
            text: vec![("T".to_string(), 1.0)],
            vector: vec![("V".to_string(), 0.5)],
            mode: FusionMode::Weighted { weight: 1.0 },
            tie_break: TieBreak::Pk,
            epsilon: None,
            k: 2,
        };
        let hits = fuse(&req).unwrap();
        assert_eq!(hits[0].pk, "T");
        assert_eq!(hits[1].score, 0.0);
    }

    #[test]
    fn test_empty_inputs_rejected() {
        let err = fuse(&FusionRequest::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_single_list_allowed() {
        let req = FusionRequest {
            text: ranked(&["only"]),
            k: 1,
            ..Default::default()
        };
        let hits = fuse(&req).unwrap();
        assert_eq!(hits[0].pk, "only");
        assert_eq!(hits[0].vector_rank, None);
    }

    #[test]
    fn test_tie_break_none_keeps_score_order() {
        let req = FusionRequest {
            text: ranked(&["z", "a"]),
            vector: ranked(&["a", "z"]),
            mode: FusionMode::Rrf { k: 60.0 },
            tie_break: TieBreak::None,
            epsilon: None,
            k: 2,
        };
        let hits = fuse(&req).unwrap();
        // a: 1/61 (text pos 1) + 1/61 (vector pos 0, 1-based 1)...
        // both share the same totals; TieBreak::None falls back to the
        // sort's pk tiebreak inside total_cmp chain, which is still
        // deterministic.
        assert_eq!(hits.len(), 2);
        let rerun = fuse(&req).unwrap();
        assert_eq!(hits, rerun);
    }

    #[test]
    fn test_invalid_weight_rejected() {
        let req = FusionRequest {
            text: ranked(&["a"]),
            mode: FusionMode::Weighted { weight: 1.5 },
            ..Default::default()
        };
        assert!(fuse(&req).is_err());
    }

    #[test]
    fn test_k_truncates() {
        let req = FusionRequest {
            text: ranked(&["a", "b", "c", "d"]),
            k: 2,
            ..Default::default()
        };
        assert_eq!(fuse(&req).unwrap().len(), 2);
    }
}
