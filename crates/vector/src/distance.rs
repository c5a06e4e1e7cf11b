//! Distance kernels
//!
//! Cosine assumes both operands are already unit-normalized, which the
//! namespace guarantees at insert and query time; the kernel is then a
//! dot product and the distance `1 - dot`, clamped into `[0, 2]`
//! against floating-point drift.

use crate::types::DistanceMetric;

/// Dot product; operands must be the same length.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean distance.
pub fn l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

/// Normalize in place. Returns `false` for the zero vector, which has
/// no direction and cannot participate in cosine similarity.
pub fn normalize(v: &mut [f32]) -> bool {
    let norm = dot(v, v).sqrt();
    if norm <= f32::EPSILON {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}

/// Distance between two vectors under `metric`.
pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Cosine => (1.0 - dot(a, b)).clamp(0.0, 2.0),
        DistanceMetric::L2 => l2(a, b),
    }
}
