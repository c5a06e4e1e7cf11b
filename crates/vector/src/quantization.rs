//! Scalar 8-bit quantization
//!
//! One byte per dimension: each dimension is scaled into `[min, max]`
//! learned from the data. The flat search path scans codes for an
//! approximate candidate set, then re-ranks the top `4·k` with exact
//! distances, so recall loss stays at the tail.
//!
//! Ranges grow monotonically as vectors arrive; codes produced under an
//! older (narrower) range decode slightly off until the namespace
//! refreshes all codes at save/rebuild.

use crate::distance;
use crate::types::DistanceMetric;

/// Per-dimension min/max quantizer.
#[derive(Debug, Clone)]
pub struct Sq8Quantizer {
    mins: Vec<f32>,
    maxs: Vec<f32>,
}

impl Sq8Quantizer {
    pub fn new(dim: usize) -> Self {
        Sq8Quantizer {
            mins: vec![f32::MAX; dim],
            maxs: vec![f32::MIN; dim],
        }
    }

    /// Widen the per-dimension ranges to cover `vector`.
    pub fn observe(&mut self, vector: &[f32]) {
        for (d, &x) in vector.iter().enumerate() {
            if x < self.mins[d] {
                self.mins[d] = x;
            }
            if x > self.maxs[d] {
                self.maxs[d] = x;
            }
        }
    }

    fn scale(&self, d: usize) -> f32 {
        let span = self.maxs[d] - self.mins[d];
        if span <= f32::EPSILON {
            0.0
        } else {
            255.0 / span
        }
    }

    /// Encode a vector into one byte per dimension.
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        vector
            .iter()
            .enumerate()
            .map(|(d, &x)| {
                let scale = self.scale(d);
                if scale == 0.0 {
                    0
                } else {
                    (((x - self.mins[d]) * scale).round()).clamp(0.0, 255.0) as u8
                }
            })
            .collect()
    }

    /// Decode a code back into approximate floats.
    pub fn decode(&self, code: &[u8]) -> Vec<f32> {
        code.iter()
            .enumerate()
            .map(|(d, &c)| {
                let scale = self.scale(d);
                if scale == 0.0 {
                    // Constant dimension (or never observed).
                    if self.mins[d] <= self.maxs[d] {
                        self.mins[d]
                    } else {
                        0.0
                    }
                } else {
                    self.mins[d] + (c as f32) / scale
                }
            })
            .collect()
    }

    /// Approximate distance between a full-precision query and a code.
    pub fn asymmetric_distance(&self, metric: DistanceMetric, query: &[f32], code: &[u8]) -> f32 {
        let decoded = self.decode(code);
        distance::distance(metric, query, &decoded)
    }
}
