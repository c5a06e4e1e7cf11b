//! Atomic write batches
//!
//! A `WriteBatch` accumulates ordered put/delete operations across
//! column families. The engine applies the whole batch under one write
//! lock and stamps every mutation with a single commit version, so
//! readers never observe a partial batch.

use crate::engine::Cf;
use themis_core::{Error, Limits, Result};

/// One operation in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Write `key` → `value` in `cf`.
    Put {
        cf: Cf,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// Remove `key` from `cf`.
    Delete { cf: Cf, key: Vec<u8> },
}

impl BatchOp {
    /// The column family this op touches.
    pub fn cf(&self) -> Cf {
        match self {
            BatchOp::Put { cf, .. } | BatchOp::Delete { cf, .. } => *cf,
        }
    }

    /// The key this op touches.
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key, .. } => key,
        }
    }
}

/// Ordered list of operations applied atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        WriteBatch { ops: Vec::new() }
    }

    /// Append a put.
    pub fn put(&mut self, cf: Cf, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Put {
            cf,
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Append a delete.
    pub fn delete(&mut self, cf: Cf, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Delete { cf, key: key.into() });
        self
    }

    /// Append every op of `other`, preserving order.
    pub fn extend(&mut self, other: WriteBatch) -> &mut Self {
        self.ops.extend(other.ops);
        self
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when no operations are queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Operations in insertion order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Consume into the op list.
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    /// Check every op against the configured limits.
    pub fn validate(&self, limits: &Limits) -> Result<()> {
        if self.ops.len() > limits.max_batch_ops {
            return Err(Error::InvalidArgument(format!(
                "batch has {} ops, limit is {}",
                self.ops.len(),
                limits.max_batch_ops
            )));
        }
        for op in &self.ops {
            if op.key().is_empty() {
                return Err(Error::InvalidArgument("empty key in batch".to_string()));
            }
            if op.key().len() > limits.max_key_bytes {
                return Err(Error::InvalidArgument(format!(
                    "key of {} bytes exceeds limit {}",
                    op.key().len(),
                    limits.max_key_bytes
                )));
            }
            if let BatchOp::Put { value, .. } = op {
                if value.len() > limits.max_value_bytes {
                    return Err(Error::InvalidArgument(format!(
                        "value of {} bytes exceeds limit {}",
                        value.len(),
                        limits.max_value_bytes
                    )));
                }
            }
        }
        Ok(())
    }
}
