//! Saga log: compensation for partially applied commits
//!
//! Every staged mutation pushes a reverse operation capturing the
//! state it replaces. Compensation runs the reverse ops in LIFO order;
//! each is idempotent (restoring a key to a captured value twice is a
//! no-op the second time), so re-running a compensation is safe.
//!
//! Reverse ops only run for segments that were actually applied: the
//! KV batch is atomic, so compensation is needed exactly when the
//! batch committed and a later step (vector index apply) failed.

use std::sync::Arc;
use themis_core::{Error, Result};
use themis_storage::{Cf, KvEngine};
use themis_vector::VectorIndexManager;

/// One reverse operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SagaOp {
    /// Restore a KV key to its prior value (`None` = delete).
    RestoreKey {
        cf: Cf,
        key: Vec<u8>,
        prior: Option<Vec<u8>>,
    },
    /// Restore a vector index entry to its prior embedding
    /// (`None` = remove).
    RestoreVector {
        namespace: String,
        pk: String,
        prior: Option<Vec<f32>>,
    },
}

/// Reverse operations in push order; compensation pops from the back.
#[derive(Debug, Clone, Default)]
pub struct SagaLog {
    ops: Vec<SagaOp>,
}

impl SagaLog {
    pub fn new() -> Self {
        SagaLog { ops: Vec::new() }
    }

    pub fn push(&mut self, op: SagaOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[SagaOp] {
        &self.ops
    }

    /// Run every reverse op in LIFO order. All ops are attempted even
    /// after a failure; the first error is returned at the end.
    pub fn compensate(
        &self,
        engine: &Arc<dyn KvEngine>,
        vectors: &VectorIndexManager,
    ) -> Result<usize> {
        let mut applied = 0usize;
        let mut first_error: Option<Error> = None;
        for op in self.ops.iter().rev() {
            let outcome = match op {
                SagaOp::RestoreKey { cf, key, prior } => match prior {
                    Some(value) => engine.put(*cf, key, value),
                    None => engine.delete(*cf, key),
                },
                SagaOp::RestoreVector {
                    namespace,
                    pk,
                    prior,
                } => match prior {
                    Some(embedding) => vectors.add(namespace, pk, embedding.clone()),
                    None => vectors.remove(namespace, pk).map(|_| ()),
                },
            };
            match outcome {
                Ok(()) => applied += 1,
                Err(e) => {
                    tracing::error!(error = %e, "saga compensation step failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(applied),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use themis_storage::MemoryEngine;
    use themis_vector::VectorConfig;

    fn setup() -> (Arc<dyn KvEngine>, VectorIndexManager) {
        let engine: Arc<dyn KvEngine> = Arc::new(MemoryEngine::new());
        let vectors = VectorIndexManager::new();
        vectors.init("v", VectorConfig::new(2)).unwrap();
        (engine, vectors)
    }

    #[test]
    fn test_compensate_restores_in_lifo_order() {
        let (engine, vectors) = setup();
        engine.put(Cf::Default, b"k", b"override").unwrap();

        let mut saga = SagaLog::new();
        // Two stacked writes to the same key: LIFO must end on the
        // oldest prior (the original state).
        saga.push(SagaOp::RestoreKey {
            cf: Cf::Default,
            key: b"k".to_vec(),
            prior: None, // originally absent
        });
        saga.push(SagaOp::RestoreKey {
            cf: Cf::Default,
            key: b"k".to_vec(),
            prior: Some(b"intermediate".to_vec()),
        });

        saga.compensate(&engine, &vectors).unwrap();
        assert_eq!(engine.get(Cf::Default, b"k").unwrap(), None);
    }

    #[test]
    fn test_compensate_vector_ops() {
        let (engine, vectors) = setup();
        vectors.add("v", "p1", vec![1.0, 0.0]).unwrap();
        vectors.add("v", "p2", vec![0.0, 1.0]).unwrap();

        let mut saga = SagaLog::new();
        // p1 did not exist before the transaction; p2 held [1, 0].
        saga.push(SagaOp::RestoreVector {
            namespace: "v".to_string(),
            pk: "p1".to_string(),
            prior: None,
        });
        saga.push(SagaOp::RestoreVector {
            namespace: "v".to_string(),
            pk: "p2".to_string(),
            prior: Some(vec![1.0, 0.0]),
        });

        saga.compensate(&engine, &vectors).unwrap();
        assert!(!vectors.contains("v", "p1").unwrap());
        let hits = vectors.search_knn("v", &[1.0, 0.0], 1, None).unwrap();
        assert_eq!(hits[0].pk, "p2");
        assert!(hits[0].distance < 1e-6);
    }

    #[test]
    fn test_compensation_is_idempotent() {
        let (engine, vectors) = setup();
        engine.put(Cf::Default, b"k", b"dirty").unwrap();

        let mut saga = SagaLog::new();
        saga.push(SagaOp::RestoreKey {
            cf: Cf::Default,
            key: b"k".to_vec(),
            prior: Some(b"clean".to_vec()),
        });

        saga.compensate(&engine, &vectors).unwrap();
        let once = engine.get(Cf::Default, b"k").unwrap();
        saga.compensate(&engine, &vectors).unwrap();
        let twice = engine.get(Cf::Default, b"k").unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice, Some(b"clean".to_vec()));
    }

    #[test]
    fn test_compensate_continues_past_failures() {
        let (engine, vectors) = setup();
        let mut saga = SagaLog::new();
        // Unknown namespace: this step fails.
        saga.push(SagaOp::RestoreKey {
            cf: Cf::Default,
            key: b"k".to_vec(),
            prior: Some(b"restored".to_vec()),
        });
        saga.push(SagaOp::RestoreVector {
            namespace: "ghost".to_string(),
            pk: "p".to_string(),
            prior: None,
        });

        let err = saga.compensate(&engine, &vectors).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        // The later (LIFO-earlier) failure did not stop the key restore.
        assert_eq!(
            engine.get(Cf::Default, b"k").unwrap(),
            Some(b"restored".to_vec())
        );
    }
}
