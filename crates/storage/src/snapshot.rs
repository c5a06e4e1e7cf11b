//! Point-in-time snapshots
//!
//! A snapshot is a cloned view of every column family at a commit
//! version. Values are shared via `Arc`, so cloning the maps copies
//! pointers, not payloads. Snapshots never observe later commits.

use crate::engine::{Cf, PrefixIter};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A value plus the commit version that last wrote it.
#[derive(Debug, Clone)]
pub struct StoredValue {
    pub data: Arc<[u8]>,
    pub version: u64,
}

pub(crate) type CfMap = BTreeMap<Vec<u8>, StoredValue>;

/// Immutable point-in-time view of all column families.
#[derive(Clone)]
pub struct EngineSnapshot {
    version: u64,
    cfs: Arc<[CfMap; 5]>,
}

impl EngineSnapshot {
    pub(crate) fn new(version: u64, cfs: [CfMap; 5]) -> Self {
        EngineSnapshot {
            version,
            cfs: Arc::new(cfs),
        }
    }

    /// Commit version this snapshot was taken at.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Read a key as of the snapshot.
    pub fn get(&self, cf: Cf, key: &[u8]) -> Option<Vec<u8>> {
        self.cfs[cf.ordinal()].get(key).map(|v| v.data.to_vec())
    }

    /// Read a key with the version that wrote it.
    pub fn get_versioned(&self, cf: Cf, key: &[u8]) -> Option<(Vec<u8>, u64)> {
        self.cfs[cf.ordinal()]
            .get(key)
            .map(|v| (v.data.to_vec(), v.version))
    }

    /// True when the key exists in the snapshot.
    pub fn contains(&self, cf: Cf, key: &[u8]) -> bool {
        self.cfs[cf.ordinal()].contains_key(key)
    }

    /// Ordered iteration over all pairs with the given prefix.
    pub fn iter_prefix(&self, cf: Cf, prefix: &[u8]) -> PrefixIter {
        let map = &self.cfs[cf.ordinal()];
        let items: Vec<(Vec<u8>, Vec<u8>)> = map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.data.to_vec()))
            .collect();
        PrefixIter::new(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with(entries: &[(&[u8], &[u8], u64)]) -> EngineSnapshot {
        let mut cfs: [CfMap; 5] = Default::default();
        for (k, v, ver) in entries {
            cfs[Cf::Default.ordinal()].insert(
                k.to_vec(),
                StoredValue {
                    data: Arc::from(*v),
                    version: *ver,
                },
            );
        }
        EngineSnapshot::new(7, cfs)
    }

    #[test]
    fn test_snapshot_get() {
        let snap = snapshot_with(&[(b"k", b"v", 3)]);
        assert_eq!(snap.version(), 7);
        assert_eq!(snap.get(Cf::Default, b"k"), Some(b"v".to_vec()));
        assert_eq!(snap.get_versioned(Cf::Default, b"k"), Some((b"v".to_vec(), 3)));
        assert_eq!(snap.get(Cf::Default, b"missing"), None);
        assert_eq!(snap.get(Cf::Index, b"k"), None);
    }

    #[test]
    fn test_snapshot_prefix_iteration_is_ordered() {
        let snap = snapshot_with(&[
            (b"p:b", b"2", 1),
            (b"p:a", b"1", 1),
            (b"q:c", b"3", 1),
        ]);
        let keys: Vec<Vec<u8>> = snap
            .iter_prefix(Cf::Default, b"p:")
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"p:a".to_vec(), b"p:b".to_vec()]);
    }
}
