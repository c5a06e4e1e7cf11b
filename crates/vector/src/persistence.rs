//! Namespace persistence
//!
//! Three artifacts per namespace directory:
//!
//! - `meta.txt`: JSON: full config, live count, backend name
//! - `labels.txt`: one `label<TAB>pk` line per live vector
//! - `index.bin`: vectors plus the algorithm-specific payload
//!
//! Save compacts first, so persisted labels are dense and tombstones
//! never reach disk. Any cross-file inconsistency on load is
//! `Corruption`; `rebuild_from_storage` on the manager is the recovery
//! path.

use crate::backend::AnnBackend;
use crate::flat::FlatBackend;
use crate::hnsw::HnswBackend;
use crate::namespace::Namespace;
use crate::types::{AnnAlgorithm, VectorConfig};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use themis_core::{Error, Result};

const MAGIC: u32 = 0x544D_5658; // "TMVX"
const VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    config: VectorConfig,
    count: usize,
    backend: String,
}

/// Read just the persisted dimension, if a namespace was saved here.
pub fn persisted_dim(dir: &Path) -> Result<Option<usize>> {
    let path = dir.join("meta.txt");
    if !path.exists() {
        return Ok(None);
    }
    let meta: Meta = serde_json::from_slice(&fs::read(path)?)
        .map_err(|e| Error::Corruption(format!("meta.txt malformed: {e}")))?;
    Ok(Some(meta.config.dim))
}

/// Persist a namespace. Compacts in place first.
pub fn save(ns: &mut Namespace, dir: &Path) -> Result<()> {
    ns.compact();
    fs::create_dir_all(dir)?;

    let entries = ns.live_entries();
    let meta = Meta {
        config: ns.config().clone(),
        count: entries.len(),
        backend: ns.backend_name().to_string(),
    };
    fs::write(dir.join("meta.txt"), serde_json::to_vec_pretty(&meta)?)?;

    let mut labels = String::new();
    for (label, (pk, _)) in entries.iter().enumerate() {
        labels.push_str(&format!("{label}\t{pk}\n"));
    }
    fs::write(dir.join("labels.txt"), labels)?;

    let file = fs::File::create(dir.join("index.bin"))?;
    let mut w = BufWriter::new(file);
    w.write_u32::<LittleEndian>(MAGIC)?;
    w.write_u32::<LittleEndian>(VERSION)?;
    w.write_u32::<LittleEndian>(ns.config().dim as u32)?;
    w.write_u64::<LittleEndian>(entries.len() as u64)?;
    for (_, vector) in &entries {
        for &x in vector {
            w.write_f32::<LittleEndian>(x)?;
        }
    }
    let payload = ns.backend_payload();
    w.write_u64::<LittleEndian>(payload.len() as u64)?;
    w.write_all(&payload)?;
    w.flush()?;

    tracing::info!(
        namespace = %ns.name(),
        count = entries.len(),
        backend = ns.backend_name(),
        dir = %dir.display(),
        "vector namespace saved"
    );
    Ok(())
}

/// Load a namespace saved by `save`.
pub fn load(name: &str, dir: &Path) -> Result<Namespace> {
    let corrupt = |what: String| Error::Corruption(format!("vector namespace {name}: {what}"));

    let meta_bytes = fs::read(dir.join("meta.txt"))
        .map_err(|e| corrupt(format!("meta.txt unreadable: {e}")))?;
    let meta: Meta = serde_json::from_slice(&meta_bytes)
        .map_err(|e| corrupt(format!("meta.txt malformed: {e}")))?;

    let labels_text = fs::read_to_string(dir.join("labels.txt"))
        .map_err(|e| corrupt(format!("labels.txt unreadable: {e}")))?;
    let mut pks: Vec<String> = Vec::new();
    for (i, line) in labels_text.lines().enumerate() {
        let (label, pk) = line
            .split_once('\t')
            .ok_or_else(|| corrupt(format!("labels.txt line {i} malformed")))?;
        let label: usize = label
            .parse()
            .map_err(|_| corrupt(format!("labels.txt line {i}: bad label")))?;
        if label != i {
            return Err(corrupt(format!("labels.txt line {i}: non-dense label")));
        }
        pks.push(pk.to_string());
    }
    if pks.len() != meta.count {
        return Err(corrupt(format!(
            "labels.txt has {} entries, meta.txt says {}",
            pks.len(),
            meta.count
        )));
    }

    let file = fs::File::open(dir.join("index.bin"))
        .map_err(|e| corrupt(format!("index.bin unreadable: {e}")))?;
    let mut r = BufReader::new(file);
    if r.read_u32::<LittleEndian>().map_err(|e| corrupt(e.to_string()))? != MAGIC {
        return Err(corrupt("index.bin: bad magic".to_string()));
    }
    if r.read_u32::<LittleEndian>().map_err(|e| corrupt(e.to_string()))? != VERSION {
        return Err(corrupt("index.bin: unsupported version".to_string()));
    }
    let dim = r.read_u32::<LittleEndian>().map_err(|e| corrupt(e.to_string()))? as usize;
    if dim != meta.config.dim {
        return Err(corrupt(format!(
            "index.bin dim {dim} != meta dim {}",
            meta.config.dim
        )));
    }
    let count = r.read_u64::<LittleEndian>().map_err(|e| corrupt(e.to_string()))? as usize;
    if count != meta.count {
        return Err(corrupt(format!(
            "index.bin has {count} vectors, meta.txt says {}",
            meta.count
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for pk in pks {
        let mut vector = vec![0f32; dim];
        for x in vector.iter_mut() {
            *x = r
                .read_f32::<LittleEndian>()
                .map_err(|_| corrupt("index.bin truncated vectors".to_string()))?;
        }
        entries.push((pk, vector));
    }

    let payload_len = r.read_u64::<LittleEndian>().map_err(|e| corrupt(e.to_string()))? as usize;
    let mut payload = vec![0u8; payload_len];
    r.read_exact(&mut payload)
        .map_err(|_| corrupt("index.bin truncated payload".to_string()))?;

    let backend: Option<Box<dyn AnnBackend>> = match meta.config.algorithm {
        AnnAlgorithm::Flat => {
            if meta.backend != "flat" {
                return Err(corrupt(format!(
                    "meta backend {:?} does not match flat algorithm",
                    meta.backend
                )));
            }
            Some(Box::new(FlatBackend::new()))
        }
        AnnAlgorithm::Hnsw => {
            if meta.backend != "hnsw" {
                return Err(corrupt(format!(
                    "meta backend {:?} does not match hnsw algorithm",
                    meta.backend
                )));
            }
            let hnsw = HnswBackend::deserialize(
                &payload,
                meta.config.m,
                meta.config.ef_construction,
                meta.config.ef_search,
            )?;
            if hnsw.nodes.len() != count {
                return Err(corrupt(format!(
                    "hnsw payload has {} nodes, expected {count}",
                    hnsw.nodes.len()
                )));
            }
            Some(Box::new(hnsw))
        }
    };

    Ok(Namespace::from_parts(
        name.to_string(),
        meta.config,
        entries,
        backend,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DistanceMetric, Quantization};
    use tempfile::TempDir;

    fn filled(config: VectorConfig, n: usize) -> Namespace {
        let dim = config.dim;
        let mut ns = Namespace::new("chunks", config);
        for i in 0..n {
            let v: Vec<f32> = (0..dim)
                .map(|d| 1.0 + ((i * 13 + d * 5) % 23) as f32)
                .collect();
            ns.add(&format!("pk-{i:03}"), v).unwrap();
        }
        ns
    }

    #[test]
    fn test_save_load_flat_preserves_search() {
        let dir = TempDir::new().unwrap();
        let mut ns = filled(VectorConfig::new(4), 20);
        let probe = vec![2.0, 3.0, 4.0, 5.0];
        let before = ns.search_knn(&probe, 5, None).unwrap();

        save(&mut ns, dir.path()).unwrap();
        drop(ns);

        let loaded = load("chunks", dir.path()).unwrap();
        let after = loaded.search_knn(&probe, 5, None).unwrap();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(&after) {
            assert_eq!(b.pk, a.pk);
            assert!((b.distance - a.distance).abs() < 1e-6);
        }
    }

    #[test]
    fn test_save_load_hnsw_preserves_graph() {
        let dir = TempDir::new().unwrap();
        let config = VectorConfig::new(6)
            .with_metric(DistanceMetric::L2)
            .with_algorithm(AnnAlgorithm::Hnsw);
        let mut ns = filled(config, 120);
        let probe = vec![3.0; 6];
        let before = ns.search_knn(&probe, 10, None).unwrap();

        save(&mut ns, dir.path()).unwrap();
        let loaded = load("chunks", dir.path()).unwrap();
        let after = loaded.search_knn(&probe, 10, None).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_save_drops_tombstones() {
        let dir = TempDir::new().unwrap();
        let mut ns = filled(VectorConfig::new(4), 10);
        ns.remove("pk-003");
        save(&mut ns, dir.path()).unwrap();

        let loaded = load("chunks", dir.path()).unwrap();
        assert_eq!(loaded.live_count(), 9);
        assert!(!loaded.contains("pk-003"));

        let labels = fs::read_to_string(dir.path().join("labels.txt")).unwrap();
        assert_eq!(labels.lines().count(), 9);
    }

    #[test]
    fn test_quantized_namespace_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = VectorConfig::new(4)
            .with_metric(DistanceMetric::L2)
            .with_quantization(Quantization::Sq8);
        let mut ns = filled(config, 30);
        save(&mut ns, dir.path()).unwrap();
        let loaded = load("chunks", dir.path()).unwrap();
        assert_eq!(loaded.config().quantization, Quantization::Sq8);
        assert_eq!(loaded.live_count(), 30);
    }

    #[test]
    fn test_inconsistent_labels_detected() {
        let dir = TempDir::new().unwrap();
        let mut ns = filled(VectorConfig::new(4), 5);
        save(&mut ns, dir.path()).unwrap();

        // Drop one labels line: count no longer matches meta.
        let labels = fs::read_to_string(dir.path().join("labels.txt")).unwrap();
        let truncated: String = labels.lines().take(4).map(|l| format!("{l}\n")).collect();
        fs::write(dir.path().join("labels.txt"), truncated).unwrap();

        let err = load("chunks", dir.path()).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn test_bad_magic_detected() {
        let dir = TempDir::new().unwrap();
        let mut ns = filled(VectorConfig::new(4), 3);
        save(&mut ns, dir.path()).unwrap();
        let mut bytes = fs::read(dir.path().join("index.bin")).unwrap();
        bytes[0] ^= 0xFF;
        fs::write(dir.path().join("index.bin"), bytes).unwrap();
        assert!(matches!(
            load("chunks", dir.path()).unwrap_err(),
            Error::Corruption(_)
        ));
    }

    #[test]
    fn test_persisted_dim() {
        let dir = TempDir::new().unwrap();
        assert_eq!(persisted_dim(dir.path()).unwrap(), None);
        let mut ns = filled(VectorConfig::new(4), 2);
        save(&mut ns, dir.path()).unwrap();
        assert_eq!(persisted_dim(dir.path()).unwrap(), Some(4));
    }
}
