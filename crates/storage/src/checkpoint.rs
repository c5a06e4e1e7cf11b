//! Checkpoints: consistent on-disk copies of all column families
//!
//! Layout of a checkpoint directory:
//!
//! ```text
//! MANIFEST.json        format version, commit version, per-file CRC32
//! cf_default.bin       bincode Vec<(key, value, version)>
//! cf_index.bin
//! cf_graph.bin
//! cf_content.bin
//! cf_changefeed.bin
//! ```
//!
//! Files are written to a temporary name and renamed into place;
//! the manifest is written last, so a directory without a readable
//! manifest is not a checkpoint. Any checksum mismatch on load is
//! `Corruption`.

use crate::engine::Cf;
use crate::snapshot::{CfMap, StoredValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use themis_core::{Error, Result};

/// Manifest format version. Bumped on layout changes.
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    commit_version: u64,
    files: BTreeMap<String, FileEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    crc32: u32,
    entries: usize,
}

/// Summary of a written checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    /// Commit version captured by the checkpoint.
    pub commit_version: u64,
    /// Total key count across all column families.
    pub total_entries: usize,
}

fn cf_file_name(cf: Cf) -> String {
    format!("cf_{}.bin", cf.name())
}

/// Serialize all column families into `dir`.
pub(crate) fn save(dir: &Path, cfs: &[CfMap; 5], commit_version: u64) -> Result<CheckpointInfo> {
    fs::create_dir_all(dir)?;
    let mut files = BTreeMap::new();
    let mut total_entries = 0usize;

    for cf in Cf::ALL {
        let map = &cfs[cf.ordinal()];
        let rows: Vec<(&Vec<u8>, &[u8], u64)> = map
            .iter()
            .map(|(k, v)| (k, v.data.as_ref(), v.version))
            .collect();
        let bytes = bincode::serialize(&rows)
            .map_err(|e| Error::Corruption(format!("checkpoint serialize failed: {e}")))?;
        let crc = crc32fast::hash(&bytes);

        let name = cf_file_name(cf);
        let tmp = dir.join(format!("{name}.tmp"));
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, dir.join(&name))?;

        total_entries += rows.len();
        files.insert(
            name,
            FileEntry {
                crc32: crc,
                entries: rows.len(),
            },
        );
    }

    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        commit_version,
        files,
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
    let tmp = dir.join("MANIFEST.json.tmp");
    fs::write(&tmp, &manifest_bytes)?;
    fs::rename(&tmp, dir.join("MANIFEST.json"))?;

    tracing::info!(
        commit_version,
        total_entries,
        dir = %dir.display(),
        "checkpoint written"
    );
    Ok(CheckpointInfo {
        commit_version,
        total_entries,
    })
}

/// Load all column families from `dir`.
pub(crate) fn load(dir: &Path) -> Result<([CfMap; 5], u64)> {
    let manifest_bytes = fs::read(dir.join("MANIFEST.json"))
        .map_err(|e| Error::Corruption(format!("checkpoint manifest unreadable: {e}")))?;
    let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| Error::Corruption(format!("checkpoint manifest malformed: {e}")))?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(Error::Corruption(format!(
            "unsupported checkpoint format {} (expected {})",
            manifest.format_version, FORMAT_VERSION
        )));
    }

    let mut cfs: [CfMap; 5] = Default::default();
    for cf in Cf::ALL {
        let name = cf_file_name(cf);
        let entry = manifest
            .files
            .get(&name)
            .ok_or_else(|| Error::Corruption(format!("manifest missing file {name}")))?;
        let bytes = fs::read(dir.join(&name))
            .map_err(|e| Error::Corruption(format!("checkpoint file {name} unreadable: {e}")))?;
        if crc32fast::hash(&bytes) != entry.crc32 {
            return Err(Error::Corruption(format!(
                "checksum mismatch in checkpoint file {name}"
            )));
        }
        let rows: Vec<(Vec<u8>, Vec<u8>, u64)> = bincode::deserialize(&bytes)
            .map_err(|e| Error::Corruption(format!("checkpoint file {name} malformed: {e}")))?;
        if rows.len() != entry.entries {
            return Err(Error::Corruption(format!(
                "checkpoint file {name} has {} entries, manifest says {}",
                rows.len(),
                entry.entries
            )));
        }
        let map = &mut cfs[cf.ordinal()];
        for (key, value, version) in rows {
            map.insert(
                key,
                StoredValue {
                    data: Arc::from(value.into_boxed_slice()),
                    version,
                },
            );
        }
    }
    Ok((cfs, manifest.commit_version))
}
