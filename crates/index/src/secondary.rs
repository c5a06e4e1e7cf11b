//! Secondary index manager
//!
//! Maintains composite `idx:<table>:<column>:<value>:<pk>` keys in the
//! `Index` column family. Presence is membership; values are empty.
//! Index maintenance is staged into the caller's `WriteBatch` so it
//! commits atomically with the row mutation.
//!
//! Query results are *candidate* sets: the order-preserving number
//! encoding normalizes every numeric type to f64, so integers beyond
//! 2^53 may collide and the executor re-checks predicates against the
//! row.

use crate::encoding::encode_value;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use themis_core::{keys, Entity, Error, Result, TypedValue};
use themis_storage::{Cf, KvEngine, WriteBatch};

const STAT_BUCKETS: usize = 64;

/// Per-column cardinality counters used for selectivity estimation.
///
/// Counters are advanced when mutations are staged, not when they
/// commit, so they are estimates; `rebuild_stats` restores exact counts
/// from the index itself.
#[derive(Debug, Clone)]
struct ColumnStats {
    total: u64,
    buckets: [u64; STAT_BUCKETS],
}

impl Default for ColumnStats {
    fn default() -> Self {
        ColumnStats {
            total: 0,
            buckets: [0; STAT_BUCKETS],
        }
    }
}

fn bucket_of(encoded: &[u8]) -> usize {
    let mut hasher = rustc_hash::FxHasher::default();
    encoded.hash(&mut hasher);
    (hasher.finish() as usize) % STAT_BUCKETS
}

/// Manager for all secondary indices.
pub struct SecondaryIndexManager {
    engine: Arc<dyn KvEngine>,
    stats: RwLock<FxHashMap<(String, String), ColumnStats>>,
}

impl SecondaryIndexManager {
    pub fn new(engine: Arc<dyn KvEngine>) -> Self {
        SecondaryIndexManager {
            engine,
            stats: RwLock::new(FxHashMap::default()),
        }
    }

    // ========================================================================
    // Index lifecycle
    // ========================================================================

    /// Create an index on `(table, column)` and backfill it from every
    /// existing row. Idempotent.
    pub fn create_index(&self, table: &str, column: &str) -> Result<()> {
        let def_key = keys::index_definition(table, column)?;
        if self.engine.get(Cf::Index, &def_key)?.is_some() {
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        batch.put(Cf::Index, def_key, b"{}".to_vec());

        // Backfill from existing rows.
        let prefix = keys::relational_prefix(table)?;
        let mut backfilled = 0usize;
        for (_key, blob) in self.engine.iter_prefix(Cf::Default, &prefix)? {
            let row = Entity::from_bytes(&blob)?;
            if let Some(entry) = self.entry_for(table, column, &row)? {
                batch.put(Cf::Index, entry, Vec::new());
                backfilled += 1;
            }
        }
        self.engine.batch_write(batch)?;
        tracing::debug!(table, column, backfilled, "secondary index created");
        self.rebuild_column_stats(table, column)?;
        Ok(())
    }

    /// Drop an index and all of its entries.
    pub fn drop_index(&self, table: &str, column: &str) -> Result<()> {
        let def_key = keys::index_definition(table, column)?;
        let mut batch = WriteBatch::new();
        batch.delete(Cf::Index, def_key);
        let prefix = keys::secondary_index_prefix(table, column)?;
        for (key, _) in self.engine.iter_prefix(Cf::Index, &prefix)? {
            batch.delete(Cf::Index, key);
        }
        self.engine.batch_write(batch)?;
        self.stats
            .write()
            .remove(&(table.to_string(), column.to_string()));
        Ok(())
    }

    /// True when `(table, column)` has an index definition.
    pub fn is_indexed(&self, table: &str, column: &str) -> Result<bool> {
        let def_key = keys::index_definition(table, column)?;
        Ok(self.engine.get(Cf::Index, &def_key)?.is_some())
    }

    /// All indexed columns of `table`, sorted by name.
    pub fn indexed_columns(&self, table: &str) -> Result<Vec<String>> {
        let prefix = format!("idxdef:{table}:").into_bytes();
        let mut columns = Vec::new();
        for (key, _) in self.engine.iter_prefix(Cf::Index, &prefix)? {
            let column = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            columns.push(column);
        }
        Ok(columns)
    }

    // ========================================================================
    // Mutation staging
    // ========================================================================

    /// Stage index maintenance for a row put.
    ///
    /// Emits deletes for entries whose column value changed and puts
    /// for the new values. Re-staging the same mutation is idempotent.
    pub fn stage_on_put(
        &self,
        batch: &mut WriteBatch,
        table: &str,
        new_row: &Entity,
        old_row: Option<&Entity>,
    ) -> Result<()> {
        for column in self.indexed_columns(table)? {
            let old_entry = match old_row {
                Some(old) => self.entry_for(table, &column, old)?,
                None => None,
            };
            let new_entry = self.entry_for(table, &column, new_row)?;
            if old_entry == new_entry {
                continue;
            }
            if let Some(entry) = old_entry {
                self.note_removed(table, &column, &entry);
                batch.delete(Cf::Index, entry);
            }
            if let Some(entry) = new_entry {
                self.note_added(table, &column, &entry);
                batch.put(Cf::Index, entry, Vec::new());
            }
        }
        Ok(())
    }

    /// Stage removal of every index entry referencing the row.
    pub fn stage_on_delete(&self, batch: &mut WriteBatch, table: &str, old_row: &Entity) -> Result<()> {
        for column in self.indexed_columns(table)? {
            if let Some(entry) = self.entry_for(table, &column, old_row)? {
                self.note_removed(table, &column, &entry);
                batch.delete(Cf::Index, entry);
            }
        }
        Ok(())
    }

    /// Build the index entry key for one row and column, if the row has
    /// an indexable value there.
    fn entry_for(&self, table: &str, column: &str, row: &Entity) -> Result<Option<Vec<u8>>> {
        let value = match row.field(column) {
            Some(v) => v,
            None => return Ok(None),
        };
        let encoded = match encode_value(value) {
            Ok(e) => e,
            Err(_) => {
                // Vectors, arrays, and objects are simply not indexed.
                tracing::trace!(table, column, ty = value.type_name(), "skipping non-indexable field");
                return Ok(None);
            }
        };
        Ok(Some(keys::secondary_index(table, column, &encoded, row.pk())?))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Primary keys whose `column` equals `value`.
    pub fn query_eq(&self, table: &str, column: &str, value: &TypedValue) -> Result<BTreeSet<String>> {
        self.require_index(table, column)?;
        let encoded = encode_value(value)?;
        let mut prefix = keys::secondary_index_prefix(table, column)?;
        prefix.extend_from_slice(&encoded);
        prefix.push(b':');
        let mut out = BTreeSet::new();
        for (key, _) in self.engine.iter_prefix(Cf::Index, &prefix)? {
            let pk = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            out.insert(pk);
        }
        Ok(out)
    }

    /// Primary keys whose `column` falls in `[lo, hi]` (bounds optional
    /// and individually inclusive/exclusive), ordered by value then pk.
    pub fn query_range(
        &self,
        table: &str,
        column: &str,
        lo: Option<&TypedValue>,
        hi: Option<&TypedValue>,
        inclusive_lo: bool,
        inclusive_hi: bool,
    ) -> Result<Vec<String>> {
        self.require_index(table, column)?;
        let lo_enc = lo.map(encode_value).transpose()?;
        let hi_enc = hi.map(encode_value).transpose()?;
        let prefix = keys::secondary_index_prefix(table, column)?;

        let mut out = Vec::new();
        for (key, _) in self.engine.iter_prefix(Cf::Index, &prefix)? {
            let (encoded, pk) = split_entry(&key[prefix.len()..])?;
            if let Some(lo_enc) = &lo_enc {
                let ord = encoded.cmp(lo_enc.as_slice());
                if ord == std::cmp::Ordering::Less || (!inclusive_lo && ord == std::cmp::Ordering::Equal)
                {
                    continue;
                }
            }
            if let Some(hi_enc) = &hi_enc {
                let ord = encoded.cmp(hi_enc.as_slice());
                if ord == std::cmp::Ordering::Greater
                    || (!inclusive_hi && ord == std::cmp::Ordering::Equal)
                {
                    // Entries are value-ordered; past the upper bound we
                    // only see larger values.
                    if ord == std::cmp::Ordering::Greater {
                        break;
                    }
                    continue;
                }
            }
            out.push(pk.to_string());
        }
        Ok(out)
    }

    /// Primary keys whose `column` equals any of `values`.
    pub fn query_in(
        &self,
        table: &str,
        column: &str,
        values: &[TypedValue],
    ) -> Result<BTreeSet<String>> {
        let mut out = BTreeSet::new();
        for value in values {
            out.extend(self.query_eq(table, column, value)?);
        }
        Ok(out)
    }

    fn require_index(&self, table: &str, column: &str) -> Result<()> {
        if !self.is_indexed(table, column)? {
            return Err(Error::NotFound(format!(
                "no index on {table}.{column}"
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Selectivity estimation
    // ========================================================================

    /// Estimated candidate count for an equality predicate.
    pub fn estimate_eq(&self, table: &str, column: &str, value: &TypedValue) -> u64 {
        let encoded = match encode_value(value) {
            Ok(e) => e,
            Err(_) => return u64::MAX,
        };
        let stats = self.stats.read();
        match stats.get(&(table.to_string(), column.to_string())) {
            Some(s) => s.buckets[bucket_of(&encoded)],
            None => u64::MAX,
        }
    }

    /// Total entry count for `(table, column)`.
    pub fn total_entries(&self, table: &str, column: &str) -> u64 {
        let stats = self.stats.read();
        stats
            .get(&(table.to_string(), column.to_string()))
            .map(|s| s.total)
            .unwrap_or(u64::MAX)
    }

    /// Recount stats for every index from the entries themselves.
    pub fn rebuild_stats(&self) -> Result<()> {
        let mut tables: Vec<(String, String)> = Vec::new();
        for (key, _) in self.engine.iter_prefix(Cf::Index, b"idxdef:")? {
            let s = String::from_utf8_lossy(&key);
            let mut parts = s.splitn(3, ':');
            let _ = parts.next();
            if let (Some(table), Some(column)) = (parts.next(), parts.next()) {
                tables.push((table.to_string(), column.to_string()));
            }
        }
        for (table, column) in tables {
            self.rebuild_column_stats(&table, &column)?;
        }
        Ok(())
    }

    fn rebuild_column_stats(&self, table: &str, column: &str) -> Result<()> {
        let prefix = keys::secondary_index_prefix(table, column)?;
        let mut stats = ColumnStats::default();
        for (key, _) in self.engine.iter_prefix(Cf::Index, &prefix)? {
            let (encoded, _pk) = split_entry(&key[prefix.len()..])?;
            stats.total += 1;
            stats.buckets[bucket_of(encoded)] += 1;
        }
        self.stats
            .write()
            .insert((table.to_string(), column.to_string()), stats);
        Ok(())
    }

    fn note_added(&self, table: &str, column: &str, entry: &[u8]) {
        let prefix_len = match keys::secondary_index_prefix(table, column) {
            Ok(p) => p.len(),
            Err(_) => return,
        };
        if let Ok((encoded, _)) = split_entry(&entry[prefix_len..]) {
            let mut stats = self.stats.write();
            let s = stats
                .entry((table.to_string(), column.to_string()))
                .or_default();
            s.total += 1;
            s.buckets[bucket_of(encoded)] += 1;
        }
    }

    fn note_removed(&self, table: &str, column: &str, entry: &[u8]) {
        let prefix_len = match keys::secondary_index_prefix(table, column) {
            Ok(p) => p.len(),
            Err(_) => return,
        };
        if let Ok((encoded, _)) = split_entry(&entry[prefix_len..]) {
            let mut stats = self.stats.write();
            if let Some(s) = stats.get_mut(&(table.to_string(), column.to_string())) {
                s.total = s.total.saturating_sub(1);
                let bucket = &mut s.buckets[bucket_of(encoded)];
                *bucket = bucket.saturating_sub(1);
            }
        }
    }
}

/// Split the suffix of an index key (after `idx:<t>:<c>:`) into the
/// encoded value and the primary key.
///
/// The encoding is self-delimiting: fixed width for scalars, 0x00
/// terminator for strings and binaries.
fn split_entry(suffix: &[u8]) -> Result<(&[u8], &str)> {
    let malformed = || Error::Corruption("malformed index entry".to_string());
    let tag = *suffix.first().ok_or_else(malformed)?;
    let value_len = match tag {
        0x05 | 0x08 | 0x09 => 1,
        0x10 => 9,
        0x20 | 0x21 => {
            let terminator = suffix[1..]
                .iter()
                .position(|&b| b == 0x00)
                .ok_or_else(malformed)?;
            terminator + 2
        }
        _ => return Err(malformed()),
    };
    if suffix.len() < value_len + 2 || suffix[value_len] != b':' {
        return Err(malformed());
    }
    let pk = std::str::from_utf8(&suffix[value_len + 1..]).map_err(|_| malformed())?;
    Ok((&suffix[..value_len], pk))
}
