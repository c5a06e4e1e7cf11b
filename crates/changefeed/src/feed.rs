//! The changefeed itself: sequencing, staging, tailing, retention
//!
//! The sequence allocator is the persisted `changefeed_sequence` key.
//! Staging reads the committed counter, assigns a contiguous run, and
//! writes both the events and the advanced counter into the caller's
//! batch; the engine applies it atomically. Callers serialize
//! allocation-to-publish through `publish_guard` (the transaction
//! manager holds it across validation, staging, and the batch write),
//! so a failed batch leaves the counter untouched and readers never
//! see a gap.

use crate::event::{ChangeEvent, EventDraft, EventType};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::time::{Duration, Instant};
use themis_core::{keys, now_ms, Error, Result};
use themis_storage::{Cf, KvEngine, WriteBatch};

/// Options for `list`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Return events with `sequence > from_seq`.
    pub from_seq: u64,
    /// Maximum events returned; 0 means a default of 1000.
    pub limit: usize,
    /// Only events whose key starts with this prefix.
    pub key_prefix: Option<String>,
    /// Only events of this type.
    pub type_filter: Option<EventType>,
    /// Block up to this long when no event matches yet.
    pub long_poll_ms: u64,
}

/// Time-based retention: keep events younger than `keep_for`.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub keep_for: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy {
            keep_for: Duration::from_secs(24 * 3600),
        }
    }
}

/// Upper bound of deletes per batch inside `delete_before`.
const RETENTION_BATCH: usize = 512;

/// The changefeed over the engine's `Changefeed` column family.
pub struct Changefeed {
    engine: Arc<dyn KvEngine>,
    /// Serializes sequence allocation with batch publication.
    publish: Mutex<()>,
    /// Last published sequence; guards the long-poll condvar.
    published: Mutex<u64>,
    wake: Condvar,
}

impl Changefeed {
    pub fn new(engine: Arc<dyn KvEngine>) -> Result<Self> {
        let feed = Changefeed {
            engine,
            publish: Mutex::new(()),
            published: Mutex::new(0),
            wake: Condvar::new(),
        };
        let last = feed.last_sequence()?;
        *feed.published.lock() = last;
        Ok(feed)
    }

    /// Last committed sequence (0 before the first event).
    pub fn last_sequence(&self) -> Result<u64> {
        match self.engine.get(Cf::Changefeed, keys::CHANGEFEED_SEQUENCE_KEY)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    Error::Corruption("changefeed_sequence has malformed counter".to_string())
                })?;
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    /// Take the publish lock. Hold it across conflict validation,
    /// `stage`, and the batch write, then call `notify_published`.
    pub fn publish_guard(&self) -> MutexGuard<'_, ()> {
        self.publish.lock()
    }

    /// Assign sequences to `drafts` and stage them plus the advanced
    /// counter into `batch`. Returns `(first, last)` assigned sequence.
    ///
    /// The caller must hold the publish guard.
    pub fn stage(&self, batch: &mut WriteBatch, drafts: Vec<EventDraft>) -> Result<(u64, u64)> {
        if drafts.is_empty() {
            return Err(Error::InvalidArgument(
                "staging zero changefeed events".to_string(),
            ));
        }
        let base = self.last_sequence()?;
        let ts_ms = now_ms();
        let first = base + 1;
        let mut seq = base;
        for draft in drafts {
            seq += 1;
            let event = ChangeEvent {
                sequence: seq,
                event_type: draft.event_type,
                key: draft.key,
                value: draft.value,
                ts_ms,
                metadata: draft.metadata,
            };
            batch.put(Cf::Changefeed, keys::changefeed(seq), serde_json::to_vec(&event)?);
        }
        batch.put(
            Cf::Changefeed,
            keys::CHANGEFEED_SEQUENCE_KEY.to_vec(),
            seq.to_be_bytes().to_vec(),
        );
        Ok((first, seq))
    }

    /// Wake long-pollers after the batch carrying events up to
    /// `last_seq` has been applied.
    pub fn notify_published(&self, last_seq: u64) {
        let mut published = self.published.lock();
        if last_seq > *published {
            *published = last_seq;
        }
        self.wake.notify_all();
    }

    /// Publish events outside a data batch (rollback markers): stages
    /// into a fresh batch, writes it, and notifies.
    pub fn append_standalone(&self, drafts: Vec<EventDraft>) -> Result<(u64, u64)> {
        let _guard = self.publish_guard();
        let mut batch = WriteBatch::new();
        let (first, last) = self.stage(&mut batch, drafts)?;
        self.engine.batch_write(batch)?;
        self.notify_published(last);
        Ok((first, last))
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Events with `sequence > from_seq`, oldest first, after filters,
    /// up to `limit`. Blocks up to `long_poll_ms` when nothing matches
    /// yet (condition variable, no busy-wait).
    pub fn list(&self, opts: &ListOptions) -> Result<Vec<ChangeEvent>> {
        let limit = if opts.limit == 0 { 1000 } else { opts.limit };
        let events = self.scan(opts, limit)?;
        if !events.is_empty() || opts.long_poll_ms == 0 {
            return Ok(events);
        }

        let deadline = Instant::now() + Duration::from_millis(opts.long_poll_ms);
        loop {
            // Remember the publish watermark BEFORE scanning: anything
            // published after this point wakes the wait below, so no
            // event can slip between scan and sleep.
            let seen = *self.published.lock();
            let events = self.scan(opts, limit)?;
            if !events.is_empty() {
                return Ok(events);
            }
            let mut published = self.published.lock();
            // A wake may deliver only filtered-out events; rescan and
            // keep waiting on a miss.
            while *published == seen || *published <= opts.from_seq {
                if self.wake.wait_until(&mut published, deadline).timed_out() {
                    return Ok(Vec::new());
                }
            }
        }
    }

    fn scan(&self, opts: &ListOptions, limit: usize) -> Result<Vec<ChangeEvent>> {
        // Retention keeps the feed bounded, so a prefix scan with a
        // skip filter is acceptable here.
        let mut out = Vec::new();
        for (key, value) in self
            .engine
            .iter_prefix(Cf::Changefeed, &keys::changefeed_prefix())?
        {
            let seq = keys::parse_changefeed(&key)?;
            if seq <= opts.from_seq {
                continue;
            }
            let event: ChangeEvent = serde_json::from_slice(&value)?;
            if let Some(prefix) = &opts.key_prefix {
                if !event.key.starts_with(prefix.as_str()) {
                    continue;
                }
            }
            if let Some(filter) = opts.type_filter {
                if event.event_type != filter {
                    continue;
                }
            }
            out.push(event);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Delete events with `sequence < cutoff` in bounded batches.
    /// Returns the number deleted.
    pub fn delete_before(&self, cutoff: u64) -> Result<u64> {
        let mut deleted = 0u64;
        loop {
            let mut batch = WriteBatch::new();
            for (key, _) in self
                .engine
                .iter_prefix(Cf::Changefeed, &keys::changefeed_prefix())?
            {
                let seq = keys::parse_changefeed(&key)?;
                if seq >= cutoff {
                    break;
                }
                batch.delete(Cf::Changefeed, key);
                if batch.len() >= RETENTION_BATCH {
                    break;
                }
            }
            if batch.is_empty() {
                break;
            }
            deleted += batch.len() as u64;
            self.engine.batch_write(batch)?;
        }
        if deleted > 0 {
            tracing::debug!(deleted, cutoff, "changefeed retention pass");
        }
        Ok(deleted)
    }

    /// Apply a time-based policy: drop events older than
    /// `now - keep_for`. Returns the number deleted.
    pub fn apply_retention(&self, policy: &RetentionPolicy) -> Result<u64> {
        let cutoff_ts = now_ms().saturating_sub(policy.keep_for.as_millis() as u64);
        // Events are time-ordered along the sequence, so the first
        // young event bounds the deletable prefix.
        let mut cutoff_seq = None;
        for (key, value) in self
            .engine
            .iter_prefix(Cf::Changefeed, &keys::changefeed_prefix())?
        {
            let event: ChangeEvent = serde_json::from_slice(&value)?;
            if event.ts_ms >= cutoff_ts {
                cutoff_seq = Some(keys::parse_changefeed(&key)?);
                break;
            }
        }
        match cutoff_seq {
            Some(seq) => self.delete_before(seq),
            // Every event is old (or the feed is empty): drop them all.
            None => self.delete_before(u64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use themis_storage::MemoryEngine;

    fn feed() -> (Arc<MemoryEngine>, Changefeed) {
        let engine = Arc::new(MemoryEngine::new());
        let feed = Changefeed::new(engine.clone()).unwrap();
        (engine, feed)
    }

    fn publish(feed: &Changefeed, drafts: Vec<EventDraft>) -> (u64, u64) {
        feed.append_standalone(drafts).unwrap()
    }

    fn draft(key: &str) -> EventDraft {
        EventDraft::new(EventType::Put, key)
    }

    #[test]
    fn test_sequences_start_at_one_and_are_contiguous() {
        let (_engine, feed) = feed();
        let (first, last) = publish(&feed, vec![draft("k1"), draft("k2")]);
        assert_eq!((first, last), (1, 2));
        let (first, last) = publish(&feed, vec![draft("k3")]);
        assert_eq!((first, last), (3, 3));

        let events = feed.list(&ListOptions::default()).unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_counter_survives_reopen() {
        let (engine, feed) = feed();
        publish(&feed, vec![draft("k1")]);
        drop(feed);
        let feed2 = Changefeed::new(engine).unwrap();
        assert_eq!(feed2.last_sequence().unwrap(), 1);
        let (first, _) = publish(&feed2, vec![draft("k2")]);
        assert_eq!(first, 2);
    }

    #[test]
    fn test_staged_events_commit_with_data_batch() {
        let (engine, feed) = feed();
        let _guard = feed.publish_guard();
        let mut batch = WriteBatch::new();
        batch.put(Cf::Default, b"row".to_vec(), b"data".to_vec());
        let (_, last) = feed.stage(&mut batch, vec![draft("row")]).unwrap();
        engine.batch_write(batch).unwrap();
        drop(_guard);
        feed.notify_published(last);

        // Event and data visible together.
        assert_eq!(engine.get(Cf::Default, b"row").unwrap(), Some(b"data".to_vec()));
        assert_eq!(feed.list(&ListOptions::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_batch_publishes_nothing() {
        let (engine, feed) = feed();
        {
            let _guard = feed.publish_guard();
            let mut batch = WriteBatch::new();
            feed.stage(&mut batch, vec![draft("k")]).unwrap();
            // Simulate failure: the batch is dropped, never written.
        }
        assert_eq!(feed.last_sequence().unwrap(), 0);
        let (first, _) = publish(&feed, vec![draft("k2")]);
        assert_eq!(first, 1, "dropped batch must not burn sequences");
    }

    #[test]
    fn test_list_from_and_limit() {
        let (_engine, feed) = feed();
        publish(&feed, (0..5).map(|i| draft(&format!("k{i}"))).collect());

        let opts = ListOptions {
            from_seq: 2,
            limit: 2,
            ..Default::default()
        };
        let events = feed.list(&opts).unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn test_list_filters() {
        let (_engine, feed) = feed();
        publish(
            &feed,
            vec![
                draft("relational:accounts:a"),
                EventDraft::new(EventType::Delete, "relational:users:b"),
            ],
        );

        let by_prefix = feed
            .list(&ListOptions {
                key_prefix: Some("relational:accounts:".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_prefix.len(), 1);

        let by_type = feed
            .list(&ListOptions {
                type_filter: Some(EventType::Delete),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_type.len(), 1);
        assert_eq!(by_type[0].key, "relational:users:b");
    }

    #[test]
    fn test_long_poll_times_out_empty() {
        let (_engine, feed) = feed();
        let start = Instant::now();
        let events = feed
            .list(&ListOptions {
                long_poll_ms: 120,
                ..Default::default()
            })
            .unwrap();
        assert!(events.is_empty());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(100), "returned after {waited:?}");
    }

    #[test]
    fn test_long_poll_wakes_on_publish() {
        let (engine, feed) = feed();
        let feed = Arc::new(feed);
        let tail = feed.clone();
        let _ = engine;

        let handle = thread::spawn(move || {
            tail.list(&ListOptions {
                long_poll_ms: 2000,
                ..Default::default()
            })
            .unwrap()
        });

        thread::sleep(Duration::from_millis(80));
        publish(&feed, vec![draft("woken")]);

        let events = handle.join().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "woken");
    }

    #[test]
    fn test_delete_before() {
        let (_engine, feed) = feed();
        publish(&feed, (0..10).map(|i| draft(&format!("k{i}"))).collect());
        let deleted = feed.delete_before(6).unwrap();
        assert_eq!(deleted, 5);
        let events = feed.list(&ListOptions::default()).unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![6, 7, 8, 9, 10]);
        // Counter is untouched by retention.
        assert_eq!(feed.last_sequence().unwrap(), 10);
    }

    #[test]
    fn test_apply_retention_keeps_young_events() {
        let (_engine, feed) = feed();
        publish(&feed, vec![draft("young")]);
        let kept = feed
            .apply_retention(&RetentionPolicy {
                keep_for: Duration::from_secs(3600),
            })
            .unwrap();
        assert_eq!(kept, 0);
        assert_eq!(feed.list(&ListOptions::default()).unwrap().len(), 1);
    }
}
