//! In-memory record store with last-write-wins merging.
//!
//! Each node owns one [`Store`]. It keeps the current [`Record`] for every key
//! together with a ledger of message ids that have already been applied. Both
//! live behind one reader/writer lock because "has this message been seen"
//! and "is this write newer than what we hold" must be answered as a single
//! step.
//!
//! Conflict resolution is purely timestamp based: a write replaces the stored
//! record only if its timestamp is strictly greater. Equal timestamps keep the
//! incumbent. Timestamps come from each writer's wall clock, so two writes
//! issued within the same nanosecond, or across skewed clocks, can resolve in
//! a way that does not match real-time order. That weakness is accepted.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{error::SnapshotError, snapshot::Snapshot};

/// The stored value for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub value: String,
    /// Nanoseconds since the Unix epoch on the writer's clock.
    pub timestamp: i64,
    /// Id of the mutation that produced this record. Carried in snapshots so
    /// the receiving node can mark the mutation as seen.
    #[serde(default)]
    pub origin_message_id: String,
}

/// What a `put` or `delete` did. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// Timestamp not strictly greater than the stored record (or, for a
    /// delete, no record to remove).
    Stale,
    /// The message id had already been applied.
    Duplicate,
}

/// Summary of one snapshot merge, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub applied: usize,
    pub skipped: usize,
}

/// Read-only counters exposed by the `STATS` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_keys: usize,
    pub processed_messages: usize,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, Record>,
    seen: HashSet<String>,
}

impl Inner {
    /// Records `message_id` in the ledger. Returns `false` if it was already
    /// there. Empty ids are never recorded.
    fn mark_seen(&mut self, message_id: &str) -> bool {
        if message_id.is_empty() {
            return true;
        }
        self.seen.insert(message_id.to_string())
    }

    fn is_newer(&self, key: &str, timestamp: i64) -> bool {
        self.records
            .get(key)
            .is_none_or(|current| timestamp > current.timestamp)
    }
}

/// Thread-safe record map plus dedup ledger.
///
/// The ledger grows for the lifetime of the process; message ids are never
/// evicted.
#[derive(Default)]
pub struct Store {
    inner: RwLock<Inner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` under `key` unless `message_id` was already applied or
    /// the stored record is at least as new as `timestamp`.
    pub fn put(&self, key: &str, value: &str, timestamp: i64, message_id: &str) -> WriteOutcome {
        let mut inner = self.inner.write();
        if !inner.mark_seen(message_id) {
            return WriteOutcome::Duplicate;
        }
        if !inner.is_newer(key, timestamp) {
            return WriteOutcome::Stale;
        }

        inner.records.insert(
            key.to_string(),
            Record {
                value: value.to_string(),
                timestamp,
                origin_message_id: message_id.to_string(),
            },
        );
        WriteOutcome::Applied
    }

    /// Removes `key` if it exists and `timestamp` is strictly newer than the
    /// stored record. Deleting a missing key is a stale no-op, but the
    /// message id is still recorded.
    pub fn delete(&self, key: &str, timestamp: i64, message_id: &str) -> WriteOutcome {
        let mut inner = self.inner.write();
        if !inner.mark_seen(message_id) {
            return WriteOutcome::Duplicate;
        }

        match inner.records.get(key) {
            Some(current) if timestamp > current.timestamp => {
                inner.records.remove(key);
                WriteOutcome::Applied
            }
            _ => WriteOutcome::Stale,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.read().records.get(key).map(|r| r.value.clone())
    }

    /// Full record for `key`, including its timestamp and origin id.
    pub fn record(&self, key: &str) -> Option<Record> {
        self.inner.read().records.get(key).cloned()
    }

    /// All live keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.read().records.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Copies every record under the read lock. The copy is consistent with
    /// itself but may be stale by the time a peer merges it.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read();
        let records: BTreeMap<String, Record> = inner
            .records
            .iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect();
        Snapshot::new(records)
    }

    /// Entry point for a raw snapshot as received from a peer. Decodes `blob`
    /// completely, then merges it; a malformed payload leaves the store
    /// untouched.
    pub fn apply_snapshot_blob(&self, blob: &[u8]) -> Result<MergeReport, SnapshotError> {
        let snapshot = Snapshot::decode(blob)?;
        Ok(self.apply_snapshot(snapshot))
    }

    /// Merges `snapshot` key by key: an incoming record replaces the local
    /// one only if its timestamp is strictly greater. Every non-empty origin
    /// id is added to the ledger, winner or not, so a late live broadcast of
    /// the same mutation is dropped as a duplicate.
    pub fn apply_snapshot(&self, snapshot: Snapshot) -> MergeReport {
        let mut report = MergeReport::default();
        let mut inner = self.inner.write();

        for (key, incoming) in snapshot.records {
            inner.mark_seen(&incoming.origin_message_id);
            if inner.is_newer(&key, incoming.timestamp) {
                inner.records.insert(key, incoming);
                report.applied += 1;
            } else {
                report.skipped += 1;
            }
        }

        report
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.read();
        StoreStats {
            total_keys: inner.records.len(),
            processed_messages: inner.seen.len(),
        }
    }
}
