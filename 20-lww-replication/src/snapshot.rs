//! Snapshot wire format used for anti-entropy.
//!
//! A snapshot is a point-in-time copy of every record in a store, encoded as
//! a single line of JSON with named fields:
//!
//! ```json
//! {"records":{"k":{"value":"1","timestamp":100,"origin_message_id":"m1"}}}
//! ```
//!
//! The encoding never contains a raw newline, so a snapshot fits on one line
//! of the text protocol.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{error::SnapshotError, store::Record};

/// Immutable copy of a store's records keyed by key.
///
/// `BTreeMap` keeps the encoded form stable, which makes two snapshots of
/// identical stores byte-identical.
///
/// Exactly `records` must be present; any other object shape is a malformed
/// snapshot rather than an empty one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    pub records: BTreeMap<String, Record>,
}

impl Snapshot {
    pub fn new(records: BTreeMap<String, Record>) -> Self {
        Self { records }
    }

    pub fn encode(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a complete snapshot. Nothing is returned unless every record
    /// decoded successfully.
    pub fn decode(blob: &[u8]) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_slice(blob)?)
    }
}
