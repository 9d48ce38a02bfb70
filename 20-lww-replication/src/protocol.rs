//! Line-oriented command protocol spoken by clients and peers.
//!
//! Each request is one line. The first whitespace-separated word is the
//! command (case-insensitive); mutations may carry `|`-separated metadata
//! written by the node that originated them:
//!
//! ```text
//! SET color blue|msg-id:0b0d5e0c-...|ts:1754412219586286400
//! DEL color|msg-id:41a2...|ts:1754412219999999999
//! ```
//!
//! A mutation without `msg-id` comes straight from a client and is stamped
//! and broadcast by the receiving node. A mutation with `msg-id` was already
//! stamped elsewhere and is only applied.

use std::fmt;

use uuid::Uuid;

use crate::{clock::Clock, error::ParseError};

const MESSAGE_ID_PREFIX: &str = "msg-id:";
const TIMESTAMP_PREFIX: &str = "ts:";

/// A change to one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Set { key: String, value: String },
    Delete { key: String },
}

impl Mutation {
    pub fn key(&self) -> &str {
        match self {
            Mutation::Set { key, .. } | Mutation::Delete { key } => key,
        }
    }
}

/// Identity and ordering attached to a mutation by its originating node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub message_id: String,
    pub timestamp: i64,
}

impl Stamp {
    /// Fresh globally unique id plus the current reading of `clock`.
    pub fn fresh(clock: &Clock) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            timestamp: clock.now(),
        }
    }
}

/// Metadata suffixes found on an incoming mutation line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub message_id: Option<String>,
    pub timestamp: Option<i64>,
}

impl Metadata {
    /// The stamp carried by a replicated mutation, or `None` when the line
    /// came from a client and still needs one. A replicated line without
    /// `ts:` takes the local clock reading.
    pub fn into_stamp(self, clock: &Clock) -> Option<Stamp> {
        let message_id = self.message_id?;
        Some(Stamp {
            message_id,
            timestamp: self.timestamp.unwrap_or_else(|| clock.now()),
        })
    }
}

/// A mutation with its stamp, ready to apply or to forward to peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampedMutation {
    pub mutation: Mutation,
    pub stamp: Stamp,
}

impl fmt::Display for StampedMutation {
    /// Renders the line peers receive, e.g. `SET k v|msg-id:<id>|ts:<nanos>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mutation {
            Mutation::Set { key, value } => write!(f, "SET {key} {value}")?,
            Mutation::Delete { key } => write!(f, "DEL {key}")?,
        }
        write!(
            f,
            "|{MESSAGE_ID_PREFIX}{}|{TIMESTAMP_PREFIX}{}",
            self.stamp.message_id, self.stamp.timestamp
        )
    }
}

/// Requests understood by a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Mutate {
        mutation: Mutation,
        metadata: Metadata,
    },
    Get {
        key: String,
    },
    /// Reply with this node's full snapshot.
    Sync,
    /// Pull snapshots from every peer now.
    SyncRequest,
    Stats,
    Keys,
}

impl Request {
    /// Parses one line of input.
    ///
    /// # Syntax
    /// - `SET <key> <value>` - store a value
    /// - `DEL <key>` (alias: `DELETE`) - remove a key
    /// - `GET <key>` - read a value
    /// - `SYNC` - dump this node's snapshot
    /// - `SYNC REQUEST` - reconcile with all peers
    /// - `STATS` - key and message counters
    /// - `KEYS` - list live keys
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut sections = line.trim().split('|');
        let head = sections.next().unwrap_or_default();
        let parts: Vec<&str> = head.split_whitespace().collect();
        let Some(first) = parts.first() else {
            return Err(ParseError::Empty);
        };

        let cmd = first.to_uppercase();
        match cmd.as_str() {
            "SET" => match parts.as_slice() {
                [_, key, value] => Ok(Request::Mutate {
                    mutation: Mutation::Set {
                        key: key.to_string(),
                        value: value.to_string(),
                    },
                    metadata: parse_metadata(sections)?,
                }),
                _ => Err(ParseError::Usage("SET key value")),
            },
            "DEL" | "DELETE" => match parts.as_slice() {
                [_, key] => Ok(Request::Mutate {
                    mutation: Mutation::Delete {
                        key: key.to_string(),
                    },
                    metadata: parse_metadata(sections)?,
                }),
                _ => Err(ParseError::Usage("DEL key")),
            },
            "GET" => match parts.as_slice() {
                [_, key] => Ok(Request::Get {
                    key: key.to_string(),
                }),
                _ => Err(ParseError::Usage("GET key")),
            },
            "SYNC" => match parts.as_slice() {
                [_] => Ok(Request::Sync),
                [_, arg] if arg.eq_ignore_ascii_case("REQUEST") => Ok(Request::SyncRequest),
                _ => Err(ParseError::Usage("SYNC [REQUEST]")),
            },
            "STATS" => Ok(Request::Stats),
            "KEYS" => Ok(Request::Keys),
            _ => Err(ParseError::UnknownCommand(cmd)),
        }
    }
}

fn parse_metadata<'a>(sections: impl Iterator<Item = &'a str>) -> Result<Metadata, ParseError> {
    let mut metadata = Metadata::default();
    for section in sections {
        let section = section.trim();
        if let Some(id) = section.strip_prefix(MESSAGE_ID_PREFIX) {
            // A bare `msg-id:` carries no identity; the line is a client write.
            metadata.message_id = Some(id.trim())
                .filter(|id| !id.is_empty())
                .map(str::to_string);
        } else if let Some(ts) = section.strip_prefix(TIMESTAMP_PREFIX) {
            let parsed = ts
                .parse()
                .map_err(|_| ParseError::InvalidTimestamp(ts.to_string()))?;
            metadata.timestamp = Some(parsed);
        }
    }
    Ok(metadata)
}
