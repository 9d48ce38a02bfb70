//! Error types shared by the store, the peer transport and the command layer.
//!
//! Stale and duplicate writes are deliberately absent: they are ordinary
//! outcomes of last-write-wins replication, reported through
//! [`crate::store::WriteOutcome`] rather than as failures.

use std::{io, time::Duration};

use thiserror::Error;

/// A snapshot payload that could not be decoded.
///
/// Decoding happens before the store is touched, so this error never leaves
/// partially merged state behind.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("malformed snapshot payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failure while talking to a peer. Every variant means "this peer is
/// currently unreachable" to the anti-entropy engine.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("connecting to {peer} timed out after {timeout:?}")]
    ConnectTimeout { peer: String, timeout: Duration },

    #[error("i/o error talking to {peer}: {source}")]
    Io {
        peer: String,
        #[source]
        source: io::Error,
    },

    #[error("{peer} did not answer within {timeout:?}")]
    ResponseTimeout { peer: String, timeout: Duration },

    #[error("{peer} closed the connection before sending a snapshot")]
    Closed { peer: String },

    #[error("{peer} sent an unexpected reply: {line:?}")]
    UnexpectedReply { peer: String, line: String },

    #[error("{peer} sent a bad snapshot: {source}")]
    Snapshot {
        peer: String,
        #[source]
        source: SnapshotError,
    },
}

impl PeerError {
    pub(crate) fn io(peer: &str, source: io::Error) -> Self {
        PeerError::Io {
            peer: peer.to_string(),
            source,
        }
    }
}

/// Problems with a single command line. The `Display` text is sent back to
/// the client verbatim.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
