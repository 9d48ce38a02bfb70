//! Request/response calls from one node to another.
//!
//! Every call is bounded: connecting uses `connect_timeout` and the rest of
//! an exchange uses `response_timeout`, so a hung peer costs at most the sum
//! of the two. None of this code touches the store lock.

use std::time::Duration;

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};
use tracing::debug;

use crate::{config::ReplicationConfig, error::PeerError};

/// Header line a node sends before its snapshot in reply to `SYNC`.
pub const SNAPSHOT_HEADER: &str = "SNAPSHOT:";

const LINE_ENDINGS: &[char] = &['\n', '\r'];

#[derive(Debug, Clone, Copy)]
pub struct PeerClient {
    connect_timeout: Duration,
    response_timeout: Duration,
    probe_timeout: Duration,
}

impl PeerClient {
    pub fn new(config: &ReplicationConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            response_timeout: config.response_timeout,
            probe_timeout: config.probe_timeout,
        }
    }

    pub async fn connect(&self, peer: &str) -> Result<TcpStream, PeerError> {
        connect_within(peer, self.connect_timeout).await
    }

    /// Health check: the peer is up if it accepts a connection. No data is
    /// exchanged.
    pub async fn probe(&self, peer: &str) -> bool {
        match connect_within(peer, self.probe_timeout).await {
            Ok(_) => true,
            Err(error) => {
                debug!(peer, %error, "probe failed");
                false
            }
        }
    }

    /// Asks `peer` for its full snapshot and returns the undecoded body line.
    pub async fn fetch_snapshot(&self, peer: &str) -> Result<String, PeerError> {
        let stream = self.connect(peer).await?;
        match timeout(self.response_timeout, request_snapshot(peer, stream)).await {
            Ok(result) => result,
            Err(_) => Err(PeerError::ResponseTimeout {
                peer: peer.to_string(),
                timeout: self.response_timeout,
            }),
        }
    }
}

async fn connect_within(peer: &str, limit: Duration) -> Result<TcpStream, PeerError> {
    match timeout(limit, TcpStream::connect(peer)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(PeerError::io(peer, source)),
        Err(_) => Err(PeerError::ConnectTimeout {
            peer: peer.to_string(),
            timeout: limit,
        }),
    }
}

async fn request_snapshot(peer: &str, stream: TcpStream) -> Result<String, PeerError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    writer
        .write_all(b"SYNC\n")
        .await
        .map_err(|source| PeerError::io(peer, source))?;
    writer
        .flush()
        .await
        .map_err(|source| PeerError::io(peer, source))?;

    let header = read_line(peer, &mut reader).await?;
    if header != SNAPSHOT_HEADER {
        return Err(PeerError::UnexpectedReply {
            peer: peer.to_string(),
            line: header,
        });
    }

    read_line(peer, &mut reader).await
}

async fn read_line<R>(peer: &str, reader: &mut R) -> Result<String, PeerError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes = reader
        .read_line(&mut line)
        .await
        .map_err(|source| PeerError::io(peer, source))?;
    if bytes == 0 {
        return Err(PeerError::Closed {
            peer: peer.to_string(),
        });
    }
    Ok(line.trim_end_matches(LINE_ENDINGS).to_string())
}
