//! A replica: TCP listener, per-connection command handling, and the
//! background replication machinery.
//!
//! Each accepted connection runs in its own task and may send any number of
//! command lines. Mutations are applied to the local store first; if they
//! originated here they are then stamped and broadcast to every peer. The
//! client only ever learns the local result.

use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result, bail};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{
    anti_entropy::AntiEntropy,
    broadcast::Broadcaster,
    clock::Clock,
    config::ReplicationConfig,
    error::ParseError,
    peer::{PeerClient, SNAPSHOT_HEADER},
    protocol::{Mutation, Request, Stamp, StampedMutation},
    store::{Store, WriteOutcome},
};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Longest command line a connection may send, newline included. A longer
/// line gets an error reply and the connection is closed.
const MAX_LINE_BYTES: usize = 1024 * 1024;

pub struct Node {
    listener: TcpListener,
    state: Arc<NodeState>,
}

/// Shared by every connection handler.
struct NodeState {
    store: Arc<Store>,
    clock: Clock,
    broadcaster: Broadcaster,
    anti_entropy: AntiEntropy,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl Node {
    pub fn new(listener: TcpListener, config: ReplicationConfig) -> Result<Self> {
        Self::with_store(listener, config, Arc::new(Store::new()))
    }

    /// Builds a node around an existing store, e.g. one pre-populated by a
    /// test.
    pub fn with_store(
        listener: TcpListener,
        config: ReplicationConfig,
        store: Arc<Store>,
    ) -> Result<Self> {
        config.validate().context("invalid replication config")?;

        let peers: Arc<[String]> = config.peers.clone().into();
        let tasks = TaskTracker::new();
        let shutdown = CancellationToken::new();
        let broadcaster = Broadcaster::new(
            Arc::clone(&peers),
            PeerClient::new(&config),
            tasks.clone(),
        );
        let anti_entropy = AntiEntropy::new(
            Arc::clone(&store),
            peers,
            &config,
            tasks.clone(),
            shutdown.clone(),
        );

        Ok(Self {
            listener,
            state: Arc::new(NodeState {
                store,
                clock: Clock::new(),
                broadcaster,
                anti_entropy,
                tasks,
                shutdown,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.state.store)
    }

    /// Serves connections and runs anti-entropy until `shutdown` resolves,
    /// then stops the background loops and waits for in-flight peer calls to
    /// finish or time out.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Node { listener, state } = self;
        tokio::pin!(shutdown);

        state.anti_entropy.start();

        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        info!("node shutting down");
        drop(listener);
        state.shutdown.cancel();
        state.tasks.close();
        state.tasks.wait().await;
        debug!("in-flight peer calls drained");

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, state: &Arc<NodeState>) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<NodeState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, &state).await {
            debug!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}

async fn handle_connection(stream: TcpStream, state: &NodeState) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    serve_lines(&mut reader, &mut writer, state).await
}

async fn serve_lines<R, W>(reader: &mut R, writer: &mut W, state: &NodeState) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = (&mut *reader)
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_line(&mut line)
            .await?;
        if read == 0 {
            return Ok(());
        }
        if read > MAX_LINE_BYTES {
            writer.write_all(b"ERROR: line too long\n").await?;
            writer.flush().await?;
            bail!("command line exceeds {MAX_LINE_BYTES} bytes");
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        debug!(line = trimmed, "received command");

        let reply = match Request::parse(trimmed) {
            Ok(request) => handle_request(request, state)?,
            Err(ParseError::Empty) => continue,
            Err(err) => err.to_string(),
        };

        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
}

/// Executes one request and returns the reply text (possibly several lines,
/// without the final newline).
fn handle_request(request: Request, state: &NodeState) -> Result<String> {
    let reply = match request {
        Request::Mutate { mutation, metadata } => {
            let (stamp, originated) = match metadata.into_stamp(&state.clock) {
                Some(stamp) => (stamp, false),
                None => (Stamp::fresh(&state.clock), true),
            };
            let stamped = StampedMutation { mutation, stamp };
            apply_mutation(&state.store, &stamped);
            if originated {
                state.broadcaster.broadcast(&stamped);
            }
            match stamped.mutation {
                Mutation::Set { .. } => "OK".to_string(),
                Mutation::Delete { .. } => "DELETED".to_string(),
            }
        }
        Request::Get { key } => state
            .store
            .get(&key)
            .unwrap_or_else(|| "Key not found".to_string()),
        Request::Sync => {
            let snapshot = state.store.snapshot().encode()?;
            format!("{SNAPSHOT_HEADER}\n{snapshot}")
        }
        Request::SyncRequest => {
            state.anti_entropy.request_sync();
            "SYNC requested from all peers".to_string()
        }
        Request::Stats => serde_json::to_string(&state.store.stats())?,
        Request::Keys => serde_json::to_string(&state.store.keys())?,
    };
    Ok(reply)
}

fn apply_mutation(store: &Store, stamped: &StampedMutation) -> WriteOutcome {
    let Stamp {
        message_id,
        timestamp,
    } = &stamped.stamp;
    let outcome = match &stamped.mutation {
        Mutation::Set { key, value } => store.put(key, value, *timestamp, message_id),
        Mutation::Delete { key } => store.delete(key, *timestamp, message_id),
    };
    debug!(
        key = stamped.mutation.key(),
        message_id = %message_id,
        ?outcome,
        "applied mutation"
    );
    outcome
}
