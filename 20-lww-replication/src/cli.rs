use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_TIMEOUT,
    DEFAULT_RESPONSE_TIMEOUT, DEFAULT_STARTUP_DELAY, DEFAULT_SYNC_INTERVAL, ReplicationConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a replica that serves the line protocol and replicates to peers.
    Node(NodeArgs),
    /// Send one command line to a node and print its reply.
    Send(SendArgs),
}

#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// Socket address the node should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Comma-separated peer addresses, e.g. 127.0.0.1:8081,127.0.0.1:8082
    #[arg(long, value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Delay before the one-shot startup sync, in milliseconds.
    #[arg(long, default_value_t = millis(DEFAULT_STARTUP_DELAY))]
    pub startup_delay_ms: u64,

    /// Interval between full syncs with every peer, in milliseconds.
    #[arg(long, default_value_t = millis(DEFAULT_SYNC_INTERVAL))]
    pub sync_interval_ms: u64,

    /// Interval between peer health probes, in milliseconds.
    #[arg(long, default_value_t = millis(DEFAULT_PROBE_INTERVAL))]
    pub probe_interval_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Address of the node to talk to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub server: SocketAddr,

    /// The command, e.g. `SET color blue`.
    #[arg(required = true, num_args = 1..)]
    pub line: Vec<String>,
}

impl From<&NodeArgs> for ReplicationConfig {
    fn from(args: &NodeArgs) -> Self {
        ReplicationConfig {
            peers: args.peers.clone(),
            startup_delay: Duration::from_millis(args.startup_delay_ms),
            sync_interval: Duration::from_millis(args.sync_interval_ms),
            probe_interval: Duration::from_millis(args.probe_interval_ms),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
