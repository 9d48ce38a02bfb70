use std::{collections::HashSet, time::Duration};

use anyhow::{Result, ensure};

/// Delay before the one-shot startup reconciliation.
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(3);
/// Period of the full reconciliation loop. Bounds how long a missed
/// broadcast can go unrepaired.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
/// Period of the peer health probe.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything the replication core needs from its host: a static peer list
/// and the timing of the background loops and peer calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationConfig {
    pub peers: Vec<String>,
    pub startup_delay: Duration,
    pub sync_interval: Duration,
    pub probe_interval: Duration,
    pub connect_timeout: Duration,
    /// Upper bound on a whole snapshot exchange once connected.
    pub response_timeout: Duration,
    pub probe_timeout: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            startup_delay: DEFAULT_STARTUP_DELAY,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl ReplicationConfig {
    pub fn with_peers(peers: Vec<String>) -> Self {
        Self {
            peers,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut unique = HashSet::new();
        for peer in &self.peers {
            ensure!(!peer.trim().is_empty(), "peer address cannot be empty");
            ensure!(unique.insert(peer), "peer {peer} is listed more than once");
        }

        for (name, value) in [
            ("sync interval", self.sync_interval),
            ("probe interval", self.probe_interval),
            ("connect timeout", self.connect_timeout),
            ("response timeout", self.response_timeout),
            ("probe timeout", self.probe_timeout),
        ] {
            ensure!(!value.is_zero(), "{name} must be greater than zero");
        }

        Ok(())
    }
}
