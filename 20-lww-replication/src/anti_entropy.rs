//! Anti-entropy: pulling full snapshots from peers and merging them.
//!
//! Three loops run independently once a node starts, sharing nothing but the
//! store:
//!
//! - **startup**: one pull from every peer after `startup_delay`, so a
//!   restarted node catches up without waiting a full period.
//! - **periodic**: a pull from every peer each `sync_interval`.
//! - **recovery**: a connect-only probe of every peer each `probe_interval`;
//!   a peer that becomes reachable is pulled from immediately.
//!
//! Network I/O always completes before the store's write lock is taken, and
//! a failing peer is logged and skipped without affecting the others or the
//! schedule.

use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{
    select,
    time::{Instant, MissedTickBehavior, interval_at, sleep},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{
    config::ReplicationConfig,
    error::PeerError,
    peer::PeerClient,
    store::{MergeReport, Store},
};

/// What triggered a reconciliation pass, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReason {
    Startup,
    Periodic,
    Recovery,
    Requested,
}

/// Last known reachability of a peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PeerHealth {
    #[default]
    Unknown,
    Up,
    Down,
}

/// Per-peer health as seen by the recovery loop.
#[derive(Debug, Default)]
pub struct HealthTracker {
    peers: HashMap<String, PeerHealth>,
}

impl HealthTracker {
    pub fn new<'a>(peers: impl IntoIterator<Item = &'a String>) -> Self {
        Self {
            peers: peers
                .into_iter()
                .map(|peer| (peer.clone(), PeerHealth::Unknown))
                .collect(),
        }
    }

    pub fn health(&self, peer: &str) -> PeerHealth {
        self.peers.get(peer).copied().unwrap_or_default()
    }

    /// Records a probe result. Returns `true` when the peer just became
    /// reachable, i.e. it was not `Up` before this probe.
    pub fn observe(&mut self, peer: &str, reachable: bool) -> bool {
        let next = if reachable {
            PeerHealth::Up
        } else {
            PeerHealth::Down
        };
        let previous = self.peers.insert(peer.to_string(), next).unwrap_or_default();
        reachable && previous != PeerHealth::Up
    }
}

/// Pulls and merges peer snapshots. Cheap to clone; clones share the store,
/// the peer list, the task tracker and the shutdown token.
#[derive(Clone)]
pub struct AntiEntropy {
    store: Arc<Store>,
    peers: Arc<[String]>,
    client: PeerClient,
    startup_delay: Duration,
    sync_interval: Duration,
    probe_interval: Duration,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl AntiEntropy {
    pub fn new(
        store: Arc<Store>,
        peers: Arc<[String]>,
        config: &ReplicationConfig,
        tasks: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            peers,
            client: PeerClient::new(config),
            startup_delay: config.startup_delay,
            sync_interval: config.sync_interval,
            probe_interval: config.probe_interval,
            tasks,
            shutdown,
        }
    }

    /// Starts the startup, periodic and recovery loops. Does nothing when no
    /// peers are configured. The loops stop when the shutdown token fires.
    pub fn start(&self) {
        if self.peers.is_empty() {
            debug!("no peers configured; anti-entropy disabled");
            return;
        }

        let engine = self.clone();
        self.tasks.spawn(async move { engine.run_startup().await });
        let engine = self.clone();
        self.tasks.spawn(async move { engine.run_periodic().await });
        let engine = self.clone();
        self.tasks.spawn(async move { engine.run_recovery_monitor().await });
    }

    /// Pulls `peer`'s snapshot and merges it. Only the merge holds the store
    /// lock; a payload that does not decode is reported and merges nothing.
    pub async fn sync_with_peer(&self, peer: &str) -> Result<MergeReport, PeerError> {
        let body = self.client.fetch_snapshot(peer).await?;
        self.store
            .apply_snapshot_blob(body.as_bytes())
            .map_err(|source| PeerError::Snapshot {
                peer: peer.to_string(),
                source,
            })
    }

    /// Pulls from every peer concurrently and waits for all of them. Returns
    /// how many peers were merged successfully.
    pub async fn sync_with_all(&self, reason: SyncReason) -> usize {
        let pulls = self
            .peers
            .iter()
            .map(|peer| self.sync_and_log(peer, reason));
        join_all(pulls).await.into_iter().filter(|ok| *ok).count()
    }

    /// Schedules [`sync_with_all`](Self::sync_with_all) in the background.
    pub fn request_sync(&self) {
        let engine = self.clone();
        self.tasks.spawn(async move {
            engine.sync_with_all(SyncReason::Requested).await;
        });
    }

    async fn sync_and_log(&self, peer: &str, reason: SyncReason) -> bool {
        match self.sync_with_peer(peer).await {
            Ok(report) => {
                info!(
                    peer,
                    ?reason,
                    applied = report.applied,
                    skipped = report.skipped,
                    "synced snapshot"
                );
                true
            }
            Err(error) => {
                warn!(peer, ?reason, %error, "sync failed");
                false
            }
        }
    }

    async fn run_startup(self) {
        select! {
            _ = self.shutdown.cancelled() => return,
            _ = sleep(self.startup_delay) => {}
        }
        info!(peers = self.peers.len(), "performing startup sync");
        self.sync_with_all(SyncReason::Startup).await;
    }

    async fn run_periodic(self) {
        let mut ticker = interval_at(Instant::now() + self.sync_interval, self.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    debug!("running periodic sync");
                    let engine = self.clone();
                    self.tasks.spawn(async move {
                        engine.sync_with_all(SyncReason::Periodic).await;
                    });
                }
            }
        }
    }

    async fn run_recovery_monitor(self) {
        let mut health = HealthTracker::new(self.peers.iter());
        let mut ticker = interval_at(Instant::now() + self.probe_interval, self.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.probe_all(&mut health).await,
            }
        }
    }

    async fn probe_all(&self, health: &mut HealthTracker) {
        let probes = self.peers.iter().map(|peer| async move {
            (peer, self.client.probe(peer).await)
        });

        for (peer, reachable) in join_all(probes).await {
            if health.observe(peer, reachable) {
                info!(peer = %peer, "peer recovered; triggering sync");
                let engine = self.clone();
                let peer = peer.clone();
                self.tasks.spawn(async move {
                    engine.sync_and_log(&peer, SyncReason::Recovery).await;
                });
            }
        }
    }
}
