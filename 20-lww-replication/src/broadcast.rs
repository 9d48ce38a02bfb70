//! Fire-and-forget propagation of locally originated mutations.
//!
//! Each peer gets its own task. Nothing is acknowledged or retried: a peer
//! that misses a broadcast catches up through anti-entropy.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::{error::PeerError, peer::PeerClient, protocol::StampedMutation};

#[derive(Debug, Clone)]
pub struct Broadcaster {
    peers: Arc<[String]>,
    client: PeerClient,
    tasks: TaskTracker,
}

impl Broadcaster {
    pub fn new(peers: Arc<[String]>, client: PeerClient, tasks: TaskTracker) -> Self {
        Self {
            peers,
            client,
            tasks,
        }
    }

    /// Sends `mutation` to every peer concurrently and returns immediately.
    /// Delivery failures are logged and dropped.
    pub fn broadcast(&self, mutation: &StampedMutation) {
        let line: Arc<str> = Arc::from(format!("{mutation}\n"));
        for peer in self.peers.iter() {
            let peer = peer.clone();
            let line = Arc::clone(&line);
            let client = self.client;
            self.tasks.spawn(async move {
                match deliver(&client, &peer, &line).await {
                    Ok(()) => debug!(peer = %peer, "broadcast delivered"),
                    Err(error) => warn!(peer = %peer, %error, "broadcast failed"),
                }
            });
        }
    }
}

async fn deliver(client: &PeerClient, peer: &str, line: &str) -> Result<(), PeerError> {
    let mut stream = client.connect(peer).await?;
    stream
        .write_all(line.as_bytes())
        .await
        .map_err(|source| PeerError::io(peer, source))?;
    stream
        .shutdown()
        .await
        .map_err(|source| PeerError::io(peer, source))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{AsyncBufReadExt, BufReader},
        net::TcpListener,
        time::timeout,
    };

    use super::*;
    use crate::{
        config::ReplicationConfig,
        protocol::{Mutation, Stamp},
    };

    fn mutation() -> StampedMutation {
        StampedMutation {
            mutation: Mutation::Set {
                key: "k".into(),
                value: "v".into(),
            },
            stamp: Stamp {
                message_id: "m1".into(),
                timestamp: 99,
            },
        }
    }

    async fn read_one_line(listener: &TcpListener) -> String {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.expect("read");
        line
    }

    #[tokio::test]
    async fn delivers_stamped_line_to_every_peer() {
        let first = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let second = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let peers: Arc<[String]> = vec![
            first.local_addr().expect("addr").to_string(),
            second.local_addr().expect("addr").to_string(),
        ]
        .into();

        let tasks = TaskTracker::new();
        let client = PeerClient::new(&ReplicationConfig::default());
        Broadcaster::new(peers, client, tasks.clone()).broadcast(&mutation());

        for listener in [&first, &second] {
            let line = timeout(Duration::from_secs(2), read_one_line(listener))
                .await
                .expect("line within timeout");
            assert_eq!(line, "SET k v|msg-id:m1|ts:99\n");
        }

        tasks.close();
        tasks.wait().await;
    }

    #[tokio::test]
    async fn unreachable_peer_does_not_block_others() {
        let dead = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let dead_addr = dead.local_addr().expect("addr").to_string();
        drop(dead);
        let live = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let peers: Arc<[String]> = vec![dead_addr, live.local_addr().expect("addr").to_string()].into();

        let tasks = TaskTracker::new();
        let client = PeerClient::new(&ReplicationConfig::default());
        Broadcaster::new(peers, client, tasks.clone()).broadcast(&mutation());

        let line = timeout(Duration::from_secs(2), read_one_line(&live))
            .await
            .expect("live peer still served");
        assert!(line.starts_with("SET k v|"));

        tasks.close();
        timeout(Duration::from_secs(5), tasks.wait())
            .await
            .expect("failed delivery finishes");
    }
}
