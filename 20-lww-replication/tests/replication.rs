use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use lww_replication::{
    cli::SendArgs,
    client,
    config::ReplicationConfig,
    node::Node,
    store::{Store, WriteOutcome},
};
use tokio::{
    net::TcpListener,
    sync::oneshot,
    task::JoinHandle,
    time::{Instant, sleep, timeout},
};

const NEVER: Duration = Duration::from_secs(3600);
const SETTLE: Duration = Duration::from_secs(5);

struct RunningNode {
    addr: SocketAddr,
    store: Arc<Store>,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl RunningNode {
    async fn send(&self, line: &str) -> Result<Vec<String>> {
        send_to(self.addr, line).await
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        timeout(SETTLE, self.handle)
            .await
            .expect("node stops within timeout")
            .expect("node task")
            .expect("node result");
    }
}

/// Timings where nothing fires on its own; individual tests shorten the
/// loop they exercise.
fn quiet_config(peers: Vec<String>) -> ReplicationConfig {
    ReplicationConfig {
        startup_delay: NEVER,
        sync_interval: NEVER,
        probe_interval: NEVER,
        connect_timeout: Duration::from_millis(500),
        response_timeout: Duration::from_secs(2),
        probe_timeout: Duration::from_millis(500),
        ..ReplicationConfig::with_peers(peers)
    }
}

fn start(listener: TcpListener, config: ReplicationConfig, store: Arc<Store>) -> RunningNode {
    let node = Node::with_store(listener, config, store).expect("valid node config");
    let addr = node.local_addr().expect("local addr");
    let store = node.store();
    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        node.run_until(async move {
            let _ = shutdown_rx.await;
        })
        .await
    });
    RunningNode {
        addr,
        store,
        shutdown,
        handle,
    }
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    (listener, addr)
}

/// An address with nothing listening on it.
async fn dead_addr() -> String {
    let (listener, addr) = bind().await;
    drop(listener);
    addr
}

async fn send_to(addr: SocketAddr, line: &str) -> Result<Vec<String>> {
    let args = SendArgs {
        server: addr,
        line: vec![line.to_string()],
    };
    client::send(&args).await
}

async fn eventually<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + SETTLE;
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn client_write_is_broadcast_to_every_peer() -> Result<()> {
    let (la, a) = bind().await;
    let (lb, b) = bind().await;
    let (lc, c) = bind().await;

    let node_a = start(la, quiet_config(vec![b.clone(), c.clone()]), Arc::default());
    let node_b = start(lb, quiet_config(vec![a.clone(), c.clone()]), Arc::default());
    let node_c = start(lc, quiet_config(vec![a, b]), Arc::default());

    assert_eq!(node_a.send("SET color blue").await?, vec!["OK"]);
    eventually("b to receive the write", || node_b.store.get("color").is_some()).await;
    eventually("c to receive the write", || node_c.store.get("color").is_some()).await;

    // Replicas hold the originating node's stamp, not their own.
    let origin = node_a.store.record("color").expect("origin record");
    assert_eq!(node_b.store.record("color"), Some(origin.clone()));
    assert_eq!(node_c.store.record("color"), Some(origin));

    assert_eq!(node_b.send("DEL color").await?, vec!["DELETED"]);
    eventually("a to apply the delete", || node_a.store.get("color").is_none()).await;
    eventually("c to apply the delete", || node_c.store.get("color").is_none()).await;

    node_a.stop().await;
    node_b.stop().await;
    node_c.stop().await;
    Ok(())
}

#[tokio::test]
async fn replicated_writes_are_not_rebroadcast() -> Result<()> {
    let (la, a) = bind().await;
    let (lb, b) = bind().await;
    let node_a = start(la, quiet_config(vec![b]), Arc::default());
    let node_b = start(lb, quiet_config(vec![a]), Arc::default());

    node_a.send("SET k v").await?;
    eventually("b to receive the write", || node_b.store.get("k").is_some()).await;
    sleep(Duration::from_millis(200)).await;

    // One message id each, no echo traffic creating new ones.
    assert_eq!(node_a.store.stats().processed_messages, 1);
    assert_eq!(node_b.store.stats().processed_messages, 1);

    node_a.stop().await;
    node_b.stop().await;
    Ok(())
}

#[tokio::test]
async fn pull_resolves_conflict_to_newer_write() -> Result<()> {
    let (la, a) = bind().await;
    let (lb, b) = bind().await;
    let node_a = start(la, quiet_config(vec![b]), Arc::default());
    let node_b = start(lb, quiet_config(vec![a]), Arc::default());

    node_a.send("SET k 1|msg-id:from-a|ts:100").await?;
    node_b.send("SET k 2|msg-id:from-b|ts:200").await?;

    assert_eq!(
        node_a.send("SYNC REQUEST").await?,
        vec!["SYNC requested from all peers"]
    );
    eventually("a to adopt the newer value", || {
        node_a.store.get("k").as_deref() == Some("2")
    })
    .await;
    assert_eq!(node_a.send("GET k").await?, vec!["2"]);

    // a now also holds a key b has never seen.
    node_a.send("SET only-a x|msg-id:a-only|ts:5").await?;
    node_b.send("SYNC REQUEST").await?;
    eventually("b to pull a's extra key", || node_b.store.get("only-a").is_some()).await;
    assert_eq!(node_b.send("GET k").await?, vec!["2"]);
    assert_eq!(
        node_b.store.put("only-a", "x", 5, "a-only"),
        WriteOutcome::Duplicate
    );

    node_a.stop().await;
    node_b.stop().await;
    Ok(())
}

#[tokio::test]
async fn startup_sync_catches_up_restarted_node() -> Result<()> {
    let (lb, b) = bind().await;
    let seeded = Arc::new(Store::new());
    seeded.put("missed", "while-down", 42, "m-missed");
    let node_b = start(lb, quiet_config(Vec::new()), seeded);

    let (la, _) = bind().await;
    let config = ReplicationConfig {
        startup_delay: Duration::from_millis(50),
        ..quiet_config(vec![b])
    };
    let node_a = start(la, config, Arc::default());

    eventually("startup sync", || node_a.store.get("missed").is_some()).await;
    assert_eq!(node_a.store.record("missed"), node_b.store.record("missed"));
    assert_eq!(
        node_a.store.put("missed", "while-down", 42, "m-missed"),
        WriteOutcome::Duplicate
    );

    node_a.stop().await;
    node_b.stop().await;
    Ok(())
}

#[tokio::test]
async fn periodic_sync_repairs_missed_broadcast() -> Result<()> {
    let (lb, b) = bind().await;
    let node_b = start(lb, quiet_config(Vec::new()), Arc::default());

    let (la, _) = bind().await;
    let config = ReplicationConfig {
        sync_interval: Duration::from_millis(100),
        ..quiet_config(vec![b])
    };
    let node_a = start(la, config, Arc::default());

    // Written on b after both are up; b has no peers, so only a's pull can
    // move it.
    node_b.store.put("late", "x", 7, "m-late");
    eventually("periodic sync", || node_a.store.get("late").is_some()).await;

    node_b.store.put("later", "y", 8, "m-later");
    eventually("next periodic tick", || node_a.store.get("later").is_some()).await;

    node_a.stop().await;
    node_b.stop().await;
    Ok(())
}

#[tokio::test]
async fn recovered_peer_is_pulled_immediately() -> Result<()> {
    let b = dead_addr().await;

    let (la, _) = bind().await;
    let config = ReplicationConfig {
        probe_interval: Duration::from_millis(50),
        ..quiet_config(vec![b.clone()])
    };
    let node_a = start(la, config, Arc::default());

    // Let a see b as down at least once.
    sleep(Duration::from_millis(200)).await;
    assert!(node_a.store.keys().is_empty());

    let seeded = Arc::new(Store::new());
    seeded.put("k", "from-b", 10, "m-b");
    let lb = TcpListener::bind(&b).await?;
    let node_b = start(lb, quiet_config(Vec::new()), seeded);

    eventually("recovery sync", || node_a.store.get("k").is_some()).await;

    node_a.stop().await;
    node_b.stop().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_peer_does_not_affect_clients() -> Result<()> {
    let (la, _) = bind().await;
    let config = ReplicationConfig {
        startup_delay: Duration::ZERO,
        sync_interval: Duration::from_millis(50),
        probe_interval: Duration::from_millis(50),
        ..quiet_config(vec![dead_addr().await])
    };
    let node = start(la, config, Arc::default());

    assert_eq!(node.send("SET k v").await?, vec!["OK"]);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(node.send("GET k").await?, vec!["v"]);
    assert_eq!(
        node.send("STATS").await?,
        vec![r#"{"total_keys":1,"processed_messages":1}"#]
    );

    node.stop().await;
    Ok(())
}
