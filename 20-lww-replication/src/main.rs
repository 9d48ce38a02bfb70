use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use lww_replication::{
    cli::{Cli, Command},
    client,
    config::ReplicationConfig,
    node::Node,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Node(args) => {
            let config = ReplicationConfig::from(&args);
            let listener = TcpListener::bind(args.listen)
                .await
                .with_context(|| format!("failed to bind {}", args.listen))?;
            let node = Node::new(listener, config)?;
            let addr = node.local_addr()?;
            info!("node listening on {}", addr);
            info!("replicating to {} peer(s)", args.peers.len());
            if let Err(err) = node.run_until_ctrl_c().await {
                warn!("node exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Send(args) => client::run(args).await?,
    }

    Ok(())
}
