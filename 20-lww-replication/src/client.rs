use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};

use crate::cli::SendArgs;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends one command line and returns every reply line the node writes
/// before closing the connection.
pub async fn send(args: &SendArgs) -> Result<Vec<String>> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    let (reader, mut writer) = stream.into_split();

    let line = args.line.join(" ");
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.shutdown().await?;

    let mut replies = Vec::new();
    let mut lines = BufReader::new(reader).lines();
    loop {
        let next = timeout(REPLY_TIMEOUT, lines.next_line())
            .await
            .context("timed out waiting for reply")??;
        match next {
            Some(reply) => replies.push(reply),
            None => break,
        }
    }
    Ok(replies)
}

pub async fn run(args: SendArgs) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    for reply in send(&args).await? {
        stdout.write_all(reply.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }
    stdout.flush().await?;
    Ok(())
}
