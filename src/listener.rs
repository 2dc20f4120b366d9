//! Line-oriented TCP reply server, handy as a known-open target.
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Line that ends a client session.
pub const END_OF_SESSION: &str = "EOF";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyMode {
    /// Answer every line with `Echo: <line>`.
    Echo,
    /// Answer every line with the same message.
    Fixed(String),
}

impl ReplyMode {
    /// `ECHO` (any case) selects echo mode, anything else is a fixed reply.
    pub fn from_arg(arg: &str) -> Self {
        if arg.eq_ignore_ascii_case("echo") {
            ReplyMode::Echo
        } else {
            ReplyMode::Fixed(arg.to_string())
        }
    }

    fn reply_to(&self, line: &str) -> String {
        match self {
            ReplyMode::Echo => format!("Echo: {line}\n"),
            ReplyMode::Fixed(msg) => format!("{msg}\n"),
        }
    }
}

pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind TCP listener on {addr}"))
}

/// Accept clients until `cancel` fires. Each client gets its own task.
pub async fn serve(listener: TcpListener, mode: ReplyMode, cancel: CancellationToken) -> Result<()> {
    let local = listener.local_addr()?;
    info!(%local, ?mode, "TCP listener started");
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted.context("accept failed")?,
        };
        debug!(%peer, "client connected");
        let mode = mode.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, &mode, cancel).await {
                warn!(%peer, error = %e, "client session ended with error");
            }
        });
    }
    info!(%local, "TCP listener stopped");
    Ok(())
}

async fn handle_client(stream: TcpStream, mode: &ReplyMode, cancel: CancellationToken) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { return Ok(()) };
        let line = line.trim_end_matches('\r');
        if line == END_OF_SESSION {
            return Ok(());
        }
        debug!(received = line, "<-");
        write.write_all(mode.reply_to(line).as_bytes()).await?;
    }
}
