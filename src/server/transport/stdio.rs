//! Newline-delimited JSON-RPC over stdin/stdout.

use crate::server::McpServer;
use crate::server::protocol::JsonRpcResponse;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub async fn serve(server: Arc<McpServer>, shutdown: CancellationToken) -> Result<()> {
    serve_io(server, tokio::io::stdin(), tokio::io::stdout(), shutdown).await
}

/// Reads one message per line from `reader` until EOF or `shutdown`.
///
/// Each message is handled on its own task, so a long download does not hold
/// up other requests. Responses are written by a single writer task in the
/// order they complete.
pub async fn serve_io<R, W>(
    server: Arc<McpServer>,
    reader: R,
    writer: W,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<JsonRpcResponse>(64);
    let writer = tokio::spawn(write_responses(rx, writer));

    let mut lines = BufReader::new(reader).lines();
    info!("stdio transport ready");

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line.context("failed to read from stdin")?,
        };
        let Some(line) = line else {
            debug!("stdin closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let server = Arc::clone(&server);
        let tx = tx.clone();
        let cancel = shutdown.child_token();
        tokio::spawn(async move {
            if let Some(response) = server.handle_message(&line, &cancel).await {
                if tx.send(response).await.is_err() {
                    debug!("response dropped, writer closed");
                }
            }
        });
    }

    // The writer finishes once every in-flight handler has dropped its sender.
    drop(tx);
    writer
        .await
        .context("stdio writer task panicked")?
        .context("failed to write to stdout")
}

async fn write_responses<W>(
    mut rx: mpsc::Receiver<JsonRpcResponse>,
    mut writer: W,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_vec(&response)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }

    Ok(())
}
