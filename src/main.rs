use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use video_download_mcp::cli::{Args, Command, Transport};
use video_download_mcp::server::transport::{sse, stdio};
use video_download_mcp::{DownloadTarget, Downloader, Ledger, McpServer, Progress};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();

    let ledger = Ledger::load(&args.ledger).context("Failed to load download ledger")?;
    let downloader = Downloader::new().context("Failed to build HTTP client")?;

    match args.command {
        Some(Command::Fetch {
            url,
            save_dir,
            filename,
        }) => {
            let target = DownloadTarget::new(url, save_dir, filename);
            fetch_once(&downloader, &ledger, &target).await
        }
        Some(Command::List) => {
            let content = serde_json::to_string_pretty(&ledger.list())
                .context("Failed to serialize ledger")?;
            println!("{content}");
            Ok(())
        }
        None => serve(args.transport, args.port, downloader, ledger).await,
    }
}

/// Logs go to stderr; stdout belongs to the stdio transport.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn serve(transport: Transport, port: u16, downloader: Downloader, ledger: Ledger) -> Result<()> {
    let server = Arc::new(McpServer::new(downloader, Arc::new(ledger)));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    match transport {
        Transport::Stdio => {
            info!("Starting MCP server with stdio transport...");
            stdio::serve(server, shutdown.clone()).await?;
        }
        Transport::Sse => {
            info!(port, "Starting MCP server with SSE transport...");
            sse::serve(server, port, shutdown.clone()).await?;
        }
    }

    info!("Shutting down MCP server...");

    if transport == Transport::Stdio && shutdown.is_cancelled() {
        // The stdin read runs on a blocking thread that cannot be interrupted;
        // waiting for the runtime to drain it would hang until the next line.
        std::process::exit(0);
    }

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}

async fn fetch_once(downloader: &Downloader, ledger: &Ledger, target: &DownloadTarget) -> Result<()> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} {bar:40} {bytes}/{total_bytes} ({bytes_per_sec})")
            .context("Invalid progress bar template")?
            .progress_chars("=>-"),
    );
    pb.set_message(target.filename.clone());

    let mut report = |progress: Progress| {
        if let Some(total) = progress.total {
            pb.set_length(total);
        }
        pb.set_position(progress.written);
    };

    // Ctrl-C cancels through the token so the partial file is cleaned up.
    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let result = downloader
        .fetch(&target.url, &target.target_path(), Some(&mut report), &cancel)
        .await;
    interrupt.abort();

    let saved = match result {
        Ok(saved) => saved,
        Err(err) => {
            pb.abandon_with_message("Failed");
            return Err(err).context(format!("Failed to download {}", target.url));
        }
    };
    pb.finish_with_message("Done");

    let saved = saved.display().to_string();
    ledger
        .record(&saved)
        .context("Failed to record download in ledger")?;
    println!("{saved}");

    Ok(())
}
