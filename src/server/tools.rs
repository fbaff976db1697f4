use super::protocol::{CallToolResult, Tool};
use crate::downloader::Downloader;
use crate::error::ToolError;
use crate::ledger::Ledger;
use crate::models::{DownloadTarget, Progress};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DOWNLOAD_TOOL: &str = "download_video_file";

pub fn definitions() -> Vec<Tool> {
    vec![Tool {
        name: DOWNLOAD_TOOL,
        description: "Download a video from URL and save to target directory with a given filename",
        input_schema: json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The video file URL (HTTP/HTTPS)"
                },
                "save_dir": {
                    "type": "string",
                    "description": "Directory where the video will be saved"
                },
                "filename": {
                    "type": "string",
                    "description": "Target filename (without path)"
                }
            },
            "required": ["url", "save_dir", "filename"]
        }),
    }]
}

/// Runs `download_video_file`. Every failure becomes an error result, so the
/// protocol layer never sees a download problem as a transport fault.
pub async fn download_video_file(
    downloader: &Downloader,
    ledger: &Ledger,
    arguments: &Map<String, Value>,
    cancel: &CancellationToken,
) -> CallToolResult {
    match download(downloader, ledger, arguments, cancel).await {
        Ok(saved) => CallToolResult::text(saved),
        Err(err) => {
            info!(kind = ?err.kind(), error = %err, "download tool failed");
            CallToolResult::error(err.to_string())
        }
    }
}

async fn download(
    downloader: &Downloader,
    ledger: &Ledger,
    arguments: &Map<String, Value>,
    cancel: &CancellationToken,
) -> Result<String, ToolError> {
    let target = DownloadTarget::new(
        require_string(arguments, "url")?,
        require_string(arguments, "save_dir")?,
        require_string(arguments, "filename")?,
    );

    let mut report = |progress: Progress| {
        debug!(
            url = %target.url,
            written = progress.written,
            total = ?progress.total,
            "download progress"
        );
    };
    let saved = downloader
        .fetch(&target.url, &target.target_path(), Some(&mut report), cancel)
        .await?;
    let saved = saved.display().to_string();

    // A ledger failure does not undo a finished download; it is logged and the
    // path is still returned.
    if let Err(err) = ledger.record(&saved) {
        warn!(path = %saved, error = %err, "failed to record download in ledger");
    }

    Ok(saved)
}

fn require_string(arguments: &Map<String, Value>, name: &'static str) -> Result<String, ToolError> {
    match arguments.get(name) {
        None => Err(ToolError::MissingArgument(name)),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(ToolError::NotAString(name)),
    }
}
