use std::io;
use std::path::PathBuf;

/// Coarse classification shared by every failure a download call can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Io,
    Remote,
    Network,
}

/// An error returned by [`Downloader::fetch`](crate::downloader::Downloader::fetch).
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{context}: {source}")]
    Io { context: String, source: io::Error },

    #[error("unexpected status code: {status}")]
    Remote { status: u16 },

    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("request cancelled")]
    Cancelled,

    #[error("incomplete body: expected {expected} bytes, received {written}")]
    Incomplete { expected: u64, written: u64 },
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::InvalidInput(_) => ErrorKind::InvalidInput,
            FetchError::Io { .. } | FetchError::Incomplete { .. } => ErrorKind::Io,
            FetchError::Remote { .. } => ErrorKind::Remote,
            FetchError::Network(_) | FetchError::Cancelled => ErrorKind::Network,
        }
    }

    /// HTTP status attached to a [`FetchError::Remote`].
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Remote { status } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("failed to read ledger {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse ledger {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize ledger: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to write ledger {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Failure of the `download_video_file` tool, reported to the caller as text.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("required argument \"{0}\" not found")]
    MissingArgument(&'static str),

    #[error("argument \"{0}\" is not a string")]
    NotAString(&'static str),

    #[error("Failed to download video: {0}")]
    Download(#[from] FetchError),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::MissingArgument(_) | ToolError::NotAString(_) => ErrorKind::InvalidInput,
            ToolError::Download(err) => err.kind(),
        }
    }
}

/// Attaches the failing stage to io-like errors.
///
/// `FromIo(#[from] io::Error)` would lose which step failed (directory
/// creation, file creation, write...), so the stage is carried as a string.
pub(crate) trait ErrContext<T> {
    fn context(self, context: &str) -> Result<T, FetchError>;
}

impl<T, E: Into<io::Error>> ErrContext<T> for Result<T, E> {
    fn context(self, context: &str) -> Result<T, FetchError> {
        self.map_err(|err| FetchError::Io {
            context: context.to_string(),
            source: err.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_carry_their_stage() {
        let result: Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        let err = result.context("failed to create directory").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.to_string(), "failed to create directory: denied");
    }

    #[test]
    fn remote_errors_expose_status() {
        let err = FetchError::Remote { status: 404 };
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "unexpected status code: 404");
    }

    #[test]
    fn tool_errors_wrap_download_failures() {
        let err = ToolError::from(FetchError::Remote { status: 500 });
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert_eq!(
            err.to_string(),
            "Failed to download video: unexpected status code: 500"
        );

        let missing = ToolError::MissingArgument("url");
        assert_eq!(missing.kind(), ErrorKind::InvalidInput);
        assert_eq!(missing.to_string(), "required argument \"url\" not found");
    }
}
