//! Download files over HTTP(S) on behalf of MCP clients and keep a ledger of
//! every saved path.

pub mod cli;
pub mod downloader;
pub mod error;
pub mod ledger;
pub mod models;
pub mod server;

pub use downloader::Downloader;
pub use error::{ErrorKind, FetchError, LedgerError, ToolError};
pub use ledger::Ledger;
pub use models::{DownloadTarget, Progress};
pub use server::McpServer;
