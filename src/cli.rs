use crate::ledger::DEFAULT_LEDGER_FILE;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    /// Newline-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// HTTP with a server-sent event stream
    Sse,
}

#[derive(Parser, Debug)]
#[command(name = "video-download-mcp")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// MCP transport
    #[arg(
        short,
        long,
        value_enum,
        default_value = "stdio",
        env = "VIDEO_DOWNLOAD_MCP_TRANSPORT"
    )]
    pub transport: Transport,

    /// Port for the SSE server when transport is 'sse'
    #[arg(short, long, default_value = "3000", env = "VIDEO_DOWNLOAD_MCP_PORT")]
    pub port: u16,

    /// Download ledger file
    #[arg(long, default_value = DEFAULT_LEDGER_FILE, env = "VIDEO_DOWNLOAD_MCP_LEDGER")]
    pub ledger: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Download one file and record it, without starting the server
    Fetch {
        /// File URL (HTTP/HTTPS)
        url: String,

        /// Directory the file is saved to
        #[arg(short, long, default_value = ".")]
        save_dir: String,

        /// Target filename
        #[arg(short, long)]
        filename: String,
    },

    /// Print the download ledger as JSON
    List,
}
