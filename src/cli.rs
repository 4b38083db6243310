//! Shared CLI helpers and small reusable Clap fragments

use clap::Parser;
use std::path::PathBuf;

/// Common daemon options used by depotd
#[derive(Clone, Debug, Parser)]
pub struct DaemonOpts {
    /// Bind address (host:port)
    #[arg(long, default_value = "0.0.0.0:42069")]
    pub bind: String,

    /// Storage directory (created if missing)
    #[arg(long, default_value = "server_files")]
    pub root: PathBuf,

    /// Maximum connections serviced in parallel
    #[arg(long, default_value_t = 10)]
    pub max_connections: usize,

    /// Per-frame I/O deadline in milliseconds (payload transfers get a
    /// per-MB allowance on top)
    #[arg(long, default_value_t = 30_000)]
    pub io_timeout_ms: u64,
}
