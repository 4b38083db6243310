use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use depot::cli::DaemonOpts;
use depot::server::{self, ServerConfig};
use depot::store::FileStore;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("depot=info")),
        )
        .init();

    let store = FileStore::open(&opts.root)
        .with_context(|| format!("open storage root {}", opts.root.display()))?;

    println!("Starting depot daemon:");
    println!("  Root: {}", store.root().display());
    println!("  Bind: {}", opts.bind);
    println!("  Handlers: {}", opts.max_connections);

    if opts.bind.starts_with("0.0.0.0") {
        eprintln!("WARNING: binding to 0.0.0.0 exposes the daemon to all network interfaces");
        eprintln!("         this protocol is unencrypted and unauthenticated - trusted networks only");
    }

    let cfg = ServerConfig {
        max_connections: opts.max_connections,
        io_timeout: Duration::from_millis(opts.io_timeout_ms),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(server::serve(&opts.bind, Arc::new(store), cfg))
}
