//! TCP server: accept loop, bounded per-connection tasks, command dispatch.
//!
//! Each accepted connection carries exactly one command. The handler reads
//! the verb, runs the matching operation against the shared [`FileStore`],
//! writes the response frames, and the connection is closed. Protocol and
//! storage failures stay local to their connection; only a failure to bind
//! the listener is fatal to the process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::protocol::{self, timeouts, verb};
use crate::store::{FileStore, StoreError};
use crate::wire::{self, FrameError};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Maximum connections serviced in parallel. Excess accepted connections
    /// wait for a slot; none are dropped on saturation.
    pub max_connections: usize,
    /// Base deadline for each protocol primitive. Bulk payload transfers get
    /// a per-MB allowance on top.
    pub io_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_connections: 10,
            io_timeout: Duration::from_millis(timeouts::DEFAULT_IO_MS),
        }
    }
}

/// Bind `addr` and serve until the process exits.
pub async fn serve(addr: &str, store: Arc<FileStore>, cfg: ServerConfig) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(
        addr = %listener.local_addr()?,
        root = %store.root().display(),
        "depotd listening"
    );
    run(listener, store, cfg).await
}

/// Accept loop on an already-bound listener (tests bind their own port).
pub async fn run(listener: TcpListener, store: Arc<FileStore>, cfg: ServerConfig) -> Result<()> {
    let slots = Arc::new(Semaphore::new(cfg.max_connections.max(1)));
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        // Saturation parks the accepted connection until a handler finishes.
        let permit = match Arc::clone(&slots).acquire_owned().await {
            Ok(p) => p,
            Err(_) => return Ok(()),
        };
        let _ = stream.set_nodelay(true);
        let store = Arc::clone(&store);
        let io_timeout = cfg.io_timeout;
        tokio::spawn(async move {
            let _permit = permit;
            debug!(%peer, "session opened");
            match handle_connection(stream, &store, io_timeout).await {
                Ok(()) => debug!(%peer, "session closed"),
                Err(e) => warn!(%peer, "session aborted: {e:#}"),
            }
        });
    }
}

/// One command round-trip: verb, arguments, response, close.
async fn handle_connection(mut stream: TcpStream, store: &FileStore, io_timeout: Duration) -> Result<()> {
    let verb = wire::read_string(&mut stream, io_timeout).await?;
    match verb.to_ascii_uppercase().as_str() {
        verb::STORE => handle_store(&mut stream, store, io_timeout).await,
        verb::FETCH => handle_fetch(&mut stream, store, io_timeout).await,
        verb::LIST => handle_list(&mut stream, store, io_timeout).await,
        verb::PURGE => handle_purge(&mut stream, store, io_timeout).await,
        _ => {
            warn!(%verb, "unknown command");
            wire::write_string(&mut stream, protocol::RESP_UNKNOWN_COMMAND, io_timeout).await?;
            Ok(())
        }
    }
}

/// STORE: `name`, `size`, reply, then `size` payload bytes. The reply goes
/// out before the payload; on an error reply the session closes with no
/// payload consumed. A payload that stalls or falls short aborts the session
/// and leaves no visible entry.
async fn handle_store(stream: &mut TcpStream, store: &FileStore, io_timeout: Duration) -> Result<()> {
    let name = wire::read_string(stream, io_timeout).await?;
    let size = wire::read_u64(stream, io_timeout).await?;

    let upload = match store.begin_put(&name) {
        Ok(upload) => upload,
        Err(StoreError::InvalidName) => {
            warn!(%name, "rejected invalid file name");
            wire::write_string(stream, protocol::RESP_INVALID_NAME, io_timeout).await?;
            return Ok(());
        }
        Err(StoreError::AlreadyExists) => {
            debug!(%name, "store refused, entry exists");
            wire::write_string(stream, protocol::RESP_ALREADY_EXISTS, io_timeout).await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    wire::write_string(stream, protocol::RESP_OK, io_timeout).await?;

    let deadline = transfer_deadline(io_timeout, size);
    match timeout(deadline, upload.receive(size, stream)).await {
        Ok(Ok(())) => {
            info!(%name, size, "stored");
            Ok(())
        }
        // Mid-stream failure: abort with no further writes, the peer
        // observes the close.
        Ok(Err(e)) => {
            warn!(%name, "upload failed: {e}");
            Err(e.into())
        }
        Err(_) => Err(FrameError::Timeout(deadline.as_millis() as u64).into()),
    }
}

/// FETCH: `name`, then `OK` + size + payload, or a not-found reply.
async fn handle_fetch(stream: &mut TcpStream, store: &FileStore, io_timeout: Duration) -> Result<()> {
    let name = wire::read_string(stream, io_timeout).await?;
    let (size, mut file) = match store.get(&name).await {
        Ok(entry) => entry,
        Err(StoreError::InvalidName) => {
            warn!(%name, "rejected invalid file name");
            wire::write_string(stream, protocol::RESP_INVALID_NAME, io_timeout).await?;
            return Ok(());
        }
        Err(StoreError::NotFound) => {
            debug!(%name, "fetch miss");
            wire::write_string(stream, protocol::RESP_NOT_FOUND, io_timeout).await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    wire::write_string(stream, protocol::RESP_OK, io_timeout).await?;
    wire::write_u64(stream, size, io_timeout).await?;

    let deadline = transfer_deadline(io_timeout, size);
    match timeout(deadline, wire::copy_exact(&mut file, stream, size, |_| {})).await {
        Ok(Ok(())) => {
            info!(%name, size, "served");
            Ok(())
        }
        Ok(Err(FrameError::UnexpectedEof)) => {
            // The entry shrank under us after the size frame went out. The
            // declared size is a promise; all we can do is drop the session.
            error!(%name, size, "entry shorter than its metadata");
            Err(FrameError::UnexpectedEof.into())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(FrameError::Timeout(deadline.as_millis() as u64).into()),
    }
}

/// LIST: count, then that many names. An empty store is a count of zero.
async fn handle_list(stream: &mut TcpStream, store: &FileStore, io_timeout: Duration) -> Result<()> {
    let names = store.list()?;
    let count = i32::try_from(names.len()).context("too many entries to enumerate")?;
    wire::write_i32(stream, count, io_timeout).await?;
    for name in &names {
        wire::write_string(stream, name, io_timeout).await?;
    }
    debug!(count, "listed entries");
    Ok(())
}

/// PURGE: delete every complete entry, reply `OK` + removed count.
async fn handle_purge(stream: &mut TcpStream, store: &FileStore, io_timeout: Duration) -> Result<()> {
    let removed = store.clear()?;
    wire::write_string(stream, protocol::RESP_OK, io_timeout).await?;
    wire::write_i32(stream, removed, io_timeout).await?;
    info!(removed, "purged storage");
    Ok(())
}

fn transfer_deadline(io_timeout: Duration, payload_len: u64) -> Duration {
    Duration::from_millis(timeouts::transfer_deadline_ms(
        io_timeout.as_millis() as u64,
        payload_len,
    ))
}
