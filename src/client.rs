//! Thin protocol peer: open a connection, issue one command, read the
//! response, close. Anything interactive (prompts, progress rendering) stays
//! with the caller.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::protocol::{self, timeouts, verb};
use crate::wire;

const IO: Duration = Duration::from_millis(timeouts::DEFAULT_IO_MS);

async fn connect(addr: &str) -> Result<TcpStream> {
    let stream = timeout(Duration::from_millis(timeouts::CONNECT_MS), TcpStream::connect(addr))
        .await
        .with_context(|| format!("timed out connecting to {addr}"))?
        .with_context(|| format!("connect {addr}"))?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Upload a local file under `name`. `progress` receives cumulative bytes
/// sent. The server replies before the payload; an error reply (exists,
/// invalid name) is surfaced verbatim and nothing is sent.
pub async fn store(addr: &str, name: &str, path: &Path, progress: impl FnMut(u64)) -> Result<()> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("open {}", path.display()))?;
    let size = file.metadata().await?.len();

    let mut stream = connect(addr).await?;
    wire::write_string(&mut stream, verb::STORE, IO).await?;
    wire::write_string(&mut stream, name, IO).await?;
    wire::write_u64(&mut stream, size, IO).await?;

    let reply = wire::read_string(&mut stream, IO).await?;
    if reply != protocol::RESP_OK {
        bail!("{reply}");
    }

    let deadline = Duration::from_millis(timeouts::transfer_deadline_ms(IO.as_millis() as u64, size));
    timeout(deadline, wire::copy_exact(&mut file, &mut stream, size, progress))
        .await
        .context("upload timed out")??;
    Ok(())
}

/// Download `name` into `dest`, returning the byte count. `progress` receives
/// `(bytes received, total)` as the payload streams in.
pub async fn fetch(addr: &str, name: &str, dest: &Path, mut progress: impl FnMut(u64, u64)) -> Result<u64> {
    let mut stream = connect(addr).await?;
    wire::write_string(&mut stream, verb::FETCH, IO).await?;
    wire::write_string(&mut stream, name, IO).await?;

    let reply = wire::read_string(&mut stream, IO).await?;
    if reply != protocol::RESP_OK {
        bail!("{reply}");
    }
    let size = wire::read_u64(&mut stream, IO).await?;

    let mut file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("create {}", dest.display()))?;
    let deadline = Duration::from_millis(timeouts::transfer_deadline_ms(IO.as_millis() as u64, size));
    timeout(
        deadline,
        wire::copy_exact(&mut stream, &mut file, size, |done| progress(done, size)),
    )
    .await
    .context("download timed out")??;
    file.sync_all().await?;
    Ok(size)
}

/// Enumerate the names held by the server.
pub async fn list(addr: &str) -> Result<Vec<String>> {
    let mut stream = connect(addr).await?;
    wire::write_string(&mut stream, verb::LIST, IO).await?;

    let count = wire::read_i32(&mut stream, IO).await?;
    if count < 0 {
        bail!("server reported a negative entry count ({count})");
    }
    let mut names = Vec::with_capacity(count as usize);
    for _ in 0..count {
        names.push(wire::read_string(&mut stream, IO).await?);
    }
    Ok(names)
}

/// Delete every file on the server, returning how many were removed.
/// Destructive and irreversible; confirmation is the caller's job.
pub async fn purge(addr: &str) -> Result<i32> {
    let mut stream = connect(addr).await?;
    wire::write_string(&mut stream, verb::PURGE, IO).await?;

    let reply = wire::read_string(&mut stream, IO).await?;
    if reply != protocol::RESP_OK {
        bail!("{reply}");
    }
    Ok(wire::read_i32(&mut stream, IO).await?)
}
