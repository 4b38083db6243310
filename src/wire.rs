//! Wire codec for the depot protocol.
//!
//! Four primitives, all multi-byte integers big-endian:
//! - `string`: u16 byte-count prefix, then that many UTF-8 bytes
//! - `uint64`: 8 bytes (file sizes)
//! - `int32`: 4 bytes (counts)
//! - `bytes(n)`: exactly n raw bytes, length always declared by context
//!
//! Every read/write carries a deadline. A primitive is consumed whole or not
//! at all: a connection that closes or stalls mid-primitive yields a
//! [`FrameError`] and callers must not interpret the partial data.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::protocol::COPY_CHUNK;

/// Hard cap implied by the u16 length prefix.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Framing failures. All of them are fatal to the current connection.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed mid-frame")]
    UnexpectedEof,
    #[error("i/o deadline exceeded ({0} ms)")]
    Timeout(u64),
    #[error("string frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("string frame too long: {0} bytes (max {MAX_STRING_LEN})")]
    StringTooLong(usize),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

async fn read_exact_timed<R>(r: &mut R, buf: &mut [u8], deadline: Duration) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    match timeout(deadline, r.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(FrameError::UnexpectedEof),
        Ok(Err(e)) => Err(FrameError::Io(e)),
        Err(_) => Err(FrameError::Timeout(deadline.as_millis() as u64)),
    }
}

async fn write_all_timed<W>(w: &mut W, buf: &[u8], deadline: Duration) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    match timeout(deadline, async {
        w.write_all(buf).await?;
        w.flush().await
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(FrameError::Io(e)),
        Err(_) => Err(FrameError::Timeout(deadline.as_millis() as u64)),
    }
}

/// Read a length-prefixed UTF-8 string.
pub async fn read_string<R>(r: &mut R, deadline: Duration) -> Result<String, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 2];
    read_exact_timed(r, &mut prefix, deadline).await?;
    let len = u16::from_be_bytes(prefix) as usize;
    let mut raw = vec![0u8; len];
    if len > 0 {
        read_exact_timed(r, &mut raw, deadline).await?;
    }
    String::from_utf8(raw).map_err(|_| FrameError::InvalidUtf8)
}

/// Write a length-prefixed UTF-8 string.
pub async fn write_string<W>(w: &mut W, s: &str, deadline: Duration) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = s.as_bytes();
    if bytes.len() > MAX_STRING_LEN {
        return Err(FrameError::StringTooLong(bytes.len()));
    }
    let mut frame = Vec::with_capacity(2 + bytes.len());
    frame.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    frame.extend_from_slice(bytes);
    write_all_timed(w, &frame, deadline).await
}

/// Read an 8-byte unsigned integer.
pub async fn read_u64<R>(r: &mut R, deadline: Duration) -> Result<u64, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8];
    read_exact_timed(r, &mut buf, deadline).await?;
    Ok(u64::from_be_bytes(buf))
}

/// Write an 8-byte unsigned integer.
pub async fn write_u64<W>(w: &mut W, v: u64, deadline: Duration) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    write_all_timed(w, &v.to_be_bytes(), deadline).await
}

/// Read a 4-byte signed integer.
pub async fn read_i32<R>(r: &mut R, deadline: Duration) -> Result<i32, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4];
    read_exact_timed(r, &mut buf, deadline).await?;
    Ok(i32::from_be_bytes(buf))
}

/// Write a 4-byte signed integer.
pub async fn write_i32<W>(w: &mut W, v: i32, deadline: Duration) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    write_all_timed(w, &v.to_be_bytes(), deadline).await
}

/// Copy exactly `len` raw payload bytes from `r` to `w` in chunks.
///
/// `progress` is invoked with the cumulative byte count after each chunk.
/// The source ending before `len` bytes is a framing failure; the partial
/// bytes already written stay with `w` and the caller decides cleanup.
pub async fn copy_exact<R, W, F>(r: &mut R, w: &mut W, len: u64, mut progress: F) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(u64),
{
    let mut buf = vec![0u8; len.clamp(1, COPY_CHUNK as u64) as usize];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = r.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(FrameError::UnexpectedEof);
        }
        w.write_all(&buf[..n]).await?;
        remaining -= n as u64;
        progress(len - remaining);
    }
    w.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MS: Duration = Duration::from_millis(1_000);

    #[tokio::test]
    async fn string_round_trip_layout() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_string(&mut a, "report.pdf", MS).await.unwrap();

        // Peek at the raw layout: u16 BE length, then UTF-8 bytes
        let mut raw = [0u8; 12];
        b.read_exact(&mut raw).await.unwrap();
        assert_eq!(&raw[..2], &10u16.to_be_bytes());
        assert_eq!(&raw[2..], b"report.pdf");

        write_string(&mut a, "", MS).await.unwrap();
        assert_eq!(read_string(&mut b, MS).await.unwrap(), "");
    }

    #[tokio::test]
    async fn integers_are_big_endian() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_u64(&mut a, 5, MS).await.unwrap();
        write_i32(&mut a, -7, MS).await.unwrap();

        let mut raw = [0u8; 12];
        b.read_exact(&mut raw).await.unwrap();
        assert_eq!(&raw[..8], &[0, 0, 0, 0, 0, 0, 0, 5]);
        assert_eq!(&raw[8..], &(-7i32).to_be_bytes());
    }

    #[tokio::test]
    async fn eof_mid_primitive_fails() {
        let (mut a, mut b) = tokio::io::duplex(64);
        // Length prefix promises 5 bytes but only 2 arrive before close
        a.write_all(&[0, 5, b'a', b'b']).await.unwrap();
        drop(a);
        match read_string(&mut b, MS).await {
            Err(FrameError::UnexpectedEof) => {}
            other => panic!("expected UnexpectedEof, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_utf8_fails() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0, 2, 0xff, 0xfe]).await.unwrap();
        match read_string(&mut b, MS).await {
            Err(FrameError::InvalidUtf8) => {}
            other => panic!("expected InvalidUtf8, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stalled_peer_hits_deadline() {
        let (_a, mut b) = tokio::io::duplex(64);
        match read_u64(&mut b, Duration::from_millis(20)).await {
            Err(FrameError::Timeout(20)) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn copy_exact_moves_only_declared_bytes() {
        let payload = b"ABCDE-and-trailing-garbage";
        let mut src: &[u8] = payload;
        let mut out = Vec::new();
        let mut seen = Vec::new();
        copy_exact(&mut src, &mut out, 5, |done| seen.push(done)).await.unwrap();
        assert_eq!(out, b"ABCDE");
        assert_eq!(seen.last(), Some(&5));
    }

    #[tokio::test]
    async fn copy_exact_detects_short_source() {
        let mut src: &[u8] = b"abc";
        let mut out = Vec::new();
        match copy_exact(&mut src, &mut out, 10, |_| {}).await {
            Err(FrameError::UnexpectedEof) => {}
            other => panic!("expected UnexpectedEof, got {other:?}"),
        }
    }
}
