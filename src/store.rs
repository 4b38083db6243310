//! Directory-backed file store.
//!
//! One flat directory, one file per entry, disk name equals protocol name.
//! Uploads land in a staging tempfile first and are renamed into place only
//! once every declared byte arrived, so `list`/`clear`/`get` never observe a
//! half-written entry. A claim table serializes concurrent uploads of the
//! same name: the first claimant wins, the rest see `AlreadyExists`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::warn;

use crate::protocol::{COPY_CHUNK, MAX_NAME_LEN};

/// Prefix for staging files inside the storage root. Names carrying it are
/// rejected on upload and skipped by enumeration.
pub const STAGING_PREFIX: &str = ".depot-stage-";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid file name")]
    InvalidName,
    #[error("file already exists")]
    AlreadyExists,
    #[error("file not found")]
    NotFound,
    #[error("upload ended before the declared size")]
    TruncatedUpload,
    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared, directory-backed collection of named byte blobs.
///
/// The directory is the single source of truth: nothing is cached between
/// calls, so out-of-band file changes are picked up by the next operation.
pub struct FileStore {
    root: PathBuf,
    in_flight: Mutex<HashSet<String>>,
}

impl FileStore {
    /// Open (creating if missing) the storage root directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let root = std::fs::canonicalize(&root)?;
        Ok(FileStore {
            root,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject names that are empty, overlong, or could resolve outside the
    /// storage root. Checked before any disk access.
    pub fn validate_name(name: &str) -> Result<(), StoreError> {
        if name.is_empty()
            || name.len() > MAX_NAME_LEN
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0'])
            || name.starts_with(STAGING_PREFIX)
        {
            return Err(StoreError::InvalidName);
        }
        Ok(())
    }

    /// Claim `name` for an upload. Fails with `AlreadyExists` if the entry is
    /// present or another upload of the same name is in flight; the claim is
    /// released when the returned handle is dropped.
    pub fn begin_put(&self, name: &str) -> Result<PendingUpload<'_>, StoreError> {
        Self::validate_name(name)?;
        let mut in_flight = self.in_flight.lock();
        if in_flight.contains(name) || self.root.join(name).exists() {
            return Err(StoreError::AlreadyExists);
        }
        in_flight.insert(name.to_string());
        Ok(PendingUpload {
            store: self,
            name: name.to_string(),
        })
    }

    /// Create-if-absent write: claim, stream, commit in one call.
    pub async fn put<R>(&self, name: &str, expected_size: u64, src: &mut R) -> Result<(), StoreError>
    where
        R: AsyncRead + Unpin,
    {
        self.begin_put(name)?.receive(expected_size, src).await
    }

    /// Look up a complete entry, returning its exact length and an open
    /// handle over its content. Entries are immutable once committed, so the
    /// length stays in sync with the bytes behind the handle.
    pub async fn get(&self, name: &str) -> Result<(u64, tokio::fs::File), StoreError> {
        Self::validate_name(name)?;
        let file = match tokio::fs::File::open(self.root.join(name)).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        Ok((len, file))
    }

    /// Snapshot of all complete entry names, in filesystem enumeration order.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            // Non-UTF-8 names cannot be framed as protocol strings
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with(STAGING_PREFIX) {
                continue;
            }
            names.push(name);
        }
        Ok(names)
    }

    /// Delete every complete entry, returning how many were removed.
    /// In-flight staging files are left alone. Individual delete failures are
    /// logged and skipped so one stubborn entry cannot wedge a purge.
    pub fn clear(&self) -> Result<i32, StoreError> {
        let mut removed = 0i32;
        for name in self.list()? {
            match std::fs::remove_file(self.root.join(&name)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(%name, "failed to delete entry: {e}"),
            }
        }
        Ok(removed)
    }
}

/// An exclusive claim on a name, taken before the upload payload is read.
pub struct PendingUpload<'a> {
    store: &'a FileStore,
    name: String,
}

impl PendingUpload<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stream exactly `expected_size` bytes from `src` into a staging file,
    /// then atomically rename it to the claimed name. A short source fails
    /// with `TruncatedUpload` and leaves nothing visible: the staging file is
    /// removed on drop.
    pub async fn receive<R>(self, expected_size: u64, src: &mut R) -> Result<(), StoreError>
    where
        R: AsyncRead + Unpin,
    {
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(&self.store.root)?;
        let mut out = tokio::fs::File::from_std(staging.as_file().try_clone()?);

        let mut buf = vec![0u8; COPY_CHUNK];
        let mut remaining = expected_size;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = src.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(StoreError::TruncatedUpload);
            }
            out.write_all(&buf[..n]).await?;
            remaining -= n as u64;
        }
        out.flush().await?;
        drop(out);

        // The claim keeps other uploads away; an out-of-band file appearing
        // under the same name still loses the rename.
        match staging.persist_noclobber(self.store.root.join(&self.name)) {
            Ok(_) => Ok(()),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists)
            }
            Err(e) => Err(StoreError::Io(e.error)),
        }
    }
}

impl Drop for PendingUpload<'_> {
    fn drop(&mut self) {
        self.store.in_flight.lock().remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (_dir, store) = store();
        store.put("a.txt", 3, &mut &b"xyz"[..]).await.unwrap();

        let (len, mut file) = store.get("a.txt").await.unwrap();
        assert_eq!(len, 3);
        let mut content = Vec::new();
        file.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"xyz");
    }

    #[tokio::test]
    async fn duplicate_put_keeps_original_bytes() {
        let (_dir, store) = store();
        store.put("a.txt", 3, &mut &b"xyz"[..]).await.unwrap();

        match store.put("a.txt", 3, &mut &b"zzz"[..]).await {
            Err(StoreError::AlreadyExists) => {}
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
        let (_, mut file) = store.get("a.txt").await.unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"xyz");
    }

    #[tokio::test]
    async fn concurrent_claim_on_same_name_fails_fast() {
        let (_dir, store) = store();
        let first = store.begin_put("a.txt").unwrap();
        match store.begin_put("a.txt") {
            Err(StoreError::AlreadyExists) => {}
            other => panic!("expected AlreadyExists, got {:?}", other.map(|u| u.name().to_string())),
        }
        drop(first);
        // Claim released without a commit: the name is free again
        store.begin_put("a.txt").unwrap();
    }

    #[tokio::test]
    async fn truncated_upload_leaves_nothing_visible() {
        let (_dir, store) = store();
        match store.put("big.bin", 10, &mut &b"abc"[..]).await {
            Err(StoreError::TruncatedUpload) => {}
            other => panic!("expected TruncatedUpload, got {other:?}"),
        }
        assert!(store.list().unwrap().is_empty());
        assert!(matches!(store.get("big.bin").await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn zero_byte_entry_is_valid() {
        let (_dir, store) = store();
        store.put("empty", 0, &mut &b""[..]).await.unwrap();
        let (len, _) = store.get("empty").await.unwrap();
        assert_eq!(len, 0);
        assert_eq!(store.list().unwrap(), vec!["empty".to_string()]);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(store.get("missing.txt").await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn list_and_clear_skip_staging_files() {
        let (dir, store) = store();
        store.put("a.txt", 1, &mut &b"a"[..]).await.unwrap();
        store.put("b.txt", 1, &mut &b"b"[..]).await.unwrap();
        std::fs::write(dir.path().join(format!("{STAGING_PREFIX}abc123")), b"partial").unwrap();

        let mut names = store.list().unwrap();
        names.sort();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);

        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.list().unwrap().is_empty());
        // Staging file untouched by the purge
        assert!(dir.path().join(format!("{STAGING_PREFIX}abc123")).exists());
    }

    #[tokio::test]
    async fn clear_on_empty_store_counts_zero() {
        let (_dir, store) = store();
        assert_eq!(store.clear().unwrap(), 0);
    }

    #[test]
    fn name_validation_matrix() {
        for bad in [
            "",
            ".",
            "..",
            "../etc/passwd",
            "a/b.txt",
            "a\\b.txt",
            "nul\0byte",
            ".depot-stage-xyz",
        ] {
            assert!(
                matches!(FileStore::validate_name(bad), Err(StoreError::InvalidName)),
                "expected rejection for {bad:?}"
            );
        }
        assert!(FileStore::validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());

        for good in ["report.pdf", "a.txt", ".hidden", "x", "weird name (1)"] {
            assert!(FileStore::validate_name(good).is_ok(), "expected accept for {good:?}");
        }
    }
}
