//! Cache entry storage on the local filesystem.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::Error;
use crate::model::FetchResult;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Write `bytes` to `path` through a uniquely named temp file and a rename,
/// so readers never observe a partially written file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("entry");
    let tmp = path.with_file_name(format!(".{name}.{}.{seq}.tmp", std::process::id()));

    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Directory of `<key>.bin` + `<key>.mime` entries.
///
/// The mime record is written before the body, so the presence of a body
/// file implies a complete entry.
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    /// Open (creating if needed) a cache rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheIo`] when the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| Error::cache_io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.bin"))
    }

    fn mime_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.mime"))
    }

    /// Read an entry. A missing body or mime record is a miss.
    pub async fn get(&self, key: &str) -> Result<Option<FetchResult>, Error> {
        let body_path = self.body_path(key);
        let bytes = match tokio::fs::read(&body_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::cache_io(body_path, e)),
        };

        let mime_path = self.mime_path(key);
        let content_type = match tokio::fs::read_to_string(&mime_path).await {
            Ok(mime) => mime.trim().to_string(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::cache_io(mime_path, e)),
        };

        Ok(Some(FetchResult { bytes, content_type }))
    }

    /// Store an entry, mime record first and body last.
    pub async fn put(&self, key: &str, result: &FetchResult) -> Result<(), Error> {
        let mime_path = self.mime_path(key);
        write_atomic(&mime_path, result.content_type.as_bytes())
            .await
            .map_err(|e| Error::cache_io(mime_path, e))?;

        let body_path = self.body_path(key);
        write_atomic(&body_path, &result.bytes)
            .await
            .map_err(|e| Error::cache_io(body_path, e))?;

        Ok(())
    }

    /// Whether a complete entry exists for `key`.
    pub async fn contains(&self, key: &str) -> bool {
        let body = tokio::fs::try_exists(self.body_path(key)).await.unwrap_or(false);
        body && tokio::fs::try_exists(self.mime_path(key)).await.unwrap_or(false)
    }

    /// Remove every entry, returning the number of bodies deleted.
    pub async fn purge(&self) -> Result<usize, Error> {
        let mut dir = tokio::fs::read_dir(&self.root).await.map_err(|e| Error::cache_io(&self.root, e))?;
        let mut removed = 0;

        while let Some(entry) = dir.next_entry().await.map_err(|e| Error::cache_io(&self.root, e))? {
            let path = entry.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !matches!(ext, "bin" | "mime" | "tmp") {
                continue;
            }
            tokio::fs::remove_file(&path).await.map_err(|e| Error::cache_io(&path, e))?;
            if ext == "bin" {
                removed += 1;
            }
        }

        tracing::info!(removed, root = %self.root.display(), "purged fetch cache");
        Ok(removed)
    }
}
