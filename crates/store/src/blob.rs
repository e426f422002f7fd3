//! Binary artifact storage seam.
//!
//! Screenshots, thumbnails, diff overlays, and baseline images are
//! addressed by opaque keys. Production deployments point this trait at an
//! object store; locally artifacts land on disk under the configured
//! directory.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Mutex,
};

use async_trait::async_trait;

use crate::error::{Error, Result};

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// A URL callers can hand out for the artifact. Local implementations
    /// return a path; object stores return pre-signed URLs.
    fn url(&self, key: &str) -> String;
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(key.to_string(), bytes);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .ok()
            .and_then(|blobs| blobs.get(key).cloned())
            .ok_or_else(|| Error::BlobNotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.remove(key);
        }
        Ok(())
    }

    fn url(&self, key: &str) -> String {
        format!("memory://{key}")
    }
}

/// Filesystem-backed store for local deployments.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Keys may contain slashes for grouping; traversal segments and
    /// non-filename characters are stripped.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                continue;
            }
            let clean: String = segment
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();
            path.push(clean);
        }
        path
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &bytes)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::invalid("blob_task", e.to_string()))?
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            if !path.exists() {
                return Err(Error::BlobNotFound(key));
            }
            Ok(std::fs::read(&path)?)
        })
        .await
        .map_err(|e| Error::invalid("blob_task", e.to_string()))?
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || -> Result<()> {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::invalid("blob_task", e.to_string()))?
    }

    fn url(&self, key: &str) -> String {
        self.path_for(key).display().to_string()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryBlobStore::default();
        store.put("snapshots/a.png", vec![1, 2, 3], "image/png").await.unwrap();
        assert_eq!(store.get("snapshots/a.png").await.unwrap(), vec![1, 2, 3]);

        store.delete("snapshots/a.png").await.unwrap();
        assert!(matches!(
            store.get("snapshots/a.png").await,
            Err(Error::BlobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.put("diffs/run1/a.png", vec![9, 9], "image/png").await.unwrap();
        assert_eq!(store.get("diffs/run1/a.png").await.unwrap(), vec![9, 9]);

        store.delete("diffs/run1/a.png").await.unwrap();
        assert!(store.get("diffs/run1/a.png").await.is_err());
    }

    #[test]
    fn traversal_segments_are_stripped() {
        let store = FsBlobStore::new("/data/artifacts");
        let path = store.path_for("../../etc/passwd");
        assert_eq!(path, PathBuf::from("/data/artifacts/etc/passwd"));
    }
}
