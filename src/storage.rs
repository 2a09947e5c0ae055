use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::fs;

use crate::errors::{CrawlError, CrawlResult};

/// Generic blob-storage surface the cache store persists through.
/// Keys are `/`-separated paths; values are opaque byte blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> CrawlResult<Option<Vec<u8>>>;
    async fn put(&self, key: &str, bytes: &[u8]) -> CrawlResult<()>;
    async fn list(&self, prefix: &str) -> CrawlResult<Vec<String>>;
}

/// Blob store backed by a directory tree on the local filesystem.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> CrawlResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, key: &str) -> CrawlResult<PathBuf> {
        if key.is_empty() {
            return Err(CrawlError::Storage("blob key is empty".into()));
        }
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(CrawlError::Storage(format!(
                    "blob key '{key}' contains an invalid path segment"
                )));
            }
            path.push(segment);
        }
        Ok(path)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> CrawlResult<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CrawlError::Io(err)),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> CrawlResult<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> CrawlResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, key_prefix)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(CrawlError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                let key = if key_prefix.is_empty() {
                    name
                } else {
                    format!("{key_prefix}/{name}")
                };
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), key));
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// In-memory blob store, mainly for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> CrawlResult<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> CrawlResult<()> {
        self.blobs.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> CrawlResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .blobs
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn fs_store_round_trips_blobs() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        store.put("results/abc.json", b"{\"places\":[]}").await.unwrap();
        let bytes = store.get("results/abc.json").await.unwrap().unwrap();
        assert_eq!(bytes, b"{\"places\":[]}");

        assert!(store.get("results/missing.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fs_store_lists_by_prefix() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        store.put("results/a.json", b"a").await.unwrap();
        store.put("results/b.json", b"b").await.unwrap();
        store.put("master_index.json", b"{}").await.unwrap();

        let keys = store.list("results/").await.unwrap();
        assert_eq!(keys, vec!["results/a.json", "results/b.json"]);
    }

    #[tokio::test]
    async fn fs_store_rejects_traversal_keys() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(store.put("../outside", b"x").await.is_err());
        assert!(store.get("").await.is_err());
    }

    #[tokio::test]
    async fn memory_store_round_trips_blobs() {
        let store = MemoryBlobStore::new();
        store.put("k", b"v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap(), b"v");
        assert_eq!(store.list("k").await.unwrap(), vec!["k"]);
        assert!(store.get("other").await.unwrap().is_none());
    }
}
