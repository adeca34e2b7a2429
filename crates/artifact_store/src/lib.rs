//! Content-addressed blob storage for datasets and model artifacts.
//!
//! A deliberately narrow capability over `object_store`: put and get
//! opaque bytes by path, with every write reporting the content hash
//! and size. Metadata indexing belongs to the document ledger in the
//! `database` crate, never here.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectStorePath;
use object_store::{ObjectStore, PutPayload};
use sha2::{Digest, Sha256};

/// Result of a completed write: content hash (SHA-256 hex) and size in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub hash: String,
    pub size: u64,
}

/// Handle to the object-storage backend.
///
/// Writes are unconditionally overwriting (last-writer-wins per path);
/// callers derive paths from run ids so concurrent runs never collide.
#[derive(Clone)]
pub struct ArtifactStore {
    inner: Arc<dyn ObjectStore>,
}

impl ArtifactStore {
    /// Opens a store backed by a local directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or opened.
    pub fn local(base_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_path).with_context(|| {
            format!(
                "Failed to create artifact store directory {}",
                base_path.display()
            )
        })?;

        let fs = LocalFileSystem::new_with_prefix(base_path)
            .context("Failed to open local artifact store")?;

        Ok(Self {
            inner: Arc::new(fs),
        })
    }

    /// Opens an in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
        }
    }

    /// Writes a blob at the given path (forward-slash separated),
    /// returning its content hash and size.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn put(&self, path: &str, data: Bytes) -> Result<StoredArtifact> {
        let hash = content_hash(&data);
        let size = data.len() as u64;

        let object_path = ObjectStorePath::from(path);
        self.inner
            .put(&object_path, PutPayload::from(data))
            .await
            .with_context(|| format!("Failed to write artifact at {path}"))?;

        Ok(StoredArtifact { hash, size })
    }

    /// Reads the blob at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is absent or the read fails.
    pub async fn get(&self, path: &str) -> Result<Bytes> {
        let object_path = ObjectStorePath::from(path);
        self.inner
            .get(&object_path)
            .await
            .with_context(|| format!("Failed to read artifact at {path}"))?
            .bytes()
            .await
            .with_context(|| format!("Failed to read artifact bytes at {path}"))
    }
}

/// SHA-256 hex digest of a byte slice.
#[must_use]
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_reports_hash_and_size() {
        let store = ArtifactStore::in_memory();
        let stored = store
            .put("datasets/sample.csv", Bytes::from_static(b"abc"))
            .await
            .expect("put should succeed");

        assert_eq!(stored.size, 3);
        // Well-known SHA-256 of "abc".
        assert_eq!(
            stored.hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn get_round_trips_bytes() {
        let store = ArtifactStore::in_memory();
        store
            .put("runs/1/out.bin", Bytes::from_static(b"payload"))
            .await
            .expect("put should succeed");

        let data = store.get("runs/1/out.bin").await.expect("get should succeed");
        assert_eq!(data.as_ref(), b"payload");
    }

    #[tokio::test]
    async fn put_overwrites_last_writer_wins() {
        let store = ArtifactStore::in_memory();
        store
            .put("runs/1/out.bin", Bytes::from_static(b"first"))
            .await
            .expect("put should succeed");
        store
            .put("runs/1/out.bin", Bytes::from_static(b"second"))
            .await
            .expect("put should succeed");

        let data = store.get("runs/1/out.bin").await.expect("get should succeed");
        assert_eq!(data.as_ref(), b"second");
    }

    #[tokio::test]
    async fn get_missing_path_errors() {
        let store = ArtifactStore::in_memory();
        assert!(store.get("nope/missing.bin").await.is_err());
    }
}
