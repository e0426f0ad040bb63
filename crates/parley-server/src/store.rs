//! File persistence for relayed transfers.
//!
//! The relay only hands over a filename and decoded bytes; where they land
//! is the store's concern.

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::{ParleyError, ParleyResult};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Durable storage for relayed file payloads.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Persist `data` under `filename`.
    async fn save(&self, filename: &str, data: &[u8]) -> ParleyResult<()>;
}

/// Directory-backed file store. Files land under a single flat directory;
/// a transfer reusing a filename overwrites the previous copy.
pub struct DirFileStore {
    root: PathBuf,
}

impl DirFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileStore for DirFileStore {
    async fn save(&self, filename: &str, data: &[u8]) -> ParleyResult<()> {
        // Never let a filename escape the store directory.
        let name = Path::new(filename)
            .file_name()
            .ok_or_else(|| ParleyError::Store(format!("unusable filename: {filename}")))?;

        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(name);
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        debug!(path = %path.display(), bytes = data.len(), "file persisted");
        Ok(())
    }
}

/// In-memory file store for tests.
#[derive(Default)]
pub struct MemoryFileStore {
    files: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of saved `(filename, bytes)` pairs.
    pub fn saved(&self) -> Vec<(String, Vec<u8>)> {
        self.files.lock().clone()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn save(&self, filename: &str, data: &[u8]) -> ParleyResult<()> {
        self.files
            .lock()
            .push((filename.to_string(), data.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dir_store_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirFileStore::new(dir.path().join("files"));
        store.save("notes.docx", b"payload").await.unwrap();

        let written = tokio::fs::read(dir.path().join("files/notes.docx"))
            .await
            .unwrap();
        assert_eq!(written, b"payload");
    }

    #[tokio::test]
    async fn dir_store_strips_path_components() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirFileStore::new(dir.path().join("files"));
        store.save("../../etc/evil.pdf", b"x").await.unwrap();

        assert!(dir.path().join("files/evil.pdf").exists());
        assert!(!dir.path().join("etc/evil.pdf").exists());
    }
}
