//! Destination files for acquired publications

use crate::error::LcpResult;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Open file a download writes into. Writes are serialized.
#[derive(Debug)]
pub struct FileHandle {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileHandle {
    pub fn new(path: PathBuf, file: File) -> Self {
        Self {
            path,
            file: Mutex::new(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write_all(&self, chunk: &[u8]) -> LcpResult<()> {
        self.file.lock().await.write_all(chunk).await?;
        Ok(())
    }

    /// Flush buffered writes and sync contents to disk
    pub async fn sync(&self) -> LcpResult<()> {
        let mut file = self.file.lock().await;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}

/// Allocates destination files
#[async_trait]
pub trait FileSystemProvider: Send + Sync {
    async fn get_file(&self, path: &Path) -> LcpResult<FileHandle>;
}

/// Local disk, via tokio::fs
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystemProvider for LocalFileSystem {
    /// Create (or truncate) the file, creating missing parent directories
    async fn get_file(&self, path: &Path) -> LcpResult<FileHandle> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await?;

        Ok(FileHandle::new(path.to_path_buf(), file))
    }
}
