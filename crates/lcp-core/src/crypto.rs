//! Content digests for integrity checks

use crate::error::LcpResult;
use crate::fs::FileHandle;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 64 * 1024;

#[async_trait]
pub trait CryptoProvider: Send + Sync {
    /// Raw digest of the file's current contents
    async fn hash_file(&self, file: &FileHandle) -> LcpResult<Vec<u8>>;

    fn to_hex(&self, raw: &[u8]) -> LcpResult<String>;
}

/// SHA-256 with lowercase hex encoding
#[derive(Debug, Clone, Default)]
pub struct Sha256Provider;

#[async_trait]
impl CryptoProvider for Sha256Provider {
    async fn hash_file(&self, file: &FileHandle) -> LcpResult<Vec<u8>> {
        let mut reader = tokio::fs::File::open(file.path()).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            let read = reader.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }

        Ok(hasher.finalize().to_vec())
    }

    fn to_hex(&self, raw: &[u8]) -> LcpResult<String> {
        Ok(hex::encode(raw))
    }
}
