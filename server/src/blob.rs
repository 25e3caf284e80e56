//! Content blob storage.
//!
//! Blobs are opaque byte streams keyed by uuid, stored on the local disk
//! under `<data_dir>/<shard>/<uuid>` where the shard is the uuid's first
//! hyphen-separated component. The store never deletes: revisions reference
//! blobs forever.

use std::path::PathBuf;

use tokio::fs;
use tracing::debug;

use crate::error::ServerError;

#[derive(Debug, Clone)]
pub struct BlobStore {
    base: PathBuf,
}

impl BlobStore {
    pub async fn new(base: PathBuf) -> Result<Self, ServerError> {
        fs::create_dir_all(&base).await?;
        Ok(Self { base })
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base
    }

    fn blob_path(&self, uuid: &str) -> Result<PathBuf, ServerError> {
        let shard = uuid.split('-').next().unwrap_or("");
        if shard.is_empty() || !uuid.contains('-') {
            return Err(ServerError::BadRequest(format!("invalid blob uuid: {uuid}")));
        }
        Ok(self.base.join(shard).join(uuid))
    }

    /// Store `data` under `uuid`, returning the byte count written.
    pub async fn store(&self, uuid: &str, data: &[u8]) -> Result<u64, ServerError> {
        let path = self.blob_path(uuid)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        debug!(uuid, size = data.len(), "stored blob");
        Ok(data.len() as u64)
    }

    pub async fn retrieve(&self, uuid: &str) -> Result<Vec<u8>, ServerError> {
        let path = self.blob_path(uuid)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServerError::NotFound(format!("blob {uuid}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Hex SHA-1 of the stored content.
    pub async fn hash(&self, uuid: &str) -> Result<String, ServerError> {
        let data = self.retrieve(uuid).await?;
        Ok(toolkit::sha1_hex(&data))
    }
}
