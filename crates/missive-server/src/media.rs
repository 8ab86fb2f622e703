//! Filesystem-backed media storage.
//!
//! Uploaded attachments are stored as opaque files named by their id. The
//! store never inspects content; clients decide what the bytes mean.

use std::path::PathBuf;

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServerError;

/// Identifier of one stored media object.
pub type MediaId = Uuid;

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    max_size: usize,
    public_base_url: String,
}

impl MediaStore {
    /// Creates the root directory if missing.
    pub async fn new(
        root: PathBuf,
        max_size: usize,
        public_base_url: String,
    ) -> Result<Self, ServerError> {
        fs::create_dir_all(&root).await.map_err(|e| {
            ServerError::MediaStorage(format!(
                "Failed to create media directory '{}': {}",
                root.display(),
                e
            ))
        })?;

        info!(path = %root.display(), "Media store initialized");

        Ok(Self {
            root,
            max_size,
            public_base_url,
        })
    }

    pub async fn store(&self, data: &[u8]) -> Result<MediaId, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty upload".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::MediaTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let id = Uuid::new_v4();
        let path = self.media_path(&id);

        fs::write(&path, data).await.map_err(|e| {
            ServerError::MediaStorage(format!("Failed to write media {}: {}", id, e))
        })?;

        debug!(id = %id, size = data.len(), "Stored media");
        Ok(id)
    }

    pub async fn open(&self, id: MediaId) -> Result<Vec<u8>, ServerError> {
        let path = self.media_path(&id);

        if !path.exists() {
            return Err(ServerError::MediaNotFound(id));
        }

        let data = fs::read(&path).await.map_err(|e| {
            ServerError::MediaStorage(format!("Failed to read media {}: {}", id, e))
        })?;

        debug!(id = %id, size = data.len(), "Read media");
        Ok(data)
    }

    pub async fn delete(&self, id: MediaId) -> Result<(), ServerError> {
        let path = self.media_path(&id);

        if !path.exists() {
            return Err(ServerError::MediaNotFound(id));
        }

        fs::remove_file(&path).await.map_err(|e| {
            ServerError::MediaStorage(format!("Failed to delete media {}: {}", id, e))
        })?;

        debug!(id = %id, "Deleted media");
        Ok(())
    }

    /// URL clients embed in messages to fetch this object later.
    pub fn download_url(&self, id: MediaId) -> String {
        format!("{}/media/{}", self.public_base_url, id)
    }

    /// Filenames derive from the uuid alone, so ids cannot escape the root.
    fn media_path(&self, id: &MediaId) -> PathBuf {
        self.root.join(id.to_string())
    }
}
