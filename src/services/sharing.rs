// src/services/sharing.rs
use crate::errors::StyleError;
use crate::models::ImageRef;
use crate::services::image_processor::{detect_mime, extension_for_mime};
use log::info;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Writes images to a directory the HTTP layer serves, so they can be handed to other apps.
pub struct ShareService {
    dir: PathBuf,
    client: Client,
}

impl ShareService {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            client: Client::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Materializes the image as `stylemorph_<uuid>.<ext>` and returns the file name.
    /// Existing files are never overwritten.
    pub async fn export(&self, image_ref: &ImageRef) -> Result<String, StyleError> {
        let data = if image_ref.is_embedded() {
            image_ref
                .decode_embedded()
                .ok_or_else(|| StyleError::Share("Malformed embedded image".to_string()))?
        } else {
            self.download(image_ref.as_str()).await?
        };

        let extension = extension_for_mime(detect_mime(&data));
        let file_name = format!("stylemorph_{}.{}", Uuid::new_v4().simple(), extension);

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StyleError::Share(format!("Cannot create share directory: {}", e)))?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.dir.join(&file_name))
            .await
            .map_err(|e| StyleError::Share(format!("Failed to create {}: {}", file_name, e)))?;
        file.write_all(&data)
            .await
            .map_err(|e| StyleError::Share(format!("Failed to write image: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| StyleError::Share(format!("Failed to write image: {}", e)))?;

        info!("Exported {} bytes to {}", data.len(), file_name);
        Ok(file_name)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, StyleError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StyleError::Share(format!("Failed to download image: {}", e)))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(StyleError::Share(format!(
                "Failed to download image: status {}",
                response.status()
            )));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| StyleError::Share(format!("Failed to read image: {}", e)))?;
        Ok(data.to_vec())
    }
}
