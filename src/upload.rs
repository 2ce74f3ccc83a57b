//! Temporary on-disk storage for uploaded files.
//!
//! A [`TempUpload`] owns its file. Removal is attempted exactly once: either
//! explicitly through [`TempUpload::remove`] or, if the request is abandoned
//! before that, when the value is dropped.

use axum::extract::Multipart;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::RelayError;

#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
    file_name: String,
    content_type: Option<String>,
    size: u64,
    removed: bool,
}

impl TempUpload {
    /// Spool the multipart field named `field_name` into `dir`.
    ///
    /// Returns `Ok(None)` when the field is missing or empty.
    pub async fn from_multipart(
        multipart: &mut Multipart,
        field_name: &str,
        dir: &Path,
    ) -> Result<Option<Self>, RelayError> {
        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|e| RelayError::Validation(format!("Multipart error: {}", e)))?
        {
            if field.name() != Some(field_name) {
                continue;
            }

            let mut upload = Self::create(
                dir,
                field.file_name().unwrap_or("upload").to_string(),
                field.content_type().map(str::to_string),
            )
            .await?;

            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&upload.path)
                .await
                .map_err(|e| RelayError::Configuration(format!("Failed to open temp file: {}", e)))?;

            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| RelayError::Validation(format!("Failed to read file: {}", e)))?
            {
                file.write_all(&chunk).await.map_err(|e| {
                    RelayError::Configuration(format!("Failed to write temp file: {}", e))
                })?;
                upload.size += chunk.len() as u64;
            }
            file.flush()
                .await
                .map_err(|e| RelayError::Configuration(format!("Failed to write temp file: {}", e)))?;

            if upload.size == 0 {
                return Ok(None);
            }

            debug!(
                "Spooled upload {} ({} bytes) to {}",
                upload.file_name,
                upload.size,
                upload.path.display()
            );
            return Ok(Some(upload));
        }

        Ok(None)
    }

    /// Write `data` into a new temp file under `dir`.
    #[cfg(test)]
    pub async fn write(
        dir: &Path,
        file_name: &str,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Result<Self, RelayError> {
        let mut upload =
            Self::create(dir, file_name.to_string(), content_type.map(str::to_string)).await?;
        tokio::fs::write(&upload.path, data)
            .await
            .map_err(|e| RelayError::Configuration(format!("Failed to write temp file: {}", e)))?;
        upload.size = data.len() as u64;
        Ok(upload)
    }

    async fn create(
        dir: &Path,
        file_name: String,
        content_type: Option<String>,
    ) -> Result<Self, RelayError> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            RelayError::Configuration(format!(
                "Upload directory {} unavailable: {}",
                dir.display(),
                e
            ))
        })?;

        let path = dir.join(uuid::Uuid::new_v4().simple().to_string());
        tokio::fs::File::create(&path)
            .await
            .map_err(|e| RelayError::Configuration(format!("Failed to create temp file: {}", e)))?;

        // From here on Drop takes care of the file
        Ok(Self {
            path,
            file_name,
            content_type,
            size: 0,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Delete the temp file now. Consumes the upload so it cannot be reused.
    pub fn remove(mut self) {
        self.delete();
    }

    fn delete(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed temp upload {}", self.path.display()),
            Err(e) => warn!(
                path = %self.path.display(),
                "Failed to remove temp upload: {}", e
            ),
        }
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        self.delete();
    }
}
