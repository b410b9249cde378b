//! # sb-storage-local
//! sigmaboard/crates/sb-plugins/sb-storage-local/src/lib.rs
//! Local filesystem implementation of `MediaStore`.
//! Every upload lands flat in one directory as `{alias}_{timestamp}_{name}`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use sb_core::error::{AppError, Result};
use sb_core::traits::MediaStore;
use sb_core::validation::media_filename;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub struct LocalMediaStore {
    /// Root directory for all uploads (e.g., "./data/uploads")
    root_path: PathBuf,
    /// Public URL prefix (e.g., "/uploads")
    url_prefix: String,
}

impl LocalMediaStore {
    pub fn new(root: PathBuf, url_prefix: String) -> Self {
        Self {
            root_path: root,
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Creates the upload directory if it is missing.
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root_path).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Resolves a stored name inside the root, refusing anything path-like.
    fn path_for(&self, filename: &str) -> Result<PathBuf> {
        let is_plain = !filename.is_empty()
            && Path::new(filename).file_name().and_then(|n| n.to_str()) == Some(filename)
            && !filename.contains(['/', '\\']);
        if !is_plain {
            return Err(AppError::ValidationError(format!(
                "invalid media name: {filename}"
            )));
        }
        Ok(self.root_path.join(filename))
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    /// Writes the bytes under a name salted with the author and the current time.
    /// Never overwrites an existing file.
    async fn save_upload(&self, alias: &str, original_name: &str, data: &[u8]) -> Result<String> {
        let filename = media_filename(alias, Utc::now(), original_name);
        let target_path = self.path_for(&filename)?;

        fs::create_dir_all(&self.root_path).await?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target_path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    AppError::Conflict(format!("media file {filename} already exists"))
                }
                _ => AppError::from(e),
            })?;
        file.write_all(data).await?;
        file.flush().await?;

        tracing::debug!(%filename, bytes = data.len(), "stored upload");
        Ok(filename)
    }

    async fn delete(&self, filename: &str) -> Result<()> {
        let path = self.path_for(filename)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(%filename, "removed upload");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(%filename, "media file already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn url(&self, filename: &str) -> String {
        format!("{}/{}", self.url_prefix, filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalMediaStore::new(dir.path().to_path_buf(), "/uploads/".into());

        let name = store.save_upload("4821", "cat pic.png", b"png-bytes").await.unwrap();
        assert!(name.starts_with("4821_"));
        assert!(name.ends_with("_cat_pic.png"));
        assert_eq!(store.url(&name), format!("/uploads/{name}"));

        let on_disk = dir.path().join(&name);
        assert_eq!(std::fs::read(&on_disk).unwrap(), b"png-bytes");

        store.delete(&name).await.unwrap();
        assert!(!on_disk.exists());
        // Deleting twice is fine.
        store.delete(&name).await.unwrap();
    }

    #[tokio::test]
    async fn refuses_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalMediaStore::new(dir.path().to_path_buf(), "/uploads".into());
        assert!(store.delete("../secret").await.is_err());
        assert!(store.delete("").await.is_err());
    }
}
