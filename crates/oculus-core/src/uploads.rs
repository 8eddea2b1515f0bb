//! The upload area: raw uploaded files stored under their original names.
//!
//! Names are not made unique. A second upload with the same name replaces the
//! first file, last writer wins.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// URL prefix under which stored uploads are served.
pub const UPLOAD_ROUTE: &str = "/uploads";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("invalid upload filename: {0:?}")]
    InvalidFilename(String),
    #[error("upload storage I/O: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct UploadArea {
    root: PathBuf,
}

impl UploadArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the upload directory if it does not exist yet.
    pub async fn ensure_exists(&self) -> Result<(), UploadError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Filesystem path for `filename`. Rejects names that would escape the upload area.
    pub fn path_for(&self, filename: &str) -> Result<PathBuf, UploadError> {
        if !is_plain_filename(filename) {
            return Err(UploadError::InvalidFilename(filename.to_string()));
        }
        Ok(self.root.join(filename))
    }

    /// Write `content` under `filename`, replacing any existing file.
    pub async fn save(&self, filename: &str, content: &[u8]) -> Result<PathBuf, UploadError> {
        let path = self.path_for(filename)?;
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    /// Remove a stored upload. `Ok(false)` when the file was already gone.
    pub async fn remove(&self, filename: &str) -> Result<bool, UploadError> {
        let path = self.path_for(filename)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// URL path at which `filename` is served.
    pub fn public_path(filename: &str) -> String {
        format!("{UPLOAD_ROUTE}/{filename}")
    }
}

fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_filenames() {
        assert!(is_plain_filename("cat.jpg"));
        assert!(is_plain_filename("my photo (1).png"));
        assert!(!is_plain_filename(""));
        assert!(!is_plain_filename(".."));
        assert!(!is_plain_filename("../etc/passwd"));
        assert!(!is_plain_filename("a\\b.png"));
    }

    #[test]
    fn test_public_path() {
        assert_eq!(UploadArea::public_path("cat.jpg"), "/uploads/cat.jpg");
    }

    #[tokio::test]
    async fn test_save_overwrites_same_name() {
        let dir = tempfile::tempdir().unwrap();
        let area = UploadArea::new(dir.path());
        area.save("a.png", b"first").await.unwrap();
        let path = area.save("a.png", b"second").await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let area = UploadArea::new(dir.path());
        area.save("a.png", b"x").await.unwrap();
        assert!(area.remove("a.png").await.unwrap());
        assert!(!area.remove("a.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_exists_creates_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let area = UploadArea::new(dir.path().join("nested/uploads"));
        area.ensure_exists().await.unwrap();
        assert!(area.root().is_dir());
    }

    #[tokio::test]
    async fn test_save_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let area = UploadArea::new(dir.path());
        assert!(matches!(
            area.save("../escape.png", b"x").await,
            Err(UploadError::InvalidFilename(_))
        ));
    }
}
