//! Asynchronous file operations consumed by the history engine.
//!
//! The engine only talks to storage through the [`FileService`] trait
//! so tests and hosts can substitute their own providers. The bundled
//! [`LocalFileService`] handles `file`-scheme resources via `tokio::fs`.
//!
//! Listing writes are atomic: bytes go to a temp file in the target
//! directory which is then persisted over the destination.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use std::io::Write;
use tempfile::NamedTempFile;

use crate::domain::{HistoryError, Result};

/// Metadata for one child of a directory listing.
#[derive(Debug, Clone)]
pub struct DirEntryMeta {
    /// File name, no path components.
    pub name: String,
    /// Absolute path of the child.
    pub path: PathBuf,
    /// Last modification time, epoch millis. Zero when unavailable.
    pub mtime: i64,
    /// Whether the child is a regular file.
    pub is_file: bool,
}

/// Asynchronous file operations with a distinguished not-found kind.
///
/// All methods may fail with [`HistoryError::Io`]; callers classify
/// benign absence via [`HistoryError::is_not_found`].
#[async_trait]
pub trait FileService: Send + Sync {
    /// Whether this service can snapshot resources of `scheme`.
    fn can_handle(&self, scheme: &str) -> bool;

    /// Copy `from` to `to`, creating parent directories of `to`.
    /// Copy-on-write is used where the platform provides it.
    async fn clone_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Move `from` to `to`, creating parent directories of `to`.
    async fn move_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a file, or a whole directory tree when `recursive`.
    async fn delete(&self, path: &Path, recursive: bool) -> Result<()>;

    /// Read the full contents of a file.
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Atomically replace the contents of `path` with `data`.
    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// List the children of `dir` with stat metadata.
    async fn read_dir_with_meta(&self, dir: &Path) -> Result<Vec<DirEntryMeta>>;
}

/// `tokio::fs`-backed implementation for local `file` resources.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileService;

impl LocalFileService {
    pub fn new() -> Self {
        Self
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FileService for LocalFileService {
    fn can_handle(&self, scheme: &str) -> bool {
        scheme == "file"
    }

    async fn clone_file(&self, from: &Path, to: &Path) -> Result<()> {
        Self::ensure_parent(to).await?;
        tokio::fs::copy(from, to).await?;
        Ok(())
    }

    async fn move_file(&self, from: &Path, to: &Path) -> Result<()> {
        Self::ensure_parent(to).await?;
        tokio::fs::rename(from, to).await?;
        Ok(())
    }

    async fn delete(&self, path: &Path, recursive: bool) -> Result<()> {
        if recursive {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        Self::ensure_parent(path).await?;
        let path = path.to_path_buf();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let dir = path.parent().expect("write target always has a parent");
            let mut tmp = NamedTempFile::new_in(dir)?;
            tmp.write_all(&data)?;
            tmp.persist(&path).map_err(|e| HistoryError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| HistoryError::Storage(format!("write task failed: {e}")))?
    }

    async fn read_dir_with_meta(&self, dir: &Path) -> Result<Vec<DirEntryMeta>> {
        let mut children = Vec::new();
        let mut reader = tokio::fs::read_dir(dir).await?;
        while let Some(child) = reader.next_entry().await? {
            let meta = match child.metadata().await {
                Ok(meta) => meta,
                // Child vanished between listing and stat.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            children.push(DirEntryMeta {
                name: child.file_name().to_string_lossy().into_owned(),
                path: child.path(),
                mtime,
                is_file: meta.is_file(),
            });
        }
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let service = LocalFileService::new();
        let path = dir.path().join("nested").join("entries.json");

        service.write_file(&path, b"{\"version\":1}").await.unwrap();
        let bytes = service.read_file(&path).await.unwrap();
        assert_eq!(bytes, b"{\"version\":1}");
    }

    #[tokio::test]
    async fn write_replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let service = LocalFileService::new();
        let path = dir.path().join("entries.json");

        service.write_file(&path, b"old").await.unwrap();
        service.write_file(&path, b"new").await.unwrap();
        assert_eq!(service.read_file(&path).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let service = LocalFileService::new();
        let err = service
            .read_file(&dir.path().join("absent"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn clone_then_move_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let service = LocalFileService::new();
        let src = dir.path().join("a.txt");
        service.write_file(&src, b"contents").await.unwrap();

        let cloned = dir.path().join("store").join("ab12cd34.txt");
        service.clone_file(&src, &cloned).await.unwrap();
        assert!(src.exists() && cloned.exists());

        let moved = dir.path().join("store2").join("ab12cd34.txt");
        service.move_file(&cloned, &moved).await.unwrap();
        assert!(!cloned.exists() && moved.exists());

        service.delete(&moved, false).await.unwrap();
        assert!(!moved.exists());
        service
            .delete(&dir.path().join("store2"), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dir_listing_reports_files_with_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let service = LocalFileService::new();
        service
            .write_file(&dir.path().join("11aa22bb.txt"), b"x")
            .await
            .unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();

        let children = service.read_dir_with_meta(dir.path()).await.unwrap();
        assert_eq!(children.len(), 2);
        let file = children.iter().find(|c| c.is_file).unwrap();
        assert_eq!(file.name, "11aa22bb.txt");
        assert!(file.mtime > 0);
    }

    #[test]
    fn only_file_scheme_is_handled() {
        let service = LocalFileService::new();
        assert!(service.can_handle("file"));
        assert!(!service.can_handle("untitled"));
    }
}
