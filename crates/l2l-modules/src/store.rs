//! Filesystem primitives behind the `modules.fs.*` actions.

use async_trait::async_trait;
use l2l_types::error::L2lResult;
use std::path::{Path, PathBuf};

/// Filesystem primitives a peer exposes to its own session.
#[async_trait]
pub trait FileStore: Send + Sync + 'static {
    /// Directory that relative paths without a `cwd` resolve against.
    fn root(&self) -> &Path;

    /// Whether `path` is a file or a directory.
    async fn exists(&self, path: &Path) -> L2lResult<bool>;
    async fn is_file(&self, path: &Path) -> L2lResult<bool>;
    /// Create a directory and its parents.
    async fn mkdir(&self, path: &Path) -> L2lResult<()>;
    /// Remove a file, or a directory with its contents.
    async fn rm(&self, path: &Path) -> L2lResult<()>;
    async fn read(&self, path: &Path) -> L2lResult<String>;
    async fn write(&self, path: &Path, content: &str) -> L2lResult<()>;

    /// Resolve `path` against `cwd`, or against the root when absent.
    fn resolve(&self, path: &str, cwd: Option<&str>) -> PathBuf {
        let base = match cwd {
            Some(cwd) => self.root().join(cwd),
            None => self.root().to_path_buf(),
        };
        base.join(path)
    }
}

/// [`FileStore`] over the local disk.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn exists(&self, path: &Path) -> L2lResult<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn is_file(&self, path: &Path) -> L2lResult<bool> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn mkdir(&self, path: &Path) -> L2lResult<()> {
        Ok(tokio::fs::create_dir_all(path).await?)
    }

    async fn rm(&self, path: &Path) -> L2lResult<()> {
        let meta = tokio::fs::symlink_metadata(path).await?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn read(&self, path: &Path) -> L2lResult<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn write(&self, path: &Path, content: &str) -> L2lResult<()> {
        Ok(tokio::fs::write(path, content).await?)
    }
}
