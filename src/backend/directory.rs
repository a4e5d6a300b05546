use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::contract::{RegistrationMode, RepositoryBackend};
use crate::error::BackendError;

/// A plain directory: files are kept as they are, nothing is versioned.
#[derive(Debug, Clone)]
pub struct DirectoryBackend {
    root: PathBuf,
}

impl DirectoryBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl RepositoryBackend for DirectoryBackend {
    fn root(&self) -> PathBuf {
        self.root.clone()
    }

    async fn init(&self, _description: &str) -> Result<(), BackendError> {
        std::fs::create_dir_all(&self.root).map_err(|source| BackendError::Io {
            path: self.root.clone(),
            source,
        })
    }

    async fn add_file(&self, path: &Path, source_url: Option<String>) -> Result<(), BackendError> {
        let full = self.root.join(path);
        if !full.exists() {
            return Err(BackendError::Io {
                path: full,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file to add is missing"),
            });
        }
        debug!(path = %path.display(), ?source_url, "[BACKEND] Directory store keeps file as is");
        Ok(())
    }

    async fn register_url(
        &self,
        _path: &Path,
        _url: &str,
        _mode: RegistrationMode,
    ) -> Result<(), BackendError> {
        Err(BackendError::Unsupported {
            capability: "register_url",
        })
    }

    async fn drop_content(&self, _path: &Path) -> Result<(), BackendError> {
        Err(BackendError::Unsupported {
            capability: "drop_content",
        })
    }

    async fn commit(&self, paths: &[PathBuf], message: &str) -> Result<(), BackendError> {
        debug!(paths = paths.len(), message, "[BACKEND] Directory store has no history, commit skipped");
        Ok(())
    }
}
