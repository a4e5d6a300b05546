//! Concrete [`RepositoryBackend`] implementations, selected by [`BackendKind`].

mod directory;
mod git;

pub use directory::DirectoryBackend;
pub use git::GitBackend;

use std::path::PathBuf;

use crate::config::BackendKind;
use crate::contract::RepositoryBackend;

pub type BackendHandle = Box<dyn RepositoryBackend>;

/// Open the backend of `kind` rooted at `root`. Nothing is touched on disk until `init`.
pub fn open(kind: BackendKind, root: PathBuf) -> BackendHandle {
    match kind {
        BackendKind::Annex => Box::new(GitBackend::annex(root)),
        BackendKind::Git => Box::new(GitBackend::plain(root)),
        BackendKind::Directory => Box::new(DirectoryBackend::new(root)),
    }
}
