#![allow(unused)]

//! # contract: collaborator interfaces of the mirror engine
//!
//! The engine never talks to the network or to a version-control system directly.
//! It goes through the traits defined here, so the same pass logic drives real
//! HTTP/git implementations in production and in-memory fakes or `mockall` mocks in tests.
//!
//! - [`PageSource`]: lists the candidate links on a web page.
//! - [`Transport`]: reads remote metadata and transfers bytes into a local file.
//! - [`RepositoryBackend`]: registers, drops and commits files in a content store.
//!
//! ## Mocking & Testing
//! All traits are annotated for `mockall` (feature `test-export-mocks`, on by default).

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use mockall::{automock, predicate::*};

use crate::error::{BackendError, FetchError};

/// One `<a>` element found on a page, with its `href` already resolved to an absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCandidate {
    pub url: String,
    pub anchor_text: String,
}

/// Size and modification time as reported by the remote side.
///
/// Either field is `None` when the server did not send the corresponding header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteStamp {
    /// `Content-Length`, in bytes.
    pub size: Option<i64>,
    /// `Last-Modified`, in seconds since the Unix epoch.
    pub mtime: Option<i64>,
}

impl RemoteStamp {
    /// Fills the fields missing in `self` from `fallback`.
    pub fn or(self, fallback: RemoteStamp) -> RemoteStamp {
        RemoteStamp {
            size: self.size.or(fallback.size),
            mtime: self.mtime.or(fallback.mtime),
        }
    }
}

/// Result of one raw transfer performed by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Number of bytes written to the destination file.
    pub bytes: i64,
    /// Stamp taken from the response that carried the body.
    pub stamp: RemoteStamp,
}

/// How a backend should register a URL for which no bytes were fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationMode {
    /// The backend may query the remote for metadata, but must not fetch content.
    Fast,
    /// The backend must not contact the remote at all.
    Relaxed,
}

/// Lists candidate links on a page.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch `url` and return every link found on it.
    async fn links(&self, url: &str) -> Result<Vec<LinkCandidate>, FetchError>;
}

/// Raw access to remote resources.
///
/// Implementations perform exactly one attempt per call; retries, temporary
/// files and post-conditions are the [`Fetcher`](crate::download::Fetcher)'s job.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Metadata-only request (HTTP `HEAD`).
    async fn stat(&self, url: &str) -> Result<RemoteStamp, FetchError>;

    /// Stream the body of `url` into a freshly created file at `dest`.
    async fn download(&self, url: &str, dest: &Path) -> Result<Transfer, FetchError>;
}

/// Content store the engine writes into. Paths are relative to the store root.
///
/// Implementations map these calls onto git, git-annex or a plain directory; the
/// engine treats them as opaque.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RepositoryBackend: Send + Sync {
    /// Absolute root directory of the store.
    fn root(&self) -> PathBuf;

    /// Create the store if it does not exist yet. Must be a no-op on an existing store.
    async fn init(&self, description: &str) -> Result<(), BackendError>;

    /// Register a file whose bytes are present locally, optionally remembering where it came from.
    async fn add_file(&self, path: &Path, source_url: Option<String>) -> Result<(), BackendError>;

    /// Register `path` as available from `url` without local bytes.
    async fn register_url(
        &self,
        path: &Path,
        url: &str,
        mode: RegistrationMode,
    ) -> Result<(), BackendError>;

    /// Release the local content of a registered file. Its metadata stays in the store.
    async fn drop_content(&self, path: &Path) -> Result<(), BackendError>;

    /// Record the current state of `paths` with `message`.
    async fn commit(&self, paths: &[PathBuf], message: &str) -> Result<(), BackendError>;
}
