//! Error types for every stage of a mirror pass.
//!
//! Errors are split by how far they are allowed to travel:
//! - [`SyncError`] aborts the whole pass and reaches the CLI unchanged.
//! - [`ItemError`] is caught at the per-link boundary and folded into the report.
//! - The remaining enums belong to one collaborator each and are wrapped by the two above.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or saving the stamp store document.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("incompatible stamp store version {found:?} in {path} (expected {expected:?})")]
    IncompatibleStoreVersion {
        path: PathBuf,
        found: String,
        expected: &'static str,
    },
    #[error("stamp store {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("stamp store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while talking to the remote side.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Network {
        url: String,
        message: String,
        transient: bool,
    },
    #[error("{url} answered with HTTP status {status}")]
    Status { url: String, status: u16 },
    #[error("short read from {url}: expected {expected} bytes, got {actual}")]
    ShortRead {
        url: String,
        expected: i64,
        actual: i64,
    },
    #[error("downloaded {url} does not match its expected stamp")]
    StampMismatch { url: String },
    #[error("invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("writing {path}: {source}")]
    PartialWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Returns `true` if retrying might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { transient, .. } => *transient,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::ShortRead { .. } => true,
            Self::StampMismatch { .. } | Self::InvalidUrl { .. } | Self::PartialWrite { .. } => {
                false
            }
        }
    }
}

/// Errors raised by a repository backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend does not support {capability}")]
    Unsupported { capability: &'static str },
    #[error("`git {command}` failed in {root}: {stderr}")]
    Command {
        root: PathBuf,
        command: String,
        stderr: String,
    },
    #[error("backend I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while unpacking an archive.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("extracting {archive}: {source}")]
    Io {
        archive: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while loading and validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unknown destiny policy {value:?} in section {section:?}")]
    UnknownDestinyPolicy { section: String, value: String },
    #[error("invalid value {value:?} for {key} in section {section:?}")]
    InvalidValue {
        section: String,
        key: &'static str,
        value: String,
    },
    #[error("invalid regex for {key} in section {section:?}: {source}")]
    InvalidRegex {
        section: String,
        key: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("section {section:?} would delete the only copy of its files: incoming_destiny=rm with incoming and public in the same store")]
    DestructiveDestiny { section: String },
    #[error("duplicate section name {0:?}")]
    DuplicateSection(String),
}

/// A failure confined to a single link; the pass carries on with the next one.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("cannot derive a file name for {url} from template {template:?}")]
    Filename { url: String, template: String },
    #[error("I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ItemError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A failure that stops the pass. Nothing is committed once one of these is raised.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("section {section:?} lists {found} links, more than the configured limit of {limit}")]
    TooManyLinks {
        section: String,
        found: usize,
        limit: usize,
    },
    #[error("failed to initialise {role} store at {path}: {source}")]
    BackendInit {
        role: &'static str,
        path: PathBuf,
        #[source]
        source: BackendError,
    },
    #[error("failed to commit {role} store: {source}")]
    Commit {
        role: &'static str,
        #[source]
        source: BackendError,
    },
    #[error("failed to create directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("another pass holds the lock {0}")]
    Locked(PathBuf),
}
