//! Fetching remote files into the incoming store.
//!
//! [`Fetcher`] wraps a [`Transport`] with the guarantees the rest of the engine
//! relies on:
//!   - bytes land in `<dest>.download` and are renamed onto `<dest>` only after the
//!     transfer completed and its stamp agrees with what was expected
//!   - any failure removes the temp file and leaves an existing `<dest>` untouched
//!   - transient errors are retried a bounded number of times
//!
//! The HTTP implementation of the collaborator traits lives in [`http`].

pub mod http;

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::change::stamp_differs;
use crate::contract::{RemoteStamp, Transfer, Transport};
use crate::error::FetchError;

pub use http::HttpClient;

/// Total number of attempts for a transfer or a metadata request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Suffix of in-flight downloads.
pub const DOWNLOAD_SUFFIX: &str = "download";

/// Outcome of a successful [`Fetcher::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub bytes: i64,
    /// Response stamp, completed with the expected stamp where the response was silent.
    pub stamp: RemoteStamp,
}

/// `<dest>.download`
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name: OsString = dest.file_name().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(DOWNLOAD_SUFFIX);
    dest.with_file_name(name)
}

fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "[FETCH] Removed temporary file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = ?e, "[FETCH] Failed to remove temporary file"),
    }
}

pub struct Fetcher<'a> {
    transport: &'a dyn Transport,
    max_attempts: u32,
}

impl<'a> Fetcher<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self {
            transport,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Query the remote stamp of `url`, retrying transient failures.
    pub async fn stat(&self, url: &str) -> Result<RemoteStamp, FetchError> {
        let mut attempt = 1;
        loop {
            match self.transport.stat(url).await {
                Ok(stamp) => return Ok(stamp),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(url, attempt, error = %e, "[FETCH] Transient error on metadata request, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Download `url` onto `dest`.
    ///
    /// `expected` is the stamp the decision was based on; a response that
    /// contradicts it is discarded with [`FetchError::StampMismatch`].
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        expected: &RemoteStamp,
    ) -> Result<FetchResult, FetchError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| FetchError::PartialWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let tmp = temp_path_for(dest);
        // Left over from an interrupted run.
        remove_if_exists(&tmp);

        let mut attempt = 1;
        let transfer = loop {
            let result = match self.transport.download(url, &tmp).await {
                Ok(transfer) => verify_length(url, &tmp, transfer),
                Err(e) => Err(e),
            };
            match result {
                Ok(transfer) => break transfer,
                Err(e) => {
                    remove_if_exists(&tmp);
                    if e.is_transient() && attempt < self.max_attempts {
                        warn!(url, attempt, error = %e, "[FETCH] Transient download error, retrying");
                        attempt += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        };

        if stamp_differs(expected, transfer.stamp.size, transfer.stamp.mtime) {
            warn!(
                url,
                ?expected,
                received = ?transfer.stamp,
                "[FETCH] Response does not match the expected stamp, discarding download"
            );
            remove_if_exists(&tmp);
            return Err(FetchError::StampMismatch {
                url: url.to_string(),
            });
        }

        if let Err(source) = fs::rename(&tmp, dest) {
            remove_if_exists(&tmp);
            return Err(FetchError::PartialWrite {
                path: dest.to_path_buf(),
                source,
            });
        }

        let stamp = transfer.stamp.or(*expected);
        if let Some(mtime) = stamp.mtime {
            set_mtime(dest, mtime);
        }
        info!(url, path = %dest.display(), bytes = transfer.bytes, "[FETCH] Downloaded");
        Ok(FetchResult {
            bytes: transfer.bytes,
            stamp,
        })
    }
}

/// Compare what landed on disk against what the transport and the response claim.
fn verify_length(
    url: &str,
    tmp: &Path,
    transfer: Transfer,
) -> Result<Transfer, FetchError> {
    let on_disk = fs::metadata(tmp)
        .map_err(|source| FetchError::PartialWrite {
            path: tmp.to_path_buf(),
            source,
        })?
        .len() as i64;
    let expected = transfer.stamp.size.unwrap_or(transfer.bytes);
    if on_disk != transfer.bytes || on_disk != expected {
        return Err(FetchError::ShortRead {
            url: url.to_string(),
            expected,
            actual: on_disk,
        });
    }
    Ok(transfer)
}

/// Best effort: the mtime only serves later stat-based change detection.
fn set_mtime(path: &Path, mtime: i64) {
    if mtime < 0 {
        return;
    }
    let when = UNIX_EPOCH + Duration::from_secs(mtime as u64);
    let result = fs::File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(when));
    if let Err(e) = result {
        warn!(path = %path.display(), error = ?e, "[FETCH] Could not set modification time");
    }
}
