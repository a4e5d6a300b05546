//! Decides whether a remote resource has to be fetched again.
//!
//! Stamps are weak evidence: a field only counts as changed when both sides
//! report it and the values differ. A server that never sends `Last-Modified`
//! therefore never triggers a re-download on its own.

use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::debug;

use crate::contract::RemoteStamp;
use crate::stamps::StampRecord;

/// Size and mtime of a local file, as returned by `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalStat {
    pub size: i64,
    pub mtime: Option<i64>,
}

impl LocalStat {
    pub fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);
        Some(Self {
            size: meta.len() as i64,
            mtime,
        })
    }
}

/// Which evidence a decision was based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    Forced,
    PriorRecord,
    /// No record, but a file already sits at the local path.
    LocalFile(LocalStat),
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadDecision {
    pub download: bool,
    pub evidence: Evidence,
}

fn differs(remote: Option<i64>, known: Option<i64>) -> bool {
    matches!((remote, known), (Some(r), Some(k)) if r != k)
}

/// `true` when `remote` reports a size or mtime that contradicts `known`.
pub fn stamp_differs(remote: &RemoteStamp, known_size: Option<i64>, known_mtime: Option<i64>) -> bool {
    differs(remote.size, known_size) || differs(remote.mtime, known_mtime)
}

pub struct ChangeDetector;

impl ChangeDetector {
    /// Decide for a URL whose remote stamp has been queried.
    pub fn decide(
        url: &str,
        local_path: &Path,
        prior: Option<&StampRecord>,
        remote: &RemoteStamp,
        force: bool,
    ) -> DownloadDecision {
        let decision = if force {
            DownloadDecision {
                download: true,
                evidence: Evidence::Forced,
            }
        } else if let Some(prior) = prior {
            DownloadDecision {
                download: stamp_differs(remote, prior.size, prior.mtime),
                evidence: Evidence::PriorRecord,
            }
        } else if let Some(local) = LocalStat::of(local_path) {
            DownloadDecision {
                download: stamp_differs(remote, Some(local.size), local.mtime),
                evidence: Evidence::LocalFile(local),
            }
        } else {
            DownloadDecision {
                download: true,
                evidence: Evidence::Nothing,
            }
        };
        debug!(url, path = %local_path.display(), ?remote, ?decision, "[FETCH] Change decision");
        decision
    }

    /// Decide without any network evidence (fast and relaxed modes).
    pub fn decide_offline(local_path: &Path, prior: Option<&StampRecord>) -> DownloadDecision {
        if prior.is_some() {
            return DownloadDecision {
                download: false,
                evidence: Evidence::PriorRecord,
            };
        }
        match LocalStat::of(local_path) {
            Some(local) => DownloadDecision {
                download: false,
                evidence: Evidence::LocalFile(local),
            },
            None => DownloadDecision {
                download: true,
                evidence: Evidence::Nothing,
            },
        }
    }
}
