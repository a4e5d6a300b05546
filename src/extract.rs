//! Archive extraction.
//!
//! The engine only needs "unpack this archive into that directory and tell me
//! which files came out"; [`Extractor`] is that seam and [`TarExtractor`] the
//! default implementation for tar, tar.gz/tgz and tar.bz2/tbz2.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::ArchiveDirectories;
use crate::error::ExtractError;

/// Unpacks an archive into a directory.
pub trait Extractor: Send + Sync {
    /// Extract `archive` into the existing, empty directory `dest`.
    ///
    /// Returns the extracted files relative to `dest`.
    fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        directories: ArchiveDirectories,
    ) -> Result<BTreeSet<PathBuf>, ExtractError>;
}

#[derive(Debug, Clone, Copy)]
enum Compression {
    None,
    Gzip,
    Bzip2,
}

/// Archive suffixes this crate knows how to strip from a file name, longest first.
pub const ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tar.bz2", ".tgz", ".tbz2", ".tbz", ".tar"];

/// `1.tar.gz` -> `1`. Names without a known suffix lose their last extension.
pub fn strip_archive_suffix(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    for suffix in ARCHIVE_SUFFIXES {
        if lower.ends_with(suffix) && lower.len() > suffix.len() {
            return name[..name.len() - suffix.len()].to_string();
        }
    }
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[..idx].to_string(),
        _ => format!("{name}.extracted"),
    }
}

fn compression_of(archive: &Path) -> Option<Compression> {
    let name = archive.file_name()?.to_string_lossy().to_ascii_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(Compression::Gzip)
    } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") || name.ends_with(".tbz") {
        Some(Compression::Bzip2)
    } else if name.ends_with(".tar") {
        Some(Compression::None)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TarExtractor;

impl Extractor for TarExtractor {
    fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        directories: ArchiveDirectories,
    ) -> Result<BTreeSet<PathBuf>, ExtractError> {
        let io = |source| ExtractError::Io {
            archive: archive.to_path_buf(),
            source,
        };
        let compression = compression_of(archive)
            .ok_or_else(|| ExtractError::UnsupportedFormat(archive.to_path_buf()))?;

        let file = BufReader::new(File::open(archive).map_err(io)?);
        let reader: Box<dyn Read> = match compression {
            Compression::None => Box::new(file),
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(file)),
            Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(file)),
        };
        // `unpack` refuses entries that would land outside `dest`.
        tar::Archive::new(reader).unpack(dest).map_err(io)?;
        debug!(archive = %archive.display(), dest = %dest.display(), "[DESTINY] Archive unpacked");

        if directories == ArchiveDirectories::Strip {
            strip_single_leading_dir(dest).map_err(io)?;
        }

        let mut files = BTreeSet::new();
        collect_files(dest, dest, &mut files).map_err(io)?;
        info!(archive = %archive.display(), files = files.len(), "[DESTINY] Archive extracted");
        Ok(files)
    }
}

/// If `dir` holds exactly one entry and it is a directory, lift its contents into `dir`.
fn strip_single_leading_dir(dir: &Path) -> std::io::Result<()> {
    let entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    if entries.len() != 1 || !entries[0].file_type()?.is_dir() {
        return Ok(());
    }
    let inner = entries[0].path();
    let hoisted = dir.join(format!(".strip-{}", uuid::Uuid::new_v4()));
    fs::rename(&inner, &hoisted)?;
    for entry in fs::read_dir(&hoisted)? {
        let entry = entry?;
        fs::rename(entry.path(), dir.join(entry.file_name()))?;
    }
    fs::remove_dir(&hoisted)?;
    debug!(dir = %dir.display(), stripped = %inner.display(), "[DESTINY] Stripped leading directory");
    Ok(())
}

fn collect_files(root: &Path, dir: &Path, out: &mut BTreeSet<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let kind = entry.file_type()?;
        if kind.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.insert(rel.to_path_buf());
        }
    }
    Ok(())
}
