//! What happens to a staged item after it was fetched.
//!
//! For every item the resolver runs two steps:
//!
//! 1. **Public update**: when the item changed, or the public store lacks it, the
//!    public artifact is (re)built. Archives are extracted into a hidden temp
//!    directory beside the target and swapped in; plain files are copied.
//! 2. **Incoming disposition**: the staged file is kept, registered (`annex`),
//!    registered then released (`drop`) or deleted (`rm`) according to its destiny.
//!
//! A failed extraction leaves the previous public directory untouched and is
//! reported for this item only.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{ArchiveDirectories, Destiny};
use crate::contract::{RegistrationMode, RepositoryBackend};
use crate::error::ItemError;
use crate::extract::Extractor;
use crate::journal::{Journal, PlannedAction, StoreRole};

/// Outcome of fetching one link into the incoming store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedItem {
    pub repo_relative_path: PathBuf,
    /// Bytes were transferred.
    pub downloaded: bool,
    /// Bookkeeping changed, with or without a transfer.
    pub updated: bool,
    pub byte_count: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestinyOutcome {
    pub incoming_changed: bool,
    pub public_changed: bool,
}

/// Everything the resolver needs to know about one item.
#[derive(Debug, Clone)]
pub struct ItemPlan {
    pub url: String,
    /// Relative to the incoming root.
    pub incoming_path: PathBuf,
    /// Relative to the public root. For archives this is the extraction directory.
    pub public_path: PathBuf,
    pub is_archive: bool,
    pub destiny: Destiny,
    pub directories: ArchiveDirectories,
    /// Set for items registered without local bytes (fast and relaxed modes).
    pub registration: Option<RegistrationMode>,
}

/// [`Destiny`] once `auto` has been decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    Annex,
    Drop,
    Rm,
}

/// `auto` removes archives that were extracted into their own store and registers everything else.
pub fn resolve_destiny(destiny: Destiny, same_store: bool, is_archive: bool) -> Disposition {
    match destiny {
        Destiny::Keep => Disposition::Keep,
        Destiny::Annex => Disposition::Annex,
        Destiny::Drop => Disposition::Drop,
        Destiny::Rm => Disposition::Rm,
        Destiny::Auto if same_store && is_archive => Disposition::Rm,
        Destiny::Auto => Disposition::Annex,
    }
}

/// Result of resolving one item: the change flags plus the store-relative paths to commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub outcome: DestinyOutcome,
    pub incoming_touched: Vec<PathBuf>,
    pub public_touched: Vec<PathBuf>,
}

pub struct DestinyResolver<'a> {
    incoming: &'a dyn RepositoryBackend,
    public: &'a dyn RepositoryBackend,
    extractor: &'a dyn Extractor,
    same_store: bool,
    dry_run: bool,
}

impl<'a> DestinyResolver<'a> {
    pub fn new(
        incoming: &'a dyn RepositoryBackend,
        public: &'a dyn RepositoryBackend,
        extractor: &'a dyn Extractor,
        same_store: bool,
        dry_run: bool,
    ) -> Self {
        Self {
            incoming,
            public,
            extractor,
            same_store,
            dry_run,
        }
    }

    pub async fn resolve(
        &self,
        item: &ItemPlan,
        staged: &StagedItem,
        journal: &mut Journal,
    ) -> Result<Resolution, ItemError> {
        let incoming_abs = self.incoming.root().join(&item.incoming_path);
        // In a dry run the planned download never lands, so pretend it did.
        let incoming_present = incoming_abs.exists() || (self.dry_run && staged.downloaded);

        let mut resolution = Resolution::default();

        let public_abs = self.public.root().join(&item.public_path);
        let shared_artifact = self.same_store && !item.is_archive;
        if !shared_artifact && (staged.updated || !present(&public_abs)) {
            let changed = self
                .update_public(item, &incoming_abs, &public_abs, incoming_present, journal)
                .await?;
            if changed {
                resolution.outcome.public_changed = true;
                resolution.public_touched.push(item.public_path.clone());
            }
        }

        if incoming_present || staged.updated {
            let disposition = resolve_destiny(item.destiny, self.same_store, item.is_archive);
            debug!(path = %item.incoming_path.display(), ?disposition, "[DESTINY] Incoming disposition");
            let changed = self
                .dispose_incoming(item, staged, disposition, &incoming_abs, incoming_present, journal)
                .await?;
            if changed {
                resolution.outcome.incoming_changed = true;
                resolution.incoming_touched.push(item.incoming_path.clone());
            }
        }

        if self.same_store {
            let changed = resolution.outcome.incoming_changed || resolution.outcome.public_changed;
            resolution.outcome = DestinyOutcome {
                incoming_changed: changed,
                public_changed: changed,
            };
        }
        Ok(resolution)
    }

    async fn update_public(
        &self,
        item: &ItemPlan,
        incoming_abs: &Path,
        public_abs: &Path,
        incoming_present: bool,
        journal: &mut Journal,
    ) -> Result<bool, ItemError> {
        if let Some(mode) = item.registration {
            if item.is_archive {
                warn!(url = %item.url, path = %item.incoming_path.display(), "[DESTINY] Archive has no local content, public extraction skipped");
                return Ok(false);
            }
            if self.dry_run {
                journal.record(PlannedAction::RegisterUrl {
                    store: StoreRole::Public,
                    path: item.public_path.clone(),
                    url: item.url.clone(),
                    mode,
                });
            } else {
                self.public.register_url(&item.public_path, &item.url, mode).await?;
            }
            return Ok(true);
        }

        if !incoming_present {
            warn!(path = %item.incoming_path.display(), "[DESTINY] No incoming content to publish");
            return Ok(false);
        }

        if item.is_archive {
            if self.dry_run {
                journal.record(PlannedAction::Extract {
                    archive: item.incoming_path.clone(),
                    into: item.public_path.clone(),
                });
                return Ok(true);
            }
            let files = self.extract_into_public(item, incoming_abs, public_abs)?;
            for file in files {
                self.public.add_file(&item.public_path.join(file), None).await?;
            }
            return Ok(true);
        }

        if self.dry_run {
            journal.record(PlannedAction::CopyToPublic {
                from: item.incoming_path.clone(),
                to: item.public_path.clone(),
            });
            journal.record(PlannedAction::AddFile {
                store: StoreRole::Public,
                path: item.public_path.clone(),
                url: Some(item.url.clone()),
            });
            return Ok(true);
        }
        copy_atomically(incoming_abs, public_abs)?;
        self.public
            .add_file(&item.public_path, Some(item.url.clone()))
            .await?;
        info!(path = %item.public_path.display(), "[DESTINY] Published file");
        Ok(true)
    }

    /// Extract beside the target, then swap the new directory in.
    fn extract_into_public(
        &self,
        item: &ItemPlan,
        incoming_abs: &Path,
        public_abs: &Path,
    ) -> Result<Vec<PathBuf>, ItemError> {
        let parent = parent_of(public_abs);
        fs::create_dir_all(&parent).map_err(|e| ItemError::io(&parent, e))?;

        let staging = parent.join(format!(".extract-{}", uuid::Uuid::new_v4()));
        fs::create_dir(&staging).map_err(|e| ItemError::io(&staging, e))?;

        let files = match self.extractor.extract(incoming_abs, &staging, item.directories) {
            Ok(files) => files,
            Err(e) => {
                warn!(archive = %incoming_abs.display(), error = %e, "[DESTINY] Extraction failed, public directory left untouched");
                discard(&staging);
                return Err(e.into());
            }
        };

        if let Err(e) = replace_path(&staging, public_abs) {
            discard(&staging);
            return Err(ItemError::io(public_abs, e));
        }
        info!(archive = %item.incoming_path.display(), public = %item.public_path.display(), files = files.len(), "[DESTINY] Archive published");
        Ok(files.into_iter().collect())
    }

    async fn dispose_incoming(
        &self,
        item: &ItemPlan,
        staged: &StagedItem,
        disposition: Disposition,
        incoming_abs: &Path,
        incoming_present: bool,
        journal: &mut Journal,
    ) -> Result<bool, ItemError> {
        match disposition {
            Disposition::Keep => Ok(staged.updated),
            Disposition::Rm => {
                if !incoming_present {
                    return Ok(staged.updated);
                }
                if self.dry_run {
                    journal.record(PlannedAction::Remove {
                        store: StoreRole::Incoming,
                        path: item.incoming_path.clone(),
                    });
                } else {
                    fs::remove_file(incoming_abs).map_err(|e| ItemError::io(incoming_abs, e))?;
                    info!(path = %item.incoming_path.display(), "[DESTINY] Removed incoming file");
                }
                Ok(true)
            }
            Disposition::Annex | Disposition::Drop => {
                // Unchanged items were registered by the pass that fetched them.
                if !staged.updated {
                    return Ok(false);
                }
                self.register_incoming(item, journal).await?;
                if disposition == Disposition::Drop && item.registration.is_none() {
                    if self.dry_run {
                        journal.record(PlannedAction::DropContent {
                            store: StoreRole::Incoming,
                            path: item.incoming_path.clone(),
                        });
                    } else {
                        self.incoming.drop_content(&item.incoming_path).await?;
                        info!(path = %item.incoming_path.display(), "[DESTINY] Dropped incoming content");
                    }
                }
                Ok(true)
            }
        }
    }

    async fn register_incoming(&self, item: &ItemPlan, journal: &mut Journal) -> Result<(), ItemError> {
        match item.registration {
            Some(mode) if self.dry_run => journal.record(PlannedAction::RegisterUrl {
                store: StoreRole::Incoming,
                path: item.incoming_path.clone(),
                url: item.url.clone(),
                mode,
            }),
            Some(mode) => {
                self.incoming
                    .register_url(&item.incoming_path, &item.url, mode)
                    .await?
            }
            None if self.dry_run => journal.record(PlannedAction::AddFile {
                store: StoreRole::Incoming,
                path: item.incoming_path.clone(),
                url: Some(item.url.clone()),
            }),
            None => {
                self.incoming
                    .add_file(&item.incoming_path, Some(item.url.clone()))
                    .await?
            }
        }
        Ok(())
    }
}

fn parent_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// A dangling symlink still counts: annexed content may have been dropped on purpose.
pub(crate) fn present(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        warn!(path = %path.display(), error = ?e, "[DESTINY] Failed to remove staging directory");
    }
}

fn remove_any(path: &Path) -> std::io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Move `new` onto `target`, replacing whatever is there.
///
/// The old target is renamed aside first and only deleted once `new` is in place.
fn replace_path(new: &Path, target: &Path) -> std::io::Result<()> {
    if !present(target) {
        return fs::rename(new, target);
    }
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let aside = parent_of(target).join(format!(".{name}.old-{}", uuid::Uuid::new_v4()));
    fs::rename(target, &aside)?;
    if let Err(e) = fs::rename(new, target) {
        let _ = fs::rename(&aside, target);
        return Err(e);
    }
    if let Err(e) = remove_any(&aside) {
        warn!(path = %aside.display(), error = ?e, "[DESTINY] Failed to remove replaced public artifact");
    }
    Ok(())
}

/// Copy `from` onto `to` through a temp file in the destination directory.
fn copy_atomically(from: &Path, to: &Path) -> Result<(), ItemError> {
    let parent = parent_of(to);
    fs::create_dir_all(&parent).map_err(|e| ItemError::io(&parent, e))?;

    let mut source = fs::File::open(from).map_err(|e| ItemError::io(from, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| ItemError::io(&parent, e))?;
    std::io::copy(&mut source, tmp.as_file_mut()).map_err(|e| ItemError::io(to, e))?;
    if let Ok(modified) = source.metadata().and_then(|m| m.modified()) {
        let _ = tmp.as_file().set_modified(modified);
    }
    // Renaming replaces a symlinked previous copy instead of writing through it.
    tmp.persist(to).map_err(|e| ItemError::io(to, e.error))?;
    Ok(())
}
