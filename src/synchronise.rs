//! Coordinating module for one fetch-stage-publish pass over all sections.

use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, info_span, warn, Instrument};

use fs2::FileExt;

use crate::change::{ChangeDetector, Evidence};
use crate::config::{Mode, SectionConfig, SyncConfig};
use crate::contract::{LinkCandidate, PageSource, RegistrationMode, RepositoryBackend, Transport};
use crate::destiny::{present, DestinyResolver, ItemPlan, Resolution, StagedItem};
use crate::download::Fetcher;
use crate::error::{FetchError, ItemError, SyncError};
use crate::extract::{strip_archive_suffix, Extractor};
use crate::journal::{Journal, PlannedAction, StoreRole};
use crate::links::{render_filename, PageCache};
use crate::stamps::{StampRecord, StampStore};

/// Hidden directory inside the incoming store holding the pass state.
pub const STATE_DIR: &str = ".web-mirror";
pub const STAMPS_FILE: &str = "stamps.json";
pub const LOCK_FILE: &str = "lock";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Describe every mutation instead of performing it.
    pub dry_run: bool,
    /// Download every link regardless of stamps.
    pub force_download: bool,
}

/// Counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub sections: usize,
    pub links_seen: usize,
    pub links_kept: usize,
    pub downloads: usize,
    pub bytes_downloaded: i64,
    pub incoming_changes: usize,
    pub public_changes: usize,
    pub errors: usize,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sections={} links={}/{} downloads={} bytes={} incoming={} public={} errors={}",
            self.sections,
            self.links_kept,
            self.links_seen,
            self.downloads,
            self.bytes_downloaded,
            self.incoming_changes,
            self.public_changes,
            self.errors
        )
    }
}

/// A link (or section page) that failed without stopping the pass.
#[derive(Debug)]
pub struct ItemFailure {
    pub url: String,
    pub error: ItemError,
}

#[derive(Debug)]
pub struct SyncReport {
    pub stats: RunStats,
    pub failures: Vec<ItemFailure>,
    /// Only populated in dry-run mode.
    pub planned: Vec<PlannedAction>,
}

/// Mutable state owned by a single pass.
struct PassState {
    stamps: StampStore,
    stamps_path: PathBuf,
    stats: RunStats,
    failures: Vec<ItemFailure>,
    journal: Journal,
    incoming_touched: BTreeSet<PathBuf>,
    public_touched: BTreeSet<PathBuf>,
}

impl PassState {
    fn fail(&mut self, url: &str, error: ItemError) {
        warn!(url, error = %error, "[SYNC] Item failed, continuing");
        self.stats.errors += 1;
        self.failures.push(ItemFailure {
            url: url.to_string(),
            error,
        });
    }
}

/// Drives a pass over every configured section.
///
/// When incoming and public are the same store pass the same backend twice.
pub struct Synchroniser<'a> {
    config: &'a SyncConfig,
    incoming: &'a dyn RepositoryBackend,
    public: &'a dyn RepositoryBackend,
    transport: &'a dyn Transport,
    pages: &'a dyn PageSource,
    extractor: &'a dyn Extractor,
    options: SyncOptions,
}

impl<'a> Synchroniser<'a> {
    pub fn new(
        config: &'a SyncConfig,
        incoming: &'a dyn RepositoryBackend,
        public: &'a dyn RepositoryBackend,
        transport: &'a dyn Transport,
        pages: &'a dyn PageSource,
        extractor: &'a dyn Extractor,
    ) -> Self {
        Self {
            config,
            incoming,
            public,
            transport,
            pages,
            extractor,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Run one pass. `cache` is scoped to this pass by the caller.
    pub async fn run(&self, cache: &mut PageCache) -> Result<SyncReport, SyncError> {
        let run_id = uuid::Uuid::new_v4();
        let span = info_span!("sync", %run_id, dry_run = self.options.dry_run);
        self.run_pass(cache).instrument(span).await
    }

    async fn run_pass(&self, cache: &mut PageCache) -> Result<SyncReport, SyncError> {
        let same_store = self.config.same_store();
        let incoming_root = self.incoming.root();
        let public_root = self.public.root();
        let state_dir = incoming_root.join(STATE_DIR);
        info!(
            incoming = %incoming_root.display(),
            public = %public_root.display(),
            same_store,
            "[SYNC] Starting pass"
        );

        let mut journal = Journal::new();
        // Held until the end of the pass; closing the file releases the lock.
        let _lock = if self.options.dry_run {
            None
        } else {
            Some(acquire_lock(&state_dir)?)
        };
        self.init_stores(same_store, &mut journal).await?;

        let stamps_path = state_dir.join(STAMPS_FILE);
        let stamps = StampStore::load(&stamps_path)?;

        let mut state = PassState {
            stamps,
            stamps_path,
            stats: RunStats::default(),
            failures: Vec::new(),
            journal,
            incoming_touched: BTreeSet::new(),
            public_touched: BTreeSet::new(),
        };
        let resolver = DestinyResolver::new(
            self.incoming,
            self.public,
            self.extractor,
            same_store,
            self.options.dry_run,
        );

        for section in &self.config.sections {
            self.run_section(section, cache, &resolver, &mut state).await?;
        }

        self.persist_stamps(&mut state)?;
        if self.options.dry_run && state.stamps.is_dirty() {
            state.journal.record(PlannedAction::SaveStamps);
            state
                .incoming_touched
                .insert(Path::new(STATE_DIR).join(STAMPS_FILE));
        }
        self.commit(same_store, &mut state).await?;

        info!(stats = %state.stats, failures = state.failures.len(), "[SYNC] Pass complete");
        Ok(SyncReport {
            stats: state.stats,
            failures: state.failures,
            planned: state.journal.into_actions(),
        })
    }

    async fn init_stores(&self, same_store: bool, journal: &mut Journal) -> Result<(), SyncError> {
        let mut stores = vec![(StoreRole::Incoming, self.incoming)];
        if !same_store {
            stores.push((StoreRole::Public, self.public));
        }
        for (role, backend) in stores {
            if self.options.dry_run {
                let root = backend.root();
                if !root.exists() {
                    journal.record(PlannedAction::InitStore {
                        store: role,
                        root,
                    });
                }
                continue;
            }
            backend
                .init(&format!("web-mirror {role}"))
                .await
                .map_err(|source| {
                    error!(role = role.as_str(), error = %source, "[SYNC] Backend init failed");
                    SyncError::BackendInit {
                        role: role.as_str(),
                        path: backend.root(),
                        source,
                    }
                })?;
        }
        Ok(())
    }

    async fn run_section(
        &self,
        section: &SectionConfig,
        cache: &mut PageCache,
        resolver: &DestinyResolver<'_>,
        state: &mut PassState,
    ) -> Result<(), SyncError> {
        state.stats.sections += 1;
        info!(section = %section.name, url = %section.url, "[SYNC] Processing section");

        let links = match cache.links(self.pages, &section.url).await {
            Ok(links) => links,
            Err(e) => {
                state.fail(&section.url, e.into());
                return Ok(());
            }
        };
        state.stats.links_seen += links.len();
        let selected = section.filter.select(links);
        state.stats.links_kept += selected.len();
        debug!(section = %section.name, kept = selected.len(), "[SYNC] Links selected");

        if let Some(limit) = section.check_url_limit {
            if selected.len() > limit {
                error!(section = %section.name, found = selected.len(), limit, "[SYNC] Too many links");
                return Err(SyncError::TooManyLinks {
                    section: section.name.clone(),
                    found: selected.len(),
                    limit,
                });
            }
        }

        for link in &selected {
            let staged = match self.stage(section, link, state).await {
                Ok(staged) => staged,
                Err(e) => {
                    state.fail(&link.url, e);
                    continue;
                }
            };
            self.persist_stamps(state)?;

            let (plan, staged, prior) = staged;
            if staged.downloaded && !self.options.dry_run {
                state.stats.downloads += 1;
                state.stats.bytes_downloaded += staged.byte_count;
            }
            match resolver.resolve(&plan, &staged, &mut state.journal).await {
                Ok(resolution) => self.apply(resolution, state),
                Err(e) => {
                    if staged.updated {
                        self.restore_stamp(&plan, prior, state)?;
                    }
                    state.fail(&link.url, e);
                }
            }
        }
        Ok(())
    }

    /// Bring one link into the incoming store and update its stamp record.
    ///
    /// Also returns the record as it was before staging.
    async fn stage(
        &self,
        section: &SectionConfig,
        link: &LinkCandidate,
        state: &mut PassState,
    ) -> Result<(ItemPlan, StagedItem, Option<StampRecord>), ItemError> {
        let filename = render_filename(&section.filename_template, link).ok_or_else(|| {
            ItemError::Filename {
                url: link.url.clone(),
                template: section.filename_template.clone(),
            }
        })?;
        let incoming_path = section.directory.join(&filename);
        let key = record_key(&incoming_path);
        let incoming_abs = self.incoming.root().join(&incoming_path);
        let is_archive = section.archives_regex.is_match(&filename);
        let public_path = if is_archive {
            section.directory.join(strip_archive_suffix(&filename))
        } else {
            incoming_path.clone()
        };
        let public_abs = self.public.root().join(&public_path);

        let prior = state.stamps.get(&key).cloned();
        let mut staged = StagedItem {
            repo_relative_path: incoming_path.clone(),
            ..StagedItem::default()
        };

        let registration = match section.mode {
            Mode::Download => None,
            Mode::Fast => Some(RegistrationMode::Fast),
            Mode::Relaxed => Some(RegistrationMode::Relaxed),
        };

        match registration {
            None => {
                let fetcher = Fetcher::new(self.transport);
                let remote = fetcher.stat(&link.url).await?;
                // A record alone must not stop us when both artifacts are gone.
                let lost = prior.is_some() && !present(&incoming_abs) && !present(&public_abs);
                if lost {
                    info!(url = %link.url, path = %key, "[SYNC] Recorded file missing from both stores, fetching again");
                }
                let decision = ChangeDetector::decide(
                    &link.url,
                    &incoming_abs,
                    prior.as_ref(),
                    &remote,
                    self.options.force_download || lost,
                );

                if !decision.download {
                    if let Evidence::LocalFile(local) = decision.evidence {
                        info!(path = %key, "[STAMPS] Adopting untracked local file");
                        self.record(state, StampRecord {
                            path: key.clone(),
                            url: link.url.clone(),
                            size: remote.size.or(Some(local.size)),
                            mtime: remote.mtime.or(local.mtime),
                        });
                        staged.updated = true;
                    }
                } else if self.options.dry_run {
                    state.journal.record(PlannedAction::Download {
                        url: link.url.clone(),
                        path: incoming_path.clone(),
                    });
                    self.record(state, StampRecord {
                        path: key.clone(),
                        url: link.url.clone(),
                        size: remote.size,
                        mtime: remote.mtime,
                    });
                    staged.downloaded = true;
                    staged.updated = true;
                    staged.byte_count = remote.size.unwrap_or(0);
                } else {
                    match fetcher.fetch(&link.url, &incoming_abs, &remote).await {
                        Ok(result) => {
                            self.record(state, StampRecord {
                                path: key.clone(),
                                url: link.url.clone(),
                                size: result.stamp.size,
                                mtime: result.stamp.mtime,
                            });
                            staged.downloaded = true;
                            staged.updated = true;
                            staged.byte_count = result.bytes;
                        }
                        Err(FetchError::StampMismatch { url }) => {
                            warn!(url, path = %key, "[SYNC] Download discarded, keeping previous state");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            Some(mode) => {
                let decision = ChangeDetector::decide_offline(&incoming_abs, prior.as_ref());
                match decision.evidence {
                    Evidence::LocalFile(local) => {
                        info!(path = %key, "[STAMPS] Adopting untracked local file");
                        self.record(state, StampRecord {
                            path: key.clone(),
                            url: link.url.clone(),
                            size: Some(local.size),
                            mtime: local.mtime,
                        });
                        staged.updated = true;
                    }
                    _ if decision.download => {
                        debug!(url = %link.url, path = %key, ?mode, "[SYNC] Registering without download");
                        self.record(state, StampRecord {
                            path: key.clone(),
                            url: link.url.clone(),
                            size: None,
                            mtime: None,
                        });
                        staged.updated = true;
                    }
                    _ => {}
                }
            }
        }

        let has_local_bytes = incoming_abs.is_file() || (self.options.dry_run && staged.downloaded);
        let plan = ItemPlan {
            url: link.url.clone(),
            incoming_path,
            public_path,
            is_archive,
            destiny: if is_archive {
                section.archives_destiny
            } else {
                section.incoming_destiny
            },
            directories: section.archives_directories,
            registration: if has_local_bytes { None } else { registration },
        };
        Ok((plan, staged, prior))
    }

    /// Put back the record from before staging so the next pass publishes the item again.
    fn restore_stamp(
        &self,
        plan: &ItemPlan,
        prior: Option<StampRecord>,
        state: &mut PassState,
    ) -> Result<(), SyncError> {
        let key = record_key(&plan.incoming_path);
        warn!(path = %key, "[STAMPS] Publishing failed, restoring previous stamp");
        match prior {
            Some(record) => state.stamps.set(record),
            None => {
                state.stamps.remove(&key);
            }
        }
        self.persist_stamps(state)
    }

    fn record(&self, state: &mut PassState, record: StampRecord) {
        if self.options.dry_run {
            state.journal.record(PlannedAction::RecordStamp {
                path: record.path.clone(),
            });
        }
        state.stamps.set(record);
    }

    fn apply(&self, resolution: Resolution, state: &mut PassState) {
        // A dry run mutates nothing, so it counts nothing.
        if !self.options.dry_run {
            if resolution.outcome.incoming_changed {
                state.stats.incoming_changes += 1;
            }
            if resolution.outcome.public_changed {
                state.stats.public_changes += 1;
            }
        }
        state.incoming_touched.extend(resolution.incoming_touched);
        state.public_touched.extend(resolution.public_touched);
    }

    /// Save the stamp store if it changed. A failed save stops the pass.
    fn persist_stamps(&self, state: &mut PassState) -> Result<(), SyncError> {
        if !state.stamps.is_dirty() || self.options.dry_run {
            return Ok(());
        }
        state.stamps.save(&state.stamps_path).map_err(|e| {
            error!(error = %e, path = %state.stamps_path.display(), "[STAMPS] Failed to save stamp store");
            SyncError::from(e)
        })?;
        state
            .incoming_touched
            .insert(Path::new(STATE_DIR).join(STAMPS_FILE));
        debug!(records = state.stamps.len(), "[STAMPS] Saved stamp store");
        Ok(())
    }

    async fn commit(&self, same_store: bool, state: &mut PassState) -> Result<(), SyncError> {
        let message = format!("web-mirror: {}", state.stats);
        let mut incoming_paths = std::mem::take(&mut state.incoming_touched);
        let public_paths = std::mem::take(&mut state.public_touched);

        let mut commits: Vec<(StoreRole, &dyn RepositoryBackend, BTreeSet<PathBuf>)> = Vec::new();
        if same_store {
            incoming_paths.extend(public_paths);
            commits.push((StoreRole::Incoming, self.incoming, incoming_paths));
        } else {
            commits.push((StoreRole::Incoming, self.incoming, incoming_paths));
            commits.push((StoreRole::Public, self.public, public_paths));
        }

        for (role, backend, paths) in commits {
            if paths.is_empty() {
                debug!(role = role.as_str(), "[SYNC] Nothing touched, no commit");
                continue;
            }
            let paths: Vec<PathBuf> = paths.into_iter().collect();
            if self.options.dry_run {
                state.journal.record(PlannedAction::Commit {
                    store: role,
                    paths,
                    message: message.clone(),
                });
                continue;
            }
            backend.commit(&paths, &message).await.map_err(|source| {
                error!(role = role.as_str(), error = %source, "[SYNC] Commit failed");
                SyncError::Commit {
                    role: role.as_str(),
                    source,
                }
            })?;
            info!(role = role.as_str(), paths = paths.len(), "[SYNC] Committed store");
        }
        Ok(())
    }
}

/// Store key for a relative path: components joined with `/`.
pub fn record_key(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn acquire_lock(state_dir: &Path) -> Result<File, SyncError> {
    fs::create_dir_all(state_dir).map_err(|source| SyncError::Directory {
        path: state_dir.to_path_buf(),
        source,
    })?;
    let path = state_dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|source| SyncError::Directory {
            path: path.clone(),
            source,
        })?;
    file.try_lock_exclusive().map_err(|e| {
        error!(path = %path.display(), error = ?e, "[SYNC] Lock is held by another pass");
        SyncError::Locked(path.clone())
    })?;
    debug!(path = %path.display(), "[SYNC] Acquired pass lock");
    Ok(file)
}
