//! Ordered record of the mutations a dry run would have performed.

use std::fmt;
use std::path::PathBuf;

use crate::contract::RegistrationMode;

/// The incoming or public side of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    Incoming,
    Public,
}

impl StoreRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreRole::Incoming => "incoming",
            StoreRole::Public => "public",
        }
    }
}

impl fmt::Display for StoreRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mutating step, described instead of performed. Paths are store-relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    InitStore { store: StoreRole, root: PathBuf },
    Download { url: String, path: PathBuf },
    RecordStamp { path: String },
    CopyToPublic { from: PathBuf, to: PathBuf },
    Extract { archive: PathBuf, into: PathBuf },
    AddFile { store: StoreRole, path: PathBuf, url: Option<String> },
    RegisterUrl { store: StoreRole, path: PathBuf, url: String, mode: RegistrationMode },
    DropContent { store: StoreRole, path: PathBuf },
    Remove { store: StoreRole, path: PathBuf },
    SaveStamps,
    Commit { store: StoreRole, paths: Vec<PathBuf>, message: String },
}

#[derive(Debug, Default)]
pub struct Journal {
    actions: Vec<PlannedAction>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, action: PlannedAction) {
        tracing::info!(?action, "[SYNC][DRY-RUN] Would perform");
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[PlannedAction] {
        &self.actions
    }

    pub fn into_actions(self) -> Vec<PlannedAction> {
        self.actions
    }
}
