use regex::Regex;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::links::LinkFilter;

/// Default pattern deciding which downloaded files are archives.
pub const DEFAULT_ARCHIVES_REGEX: &str = r"\.(tar\.gz|tgz|tar\.bz2|tbz2|tar)$";
pub const DEFAULT_FILENAME_TEMPLATE: &str = "{filename}";

/// A fully validated configuration for one pass.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub incoming: StoreConfig,
    pub public: StoreConfig,
    pub sections: Vec<SectionConfig>,
}

impl SyncConfig {
    /// Incoming and public are the same physical store.
    pub fn same_store(&self) -> bool {
        same_location(&self.incoming.path, &self.public.path)
    }

    pub fn trace_loaded(&self) {
        info!(
            incoming = %self.incoming.path.display(),
            public = %self.public.path.display(),
            sections = self.sections.len(),
            same_store = self.same_store(),
            "[CONFIG] Loaded configuration"
        );
        debug!(?self, "[CONFIG] Configuration loaded (full debug)");
    }
}

fn default_archives_regex() -> &'static Regex {
    static ARCHIVES: OnceLock<Regex> = OnceLock::new();
    // Constant pattern; `test_section_defaults_recognise_archives` compiles it.
    ARCHIVES.get_or_init(|| Regex::new(DEFAULT_ARCHIVES_REGEX).expect("default archives pattern is valid"))
}

pub(crate) fn same_location(a: &Path, b: &Path) -> bool {
    a == b || resolve_location(a) == resolve_location(b)
}

/// Absolute, lexically normalised form of `path`. The longest existing ancestor is
/// canonicalised and the missing tail appended.
fn resolve_location(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut normalised = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalised.pop();
            }
            other => normalised.push(other),
        }
    }

    let mut missing = Vec::new();
    let mut existing = normalised.as_path();
    loop {
        if let Ok(real) = existing.canonicalize() {
            return missing.iter().rev().fold(real, |acc, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return normalised,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub backend: BackendKind,
}

/// Which repository backend manages a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// git with git-annex managing file content.
    Annex,
    /// Plain git, file content committed directly.
    Git,
    /// A plain directory without history.
    Directory,
}

/// How a section obtains the files it lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Transfer file content.
    Download,
    /// Record new files without content; the backend may query metadata.
    Fast,
    /// Record new files without content or metadata.
    Relaxed,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Download
    }
}

/// What happens to a staged incoming file once the public store reflects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destiny {
    Keep,
    Annex,
    Drop,
    Rm,
    Auto,
}

impl FromStr for Destiny {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(Destiny::Keep),
            "annex" => Ok(Destiny::Annex),
            "drop" => Ok(Destiny::Drop),
            "rm" => Ok(Destiny::Rm),
            "auto" => Ok(Destiny::Auto),
            _ => Err(s.to_string()),
        }
    }
}

impl fmt::Display for Destiny {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Destiny::Keep => "keep",
            Destiny::Annex => "annex",
            Destiny::Drop => "drop",
            Destiny::Rm => "rm",
            Destiny::Auto => "auto",
        };
        f.write_str(name)
    }
}

/// Whether a single top-level directory inside an archive is stripped on extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveDirectories {
    #[default]
    Strip,
    Maintain,
}

/// One configured page and the policy for the files it links to.
#[derive(Debug, Clone)]
pub struct SectionConfig {
    pub name: String,
    pub url: String,
    pub mode: Mode,
    /// Directory, relative to both store roots, the section's files land in.
    pub directory: PathBuf,
    pub filter: LinkFilter,
    pub incoming_destiny: Destiny,
    pub archives_destiny: Destiny,
    pub archives_regex: Regex,
    pub archives_directories: ArchiveDirectories,
    pub check_url_limit: Option<usize>,
    pub filename_template: String,
}

impl SectionConfig {
    /// A section with every option at its default.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            directory: PathBuf::from(&name),
            name,
            url: url.into(),
            mode: Mode::Download,
            filter: LinkFilter::default(),
            incoming_destiny: Destiny::Auto,
            archives_destiny: Destiny::Auto,
            archives_regex: default_archives_regex().clone(),
            archives_directories: ArchiveDirectories::Strip,
            check_url_limit: None,
            filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            section = %self.name,
            url = %self.url,
            mode = ?self.mode,
            incoming_destiny = %self.incoming_destiny,
            archives_destiny = %self.archives_destiny,
            "[CONFIG] Loaded section"
        );
    }
}
