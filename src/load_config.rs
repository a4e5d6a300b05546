//! `load_config` module: loads a YAML configuration file and validates it into a [`SyncConfig`].
//!
//! This is the only place where untrusted YAML is parsed. Loosely-typed keys (destiny
//! names, regexes, limits) are validated here once, so a pass never starts with a
//! configuration that could fail halfway through.
//!
//! # Accepted schema
//!
//! ```yaml
//! incoming:
//!   path: ./incoming
//!   backend: annex          # annex | git | directory (default: annex)
//! public:                   # optional, defaults to the incoming store
//!   path: ./public
//!   backend: annex
//! sections:
//!   - name: data
//!     url: https://example.org/data/
//!     mode: download        # download | fast | relaxed
//!     directory: data       # default: the section name
//!     include_href: '\.txt$'
//!     exclude_href: null
//!     include_href_anchor: null
//!     exclude_href_anchor: null
//!     incoming_destiny: auto  # keep | annex | drop | rm | auto
//!     archives_destiny: auto
//!     archives_regex: '\.(tar\.gz|tgz|tar\.bz2|tbz2|tar)$'
//!     archives_directories: strip   # strip | maintain
//!     check_url_limit: 100
//!     filename_template: '{filename}'
//! ```
//!
//! # Errors
//! Every failure is a [`ConfigError`]; the CLI wraps it in `anyhow` for display.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::config::{
    same_location, ArchiveDirectories, BackendKind, Destiny, Mode, SectionConfig, StoreConfig,
    SyncConfig, DEFAULT_ARCHIVES_REGEX, DEFAULT_FILENAME_TEMPLATE,
};
use crate::error::ConfigError;
use crate::links::LinkFilter;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    incoming: RawStore,
    #[serde(default)]
    public: Option<RawStore>,
    #[serde(default)]
    sections: Vec<RawSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStore {
    path: PathBuf,
    #[serde(default = "default_backend")]
    backend: BackendKind,
}

fn default_backend() -> BackendKind {
    BackendKind::Annex
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSection {
    name: String,
    url: String,
    #[serde(default)]
    mode: Mode,
    #[serde(default)]
    directory: Option<PathBuf>,
    #[serde(default)]
    include_href: Option<String>,
    #[serde(default)]
    exclude_href: Option<String>,
    #[serde(default)]
    include_href_anchor: Option<String>,
    #[serde(default)]
    exclude_href_anchor: Option<String>,
    #[serde(default)]
    incoming_destiny: Option<String>,
    #[serde(default)]
    archives_destiny: Option<String>,
    #[serde(default)]
    archives_regex: Option<String>,
    #[serde(default)]
    archives_directories: ArchiveDirectories,
    #[serde(default)]
    check_url_limit: Option<usize>,
    #[serde(default)]
    filename_template: Option<String>,
}

/// Read and validate the configuration file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig, ConfigError> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "[CONFIG] Loading configuration from file");

    let content = fs::read_to_string(path_ref).map_err(|source| {
        error!(error = ?source, config_path = ?path_ref, "[CONFIG] Failed to read config file");
        ConfigError::Read {
            path: path_ref.to_path_buf(),
            source,
        }
    })?;

    let config = parse_config(&content)?;
    config.trace_loaded();
    Ok(config)
}

/// Validate a configuration given as YAML text.
pub fn parse_config(yaml: &str) -> Result<SyncConfig, ConfigError> {
    let raw: RawConfig = serde_yaml::from_str(yaml).map_err(|e| {
        error!(error = ?e, "[CONFIG] Failed to parse config YAML");
        ConfigError::Parse(e)
    })?;

    let incoming = StoreConfig {
        path: raw.incoming.path,
        backend: raw.incoming.backend,
    };
    let public = match raw.public {
        Some(p) => StoreConfig {
            path: p.path,
            backend: p.backend,
        },
        None => incoming.clone(),
    };
    let same_store = same_location(&incoming.path, &public.path);

    let mut seen = HashSet::new();
    let mut sections = Vec::with_capacity(raw.sections.len());
    for raw_section in raw.sections {
        if !seen.insert(raw_section.name.clone()) {
            return Err(ConfigError::DuplicateSection(raw_section.name));
        }
        let section = validate_section(raw_section)?;
        if same_store && section.incoming_destiny == Destiny::Rm {
            return Err(ConfigError::DestructiveDestiny {
                section: section.name,
            });
        }
        section.trace_loaded();
        sections.push(section);
    }

    Ok(SyncConfig {
        incoming,
        public,
        sections,
    })
}

fn validate_section(raw: RawSection) -> Result<SectionConfig, ConfigError> {
    let name = raw.name;

    let destiny = |value: Option<String>| -> Result<Destiny, ConfigError> {
        match value {
            None => Ok(Destiny::Auto),
            Some(v) => v.parse::<Destiny>().map_err(|value| {
                error!(section = %name, value = %value, "[CONFIG] Unknown destiny policy");
                ConfigError::UnknownDestinyPolicy {
                    section: name.clone(),
                    value,
                }
            }),
        }
    };
    let incoming_destiny = destiny(raw.incoming_destiny)?;
    let archives_destiny = destiny(raw.archives_destiny)?;

    let regex = |key: &'static str, value: Option<String>| -> Result<Option<Regex>, ConfigError> {
        value
            .filter(|v| !v.is_empty())
            .map(|v| {
                Regex::new(&v).map_err(|source| ConfigError::InvalidRegex {
                    section: name.clone(),
                    key,
                    source,
                })
            })
            .transpose()
    };
    let filter = LinkFilter {
        include_href: regex("include_href", raw.include_href)?,
        exclude_href: regex("exclude_href", raw.exclude_href)?,
        include_href_anchor: regex("include_href_anchor", raw.include_href_anchor)?,
        exclude_href_anchor: regex("exclude_href_anchor", raw.exclude_href_anchor)?,
    };
    let archives_regex = regex(
        "archives_regex",
        Some(raw.archives_regex.unwrap_or_else(|| DEFAULT_ARCHIVES_REGEX.to_string())),
    )?
    .ok_or_else(|| ConfigError::InvalidValue {
        section: name.clone(),
        key: "archives_regex",
        value: String::new(),
    })?;

    if raw.url.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            section: name,
            key: "url",
            value: raw.url,
        });
    }

    let directory = raw.directory.unwrap_or_else(|| PathBuf::from(&name));
    if directory.is_absolute()
        || directory
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(ConfigError::InvalidValue {
            section: name,
            key: "directory",
            value: directory.display().to_string(),
        });
    }

    let filename_template = raw
        .filename_template
        .unwrap_or_else(|| DEFAULT_FILENAME_TEMPLATE.to_string());
    if filename_template.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            section: name,
            key: "filename_template",
            value: filename_template,
        });
    }

    Ok(SectionConfig {
        name,
        url: raw.url,
        mode: raw.mode,
        directory,
        filter,
        incoming_destiny,
        archives_destiny,
        archives_regex,
        archives_directories: raw.archives_directories,
        check_url_limit: raw.check_url_limit,
        filename_template,
    })
}
