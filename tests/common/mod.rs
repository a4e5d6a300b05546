//! Shared fakes for the integration tests: an in-memory web site and a
//! directory store that records every call made to it.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use web_mirror::config::SyncConfig;
use web_mirror::contract::{
    LinkCandidate, PageSource, RegistrationMode, RemoteStamp, RepositoryBackend, Transfer,
    Transport,
};
use web_mirror::error::{BackendError, FetchError};
use web_mirror::links::extract_links;
use web_mirror::load_config::parse_config;

#[derive(Debug, Clone)]
struct RemoteFile {
    body: Vec<u8>,
    mtime: Option<i64>,
    /// Overrides the advertised `Content-Length`.
    advertised_size: Option<i64>,
}

#[derive(Debug, Default)]
struct SiteState {
    pages: HashMap<String, String>,
    files: HashMap<String, RemoteFile>,
    page_fetches: usize,
    downloads: usize,
}

/// A tiny web site served from memory.
#[derive(Debug, Default)]
pub struct FakeSite {
    state: Mutex<SiteState>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self, url: &str, html: &str) {
        let mut state = self.state.lock().unwrap();
        state.pages.insert(url.to_string(), html.to_string());
    }

    pub fn file(&self, url: &str, body: &[u8], mtime: Option<i64>) {
        let mut state = self.state.lock().unwrap();
        state.files.insert(
            url.to_string(),
            RemoteFile {
                body: body.to_vec(),
                mtime,
                advertised_size: None,
            },
        );
    }

    /// Make the server advertise a `Content-Length` that differs from the body.
    pub fn advertise_size(&self, url: &str, size: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(file) = state.files.get_mut(url) {
            file.advertised_size = Some(size);
        }
    }

    pub fn page_fetches(&self) -> usize {
        self.state.lock().unwrap().page_fetches
    }

    pub fn downloads(&self) -> usize {
        self.state.lock().unwrap().downloads
    }
}

#[async_trait]
impl PageSource for FakeSite {
    async fn links(&self, url: &str) -> Result<Vec<LinkCandidate>, FetchError> {
        let html = {
            let mut state = self.state.lock().unwrap();
            state.page_fetches += 1;
            state.pages.get(url).cloned()
        };
        match html {
            Some(html) => extract_links(url, &html),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

#[async_trait]
impl Transport for FakeSite {
    async fn stat(&self, url: &str) -> Result<RemoteStamp, FetchError> {
        let state = self.state.lock().unwrap();
        let file = state.files.get(url).ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })?;
        Ok(RemoteStamp {
            size: Some(file.advertised_size.unwrap_or(file.body.len() as i64)),
            mtime: file.mtime,
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<Transfer, FetchError> {
        let file = {
            let mut state = self.state.lock().unwrap();
            state.downloads += 1;
            state.files.get(url).cloned()
        };
        let file = file.ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })?;
        std::fs::write(dest, &file.body).map_err(|source| FetchError::PartialWrite {
            path: dest.to_path_buf(),
            source,
        })?;
        Ok(Transfer {
            bytes: file.body.len() as i64,
            stamp: RemoteStamp {
                size: Some(file.advertised_size.unwrap_or(file.body.len() as i64)),
                mtime: file.mtime,
            },
        })
    }
}

/// A directory store that records the calls it receives.
#[derive(Debug)]
pub struct RecordingBackend {
    root: PathBuf,
    calls: Mutex<Vec<String>>,
}

impl RecordingBackend {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RepositoryBackend for RecordingBackend {
    fn root(&self) -> PathBuf {
        self.root.clone()
    }

    async fn init(&self, description: &str) -> Result<(), BackendError> {
        std::fs::create_dir_all(&self.root).map_err(|source| BackendError::Io {
            path: self.root.clone(),
            source,
        })?;
        self.push(format!("init {description}"));
        Ok(())
    }

    async fn add_file(&self, path: &Path, source_url: Option<String>) -> Result<(), BackendError> {
        self.push(format!("add {} {}", path.display(), source_url.unwrap_or_default()));
        Ok(())
    }

    async fn register_url(
        &self,
        path: &Path,
        url: &str,
        mode: RegistrationMode,
    ) -> Result<(), BackendError> {
        self.push(format!("register {} {url} {mode:?}", path.display()));
        Ok(())
    }

    async fn drop_content(&self, path: &Path) -> Result<(), BackendError> {
        self.push(format!("drop {}", path.display()));
        Ok(())
    }

    async fn commit(&self, paths: &[PathBuf], message: &str) -> Result<(), BackendError> {
        self.push(format!("commit {} {message}", paths.len()));
        Ok(())
    }
}

/// Gzipped tarball holding `entries` (path, content).
pub fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_600_000_000);
        header.set_cksum();
        builder.append_data(&mut header, path, *content).unwrap();
    }
    let encoder = builder.into_inner().unwrap();
    let mut bytes = encoder.finish().unwrap();
    bytes.flush().unwrap();
    bytes
}

/// Configuration with separate incoming and public directory stores.
pub fn config(incoming: &Path, public: &Path, sections_yaml: &str) -> SyncConfig {
    let yaml = format!(
        "incoming:\n  path: {}\n  backend: directory\npublic:\n  path: {}\n  backend: directory\nsections:\n{}",
        incoming.display(),
        public.display(),
        sections_yaml
    );
    parse_config(&yaml).unwrap()
}

pub const SITE: &str = "http://site.test/data/";

/// The page used by most scenarios: a text file and a small archive.
pub fn scenario_site() -> FakeSite {
    let site = FakeSite::new();
    site.page(
        SITE,
        r##"<html><body>
        <a href="test.txt">A test file</a>
        <a href="1.tar.gz">Archive one</a>
        <a href="#top">top</a>
        </body></html>"##,
    );
    site.file(&format!("{SITE}test.txt"), b"abracadabra", Some(1_700_000_000));
    site.file(
        &format!("{SITE}1.tar.gz"),
        &tar_gz(&[("1f.txt", b"1f load")]),
        Some(1_700_000_100),
    );
    site
}
