use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::contract::{RegistrationMode, RepositoryBackend};
use crate::error::BackendError;

/// A git repository, optionally with git-annex managing file content.
///
/// Every operation shells out to the `git` binary found on `PATH`.
#[derive(Debug, Clone)]
pub struct GitBackend {
    root: PathBuf,
    annex: bool,
}

impl GitBackend {
    pub fn annex(root: PathBuf) -> Self {
        Self { root, annex: true }
    }

    pub fn plain(root: PathBuf) -> Self {
        Self { root, annex: false }
    }

    /// Launch git in the store and wait for it, whatever the exit status.
    async fn git<I, S>(&self, args: I) -> Result<(Vec<OsString>, Output), BackendError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                let command = describe(&args);
                error!(error = ?e, root = %self.root.display(), command, "[BACKEND] Failed to launch git");
                BackendError::Command {
                    root: self.root.clone(),
                    command,
                    stderr: e.to_string(),
                }
            })?;
        Ok((args, output))
    }

    /// Run a git command and fail on a non-zero exit.
    async fn run<I, S>(&self, args: I) -> Result<Output, BackendError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let (args, output) = self.git(args).await?;
        if output.status.success() {
            return Ok(output);
        }
        let command = describe(&args);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!(root = %self.root.display(), command, stderr, "[BACKEND] git exited with non-zero code: {}", output.status);
        Err(BackendError::Command {
            root: self.root.clone(),
            command,
            stderr,
        })
    }
}

fn describe(args: &[OsString]) -> String {
    args.iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl RepositoryBackend for GitBackend {
    fn root(&self) -> PathBuf {
        self.root.clone()
    }

    async fn init(&self, description: &str) -> Result<(), BackendError> {
        std::fs::create_dir_all(&self.root).map_err(|source| BackendError::Io {
            path: self.root.clone(),
            source,
        })?;
        if !self.root.join(".git").exists() {
            self.run(["init", "-q"]).await?;
            info!(root = %self.root.display(), "[BACKEND] Initialised git repository");
        }
        if self.annex && !self.root.join(".git").join("annex").exists() {
            self.run(["annex", "init", "-q", description]).await?;
            info!(root = %self.root.display(), description, "[BACKEND] Initialised git-annex");
        }
        Ok(())
    }

    async fn add_file(&self, path: &Path, source_url: Option<String>) -> Result<(), BackendError> {
        if !self.annex {
            self.run([OsStr::new("add"), OsStr::new("--"), path.as_os_str()]).await?;
            debug!(path = %path.display(), "[BACKEND] git add");
            return Ok(());
        }

        self.run([
            OsStr::new("annex"),
            OsStr::new("add"),
            OsStr::new("-q"),
            OsStr::new("--"),
            path.as_os_str(),
        ])
        .await?;
        if let Some(url) = source_url {
            let output = self.run([
                OsStr::new("annex"),
                OsStr::new("lookupkey"),
                OsStr::new("--"),
                path.as_os_str(),
            ])
            .await?;
            let key = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !key.is_empty() {
                self.run(["annex", "registerurl", key.as_str(), url.as_str()]).await?;
            }
        }
        debug!(path = %path.display(), "[BACKEND] git annex add");
        Ok(())
    }

    async fn register_url(
        &self,
        path: &Path,
        url: &str,
        mode: RegistrationMode,
    ) -> Result<(), BackendError> {
        if !self.annex {
            return Err(BackendError::Unsupported {
                capability: "register_url",
            });
        }
        let flag = match mode {
            RegistrationMode::Fast => "--fast",
            RegistrationMode::Relaxed => "--relaxed",
        };
        self.run([
            OsStr::new("annex"),
            OsStr::new("addurl"),
            OsStr::new("-q"),
            OsStr::new(flag),
            OsStr::new("--file"),
            path.as_os_str(),
            OsStr::new(url),
        ])
        .await?;
        debug!(path = %path.display(), url, flag, "[BACKEND] git annex addurl");
        Ok(())
    }

    async fn drop_content(&self, path: &Path) -> Result<(), BackendError> {
        if !self.annex {
            return Err(BackendError::Unsupported {
                capability: "drop_content",
            });
        }
        self.run([
            OsStr::new("annex"),
            OsStr::new("drop"),
            OsStr::new("-q"),
            OsStr::new("--"),
            path.as_os_str(),
        ])
        .await?;
        debug!(path = %path.display(), "[BACKEND] git annex drop");
        Ok(())
    }

    async fn commit(&self, paths: &[PathBuf], message: &str) -> Result<(), BackendError> {
        let (present, missing): (Vec<&PathBuf>, Vec<&PathBuf>) =
            paths.iter().partition(|p| self.root.join(p).exists());

        if !present.is_empty() {
            let mut args = vec![OsStr::new("add"), OsStr::new("-A"), OsStr::new("--")];
            args.extend(present.iter().map(|p| p.as_os_str()));
            self.run(args).await?;
        }
        if !missing.is_empty() {
            let mut args = vec![
                OsStr::new("rm"),
                OsStr::new("-r"),
                OsStr::new("-q"),
                OsStr::new("--cached"),
                OsStr::new("--ignore-unmatch"),
                OsStr::new("--"),
            ];
            args.extend(missing.iter().map(|p| p.as_os_str()));
            self.run(args).await?;
        }

        // `diff --cached --quiet` exits 1 when something is staged.
        let (_, staged) = self.git(["diff", "--cached", "--quiet"]).await?;
        if staged.status.success() {
            debug!(root = %self.root.display(), "[BACKEND] Nothing staged, commit skipped");
            return Ok(());
        }
        self.run(["commit", "-q", "-m", message]).await?;
        info!(root = %self.root.display(), paths = paths.len(), "[BACKEND] Committed");
        Ok(())
    }
}
