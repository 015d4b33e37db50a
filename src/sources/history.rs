//! Source history through the `git` command line.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, bail};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info};

use crate::error::{ErrorCode, SightError};

/// A local clone of a package's source repository.
#[derive(Debug, Clone)]
pub struct GitRepository {
    dir: PathBuf,
}

impl GitRepository {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Clone `url` under `repos_dir`, or reuse an existing clone.
    pub fn clone_or_open(url: &str, repos_dir: &Path, package: &str) -> Result<Self> {
        let dir = repos_dir.join(safe_dir_name(package));
        if dir.join(".git").exists() {
            debug!(package, dir = %dir.display(), "reusing existing clone");
            let repo = Self::open(dir);
            // stale tags are acceptable when offline
            if let Err(e) = repo.git(&["fetch", "--tags", "--force", "--quiet"]) {
                debug!(package, error = %e, "tag refresh failed");
            }
            return Ok(repo);
        }

        fs::create_dir_all(repos_dir)?;
        info!(package, url, "cloning repository");
        let output = Command::new("git")
            .args(["clone", "--quiet", url])
            .arg(&dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|e| {
                SightError::new(
                    ErrorCode::HistoryUnavailable,
                    format!("Failed to run git: {e}"),
                )
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(SightError::new(
                ErrorCode::HistoryUnavailable,
                format!("git clone {url} failed: {}", stderr.trim()),
            ));
        }
        Ok(Self::open(dir))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|e| {
                SightError::new(
                    ErrorCode::HistoryUnavailable,
                    format!("Failed to run git: {e}"),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(SightError::new(
                ErrorCode::HistoryUnavailable,
                format!("git {} failed: {}", args.join(" "), stderr.trim()),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub fn tags(&self) -> Result<Vec<String>> {
        let stdout = self.git(&["tag", "--list"])?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Force the working tree to `tag`, dropping untracked files.
    pub fn checkout(&self, tag: &str) -> Result<()> {
        self.git(&["checkout", "--force", "--quiet", tag])
            .map_err(|e| SightError::checkout_failed(tag, e))?;
        self.git(&["clean", "-fdq"])
            .map_err(|e| SightError::checkout_failed(tag, e))?;
        Ok(())
    }

    /// Commit hash the tag points at.
    pub fn commit_of(&self, tag: &str) -> Result<String> {
        let rev = format!("{tag}^{{commit}}");
        Ok(self.git(&["rev-parse", &rev])?.trim().to_string())
    }

    pub fn commit_date(&self, tag: &str) -> Result<OffsetDateTime> {
        let stdout = self.git(&["log", "-1", "--format=%cI", tag])?;
        let date = OffsetDateTime::parse(stdout.trim(), &Rfc3339).map_err(|e| {
            SightError::new(
                ErrorCode::HistoryUnavailable,
                format!("Unparseable commit date for {tag}: {e}"),
            )
        })?;
        Ok(date)
    }
}

/// Directory-safe form of a package id (`@scope/name` -> `scope_name`).
pub fn safe_dir_name(package: &str) -> String {
    package.trim_start_matches('@').replace(['/', '\\', '@'], "_")
}
