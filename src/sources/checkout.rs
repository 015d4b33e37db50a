//! Materializing a version's files on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::error::SightError;
use crate::models::version::{VersionEntry, VersionLocator};
use crate::sources::archive::extract_tgz;
use crate::sources::history::{GitRepository, safe_dir_name};
use crate::sources::registry::PackageRegistry;

/// Makes the files of one version available under a root directory.
pub trait VersionCheckout: Sync {
    fn materialize(&self, package: &str, entry: &VersionEntry) -> Result<PathBuf>;
}

/// Checkout area under the configured work directory.
///
/// Tags are checked out in place in their clone. Archives are extracted to
/// `extracted/<package>-<version>` and tarballs are downloaded to `tarballs/`
/// first.
pub struct Workspace {
    work_dir: PathBuf,
    registry: Arc<dyn PackageRegistry>,
}

impl Workspace {
    pub fn new(work_dir: impl Into<PathBuf>, registry: Arc<dyn PackageRegistry>) -> Self {
        Self {
            work_dir: work_dir.into(),
            registry,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn extract_dir(&self, package: &str, entry: &VersionEntry) -> Result<PathBuf> {
        let dir = self
            .work_dir
            .join("extracted")
            .join(format!("{}-{}", safe_dir_name(package), entry.name));
        // leftovers from an earlier run would leak into this version
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(dir)
    }
}

impl VersionCheckout for Workspace {
    fn materialize(&self, package: &str, entry: &VersionEntry) -> Result<PathBuf> {
        match &entry.locator {
            VersionLocator::Tag { repo, tag } => {
                GitRepository::open(repo).checkout(tag)?;
                Ok(repo.clone())
            }
            VersionLocator::Archive { path } => {
                let dest = self.extract_dir(package, entry)?;
                extract_tgz(path, &dest)
            }
            VersionLocator::Tarball { url } => {
                let archive = self
                    .work_dir
                    .join("tarballs")
                    .join(format!("{}-{}.tgz", safe_dir_name(package), entry.name));
                if !archive.is_file() {
                    debug!(package, version = %entry.name, url, "downloading tarball");
                    self.registry
                        .download(url, &archive)
                        .map_err(|e| SightError::extract_failed(url, e))?;
                }
                let dest = self.extract_dir(package, entry)?;
                extract_tgz(&archive, &dest)
            }
        }
    }
}
