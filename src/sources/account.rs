//! Publisher and release data per version.

use std::sync::Arc;

use tracing::debug;

use crate::models::account::AccountData;
use crate::models::version::{VersionEntry, VersionLocator, VersionOrigin};
use crate::sources::history::GitRepository;
use crate::sources::registry::{PackageDocument, RegistryCache};

/// Source of [`AccountData`] for one version.
///
/// Implementations never fail: unavailable data is [`AccountData::empty`].
pub trait AccountDataSource: Sync {
    fn fetch_account_data(&self, package: &str, entry: &VersionEntry) -> AccountData;
}

/// Registry document combined with the tag's commit in source history.
pub struct RegistryAccountSource {
    cache: Arc<RegistryCache>,
}

impl RegistryAccountSource {
    pub fn new(cache: Arc<RegistryCache>) -> Self {
        Self { cache }
    }
}

/// Version key as published in the registry document.
fn registry_version(document: &PackageDocument, name: &str) -> Option<String> {
    let published = document.versions();
    let bare = name.strip_prefix(['v', 'V']).unwrap_or(name);
    let bare = bare.rsplit_once('@').map_or(bare, |(_, v)| v);
    [name, bare]
        .into_iter()
        .find(|candidate| published.iter().any(|p| p == candidate))
        .map(str::to_string)
}

impl AccountDataSource for RegistryAccountSource {
    fn fetch_account_data(&self, package: &str, entry: &VersionEntry) -> AccountData {
        if entry.origin == VersionOrigin::LocalArchive {
            return AccountData::empty();
        }

        let mut data = AccountData::empty();

        if let Some(document) = self.cache.document(package)
            && let Some(version) = registry_version(&document, &entry.name)
        {
            data.maintainers = document.maintainers(&version);
            data.maintainer_count = data.maintainers.len() as u64;
            data.registry_commit = document.git_head(&version);
            if let Some(released) = document.release_time(&version) {
                data.release_timestamp = released;
            }
        }

        if let VersionLocator::Tag { repo, tag } = &entry.locator {
            let repo = GitRepository::open(repo);
            match repo.commit_of(tag) {
                Ok(commit) => data.history_commit = commit,
                Err(e) => debug!(package, version = %entry.name, error = %e, "tag commit unavailable"),
            }
            if !data.has_release_timestamp()
                && let Ok(date) = repo.commit_date(tag)
            {
                data.release_timestamp = date;
            }
        }

        data
    }
}
