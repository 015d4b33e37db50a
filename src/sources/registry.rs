//! Package registry access.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use crate::error::{ErrorCode, SightError};

/// Read access to a package registry.
pub trait PackageRegistry: Send + Sync {
    /// Fetch the full package document.
    fn fetch_document(&self, package: &str) -> Result<Value>;

    /// Download a release archive to `dest`.
    fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// npm-compatible registry over HTTP.
pub struct RegistryClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl RegistryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("release-sight/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn document_url(&self, package: &str) -> String {
        // scoped names keep the '@' but escape the separator
        format!("{}/{}", self.base_url, package.replace('/', "%2f"))
    }
}

impl PackageRegistry for RegistryClient {
    fn fetch_document(&self, package: &str) -> Result<Value> {
        let url = self.document_url(package);
        let response = self.client.get(&url).send().map_err(|e| {
            SightError::new(
                ErrorCode::RegistryUnavailable,
                format!("Request to {url} failed: {e}"),
            )
        })?;
        if !response.status().is_success() {
            bail!(SightError::new(
                ErrorCode::RegistryUnavailable,
                format!("Registry returned {} for {package}", response.status()),
            ));
        }
        let document: Value = response
            .json()
            .with_context(|| format!("Invalid registry document for {package}"))?;
        Ok(document)
    }

    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self.client.get(url).send().map_err(|e| {
            SightError::new(
                ErrorCode::RegistryUnavailable,
                format!("Download of {url} failed: {e}"),
            )
        })?;
        if !response.status().is_success() {
            bail!(SightError::new(
                ErrorCode::RegistryUnavailable,
                format!("Download of {url} returned {}", response.status()),
            ));
        }
        let bytes = response.bytes()?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(dest)
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        file.write_all(&bytes)?;
        Ok(())
    }
}

/// Registry document of one package.
#[derive(Debug, Clone)]
pub struct PackageDocument {
    raw: Value,
}

impl PackageDocument {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    fn version(&self, version: &str) -> Option<&Value> {
        self.raw.get("versions")?.get(version)
    }

    /// Normalized source repository URL.
    pub fn repository_url(&self) -> Option<String> {
        let repo = self.raw.get("repository")?;
        let url = match repo {
            Value::String(s) => s.as_str(),
            Value::Object(o) => o.get("url")?.as_str()?,
            _ => return None,
        };
        normalize_repository_url(url)
    }

    /// Every published version, in document order.
    pub fn versions(&self) -> Vec<String> {
        self.raw
            .get("versions")
            .and_then(|v| v.as_object())
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn maintainers(&self, version: &str) -> Vec<String> {
        let list = self
            .version(version)
            .and_then(|v| v.get("maintainers"))
            .or_else(|| self.raw.get("maintainers"))
            .and_then(|m| m.as_array());
        let mut names: Vec<String> = list
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| match m {
                        Value::String(s) => Some(s.clone()),
                        Value::Object(o) => o.get("name")?.as_str().map(str::to_string),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names.dedup();
        names
    }

    /// Commit hash recorded at publish time, empty when absent.
    pub fn git_head(&self, version: &str) -> String {
        self.version(version)
            .and_then(|v| v.get("gitHead"))
            .and_then(|h| h.as_str())
            .unwrap_or_default()
            .to_string()
    }

    pub fn release_time(&self, version: &str) -> Option<OffsetDateTime> {
        let raw = self.raw.get("time")?.get(version)?.as_str()?;
        OffsetDateTime::parse(raw, &Rfc3339).ok()
    }

    pub fn tarball_url(&self, version: &str) -> Option<String> {
        self.version(version)?
            .get("dist")?
            .get("tarball")?
            .as_str()
            .map(str::to_string)
    }
}

/// Strip VCS prefixes and suffixes from a repository URL.
pub fn normalize_repository_url(url: &str) -> Option<String> {
    let mut url = url.trim();
    if url.is_empty() {
        return None;
    }
    url = url.strip_prefix("git+").unwrap_or(url);
    if let Some((base, _)) = url.split_once('#') {
        url = base;
    }
    let url = url.strip_suffix(".git").unwrap_or(url);

    let normalized = if let Some(rest) = url.strip_prefix("git://") {
        format!("https://{rest}")
    } else if let Some(rest) = url.strip_prefix("git@github.com:") {
        format!("https://github.com/{rest}")
    } else if let Some(rest) = url.strip_prefix("github:") {
        format!("https://github.com/{rest}")
    } else if !url.contains("://") && url.split('/').count() == 2 {
        // shorthand `user/repo`
        format!("https://github.com/{url}")
    } else {
        url.to_string()
    };
    Some(normalized)
}

/// Memoized registry documents for the lifetime of one run.
///
/// Unbounded: a run covers a finite package list and each document is needed
/// by every version of its package. Failures are cached too, so a package is
/// requested at most once.
pub struct RegistryCache {
    registry: Arc<dyn PackageRegistry>,
    documents: Mutex<HashMap<String, Option<Arc<PackageDocument>>>>,
}

impl RegistryCache {
    pub fn new(registry: Arc<dyn PackageRegistry>) -> Self {
        Self {
            registry,
            documents: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &dyn PackageRegistry {
        self.registry.as_ref()
    }

    /// Cached document for `package`, fetching it on first use.
    pub fn document(&self, package: &str) -> Option<Arc<PackageDocument>> {
        if let Ok(documents) = self.documents.lock()
            && let Some(cached) = documents.get(package)
        {
            return cached.clone();
        }

        let fetched = match self.registry.fetch_document(package) {
            Ok(raw) => {
                debug!(package, "registry document fetched");
                Some(Arc::new(PackageDocument::new(raw)))
            }
            Err(e) => {
                warn!(package, error = %e, "registry data unavailable");
                None
            }
        };

        if let Ok(mut documents) = self.documents.lock() {
            documents.insert(package.to_string(), fetched.clone());
        }
        fetched
    }

    pub fn len(&self) -> usize {
        self.documents.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
