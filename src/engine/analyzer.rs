//! Whole-package runs: version resolution plus the version pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::change::ChangePolicy;
use crate::engine::deobfuscate::Deobfuscator;
use crate::engine::pipeline::{PipelineOutcome, VersionPipeline};
use crate::engine::signals::PatternSignalSource;
use crate::engine::threshold::{default_rules, load_rules_from_file};
use crate::engine::versions::{merge_entries, tag_entries};
use crate::error::SightError;
use crate::models::rule::ThresholdRule;
use crate::models::version::VersionEntry;
use crate::report::PackageReport;
use crate::sources::account::RegistryAccountSource;
use crate::sources::archive::{discover_local_archives, tarball_entries};
use crate::sources::checkout::Workspace;
use crate::sources::history::GitRepository;
use crate::sources::registry::{PackageRegistry, RegistryCache, RegistryClient};

/// Per-run switches from the command line.
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub output_dir: PathBuf,
    pub include_local: bool,
    pub local_dir: PathBuf,
    pub include_tarballs: bool,
}

/// Totals printed at the end of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub packages: usize,
    pub succeeded: usize,
}

pub struct PackageAnalyzer {
    options: AnalyzeOptions,
    repos_dir: PathBuf,
    registry: Arc<RegistryCache>,
    signals: PatternSignalSource,
    workspace: Workspace,
    accounts: RegistryAccountSource,
    deobfuscator: Option<Deobfuscator>,
    rules: Vec<ThresholdRule>,
    policy: ChangePolicy,
}

/// Effective rule table: the configured file, or the built-in rules.
pub fn effective_rules(config: &Config) -> Result<Vec<ThresholdRule>> {
    match &config.rules_file {
        Some(path) => load_rules_from_file(path),
        None => Ok(default_rules()),
    }
}

impl PackageAnalyzer {
    pub fn from_config(config: &Config, options: AnalyzeOptions) -> Result<Self> {
        let registry: Arc<dyn PackageRegistry> =
            Arc::new(RegistryClient::new(&config.registry_url, config.http_timeout())?);
        let deobfuscator = Deobfuscator::new(
            config.deobfuscator.as_str(),
            config.deobfuscator_timeout(),
            &config.work_dir.join("deobfuscated"),
        )?;
        let deobfuscator = if deobfuscator.is_available() {
            Some(deobfuscator)
        } else {
            info!(command = %config.deobfuscator, "deobfuscator not found, derived pass disabled");
            None
        };
        Self::new(
            options,
            config,
            registry,
            effective_rules(config)?,
            deobfuscator,
        )
    }

    pub fn new(
        options: AnalyzeOptions,
        config: &Config,
        registry: Arc<dyn PackageRegistry>,
        rules: Vec<ThresholdRule>,
        deobfuscator: Option<Deobfuscator>,
    ) -> Result<Self> {
        let cache = Arc::new(RegistryCache::new(registry.clone()));
        Ok(Self {
            repos_dir: config.repos_dir.clone(),
            workspace: Workspace::new(&config.work_dir, registry),
            accounts: RegistryAccountSource::new(cache.clone()),
            registry: cache,
            signals: PatternSignalSource::new()?,
            deobfuscator,
            rules,
            policy: ChangePolicy {
                reactivation_gap: config.reactivation_gap(),
            },
            options,
        })
    }

    /// Ordered versions of `package` from every enabled origin.
    pub fn resolve_versions(&self, package: &str) -> Result<Vec<VersionEntry>> {
        let document = self.registry.document(package);

        let mut vcs = Vec::new();
        match document.as_ref().and_then(|d| d.repository_url()) {
            Some(url) => {
                match GitRepository::clone_or_open(&url, &self.repos_dir, package)
                    .and_then(|repo| tag_entries(&repo))
                {
                    Ok(entries) => vcs = entries,
                    Err(e) => warn!(package, url, error = %e, "source history unavailable"),
                }
            }
            None => info!(package, "no source repository declared"),
        }

        let local = if self.options.include_local {
            discover_local_archives(&self.options.local_dir, package).unwrap_or_else(|e| {
                warn!(package, error = %e, "local archives unavailable");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        let downloaded = match (&document, self.options.include_tarballs) {
            (Some(document), true) => tarball_entries(document),
            _ => Vec::new(),
        };

        info!(
            package,
            tags = vcs.len(),
            local = local.len(),
            tarballs = downloaded.len(),
            "versions discovered"
        );
        let entries = merge_entries(vcs, local, downloaded);
        if entries.is_empty() {
            bail!(SightError::no_versions(package));
        }
        Ok(entries)
    }

    pub fn analyze(&self, package: &str) -> Result<PipelineOutcome> {
        let entries = self.resolve_versions(package)?;
        let mut report = PackageReport::create(&self.options.output_dir, package)?;

        let pipeline = VersionPipeline {
            signals: &self.signals,
            checkout: &self.workspace,
            accounts: &self.accounts,
            deobfuscator: self.deobfuscator.as_ref(),
            rules: &self.rules,
            policy: self.policy,
        };
        let outcome = pipeline.run(package, &entries, &mut report);

        info!(
            package,
            analyzed = outcome.versions_analyzed,
            skipped = outcome.versions_skipped,
            flags = outcome.flags_triggered,
            output = %report.dir().display(),
            "package done"
        );
        Ok(outcome)
    }

    /// Analyze packages one after another. A failed package never stops the
    /// batch.
    pub fn analyze_all(&self, packages: &[String]) -> BatchSummary {
        let mut summary = BatchSummary {
            packages: packages.len(),
            succeeded: 0,
        };
        for (i, package) in packages.iter().enumerate() {
            info!(package, "Package {}/{}", i + 1, packages.len());
            match self.analyze(package) {
                Ok(_) => summary.succeeded += 1,
                Err(e) => warn!(package, error = %e, "package analysis failed"),
            }
        }
        summary
    }
}
