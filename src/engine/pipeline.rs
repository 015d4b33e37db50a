//! Per-package version loop: materialize, measure, compare, roll forward.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use camino::Utf8PathBuf;
use ignore::WalkBuilder;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::engine::change::{ChangePolicy, compare};
use crate::engine::deobfuscate::{Deobfuscator, derived_path};
use crate::engine::rolling::roll_forward;
use crate::engine::signals::FileSignalSource;
use crate::engine::snapshot::aggregate_version;
use crate::engine::threshold::evaluate;
use crate::models::aggregate::AggregateVersionMetrics;
use crate::models::change::Flags;
use crate::models::file_metrics::{CodeType, FileContext, FileMetrics, SourceTag};
use crate::models::rule::{ThresholdRule, TriggeredRule};
use crate::models::version::VersionEntry;
use crate::models::version_metrics::VersionMetrics;
use crate::report::ReportSink;
use crate::sources::account::AccountDataSource;
use crate::sources::checkout::VersionCheckout;

/// Path components never analyzed.
const EXCLUDED_NAMES: &[&str] = &[
    ".git",
    "node_modules",
    ".github",
    ".editorconfig",
    ".npmrc",
    ".gitattributes",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Checkout,
    AnalyzeFiles,
    Deobfuscate,
    Snapshot,
    Compare,
    RollForward,
    Emit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Checkout => "checkout",
            Self::AnalyzeFiles => "analyze-files",
            Self::Deobfuscate => "deobfuscate",
            Self::Snapshot => "snapshot",
            Self::Compare => "compare",
            Self::RollForward => "roll-forward",
            Self::Emit => "emit",
        };
        f.write_str(s)
    }
}

/// Counters for one package run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub versions_analyzed: usize,
    pub versions_skipped: usize,
    pub flags_triggered: usize,
}

fn is_excluded(name: &str) -> bool {
    EXCLUDED_NAMES.contains(&name) || name.eq_ignore_ascii_case("license")
}

/// Every analyzable file under `root`, sorted.
pub fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        .filter_entry(|entry| !entry.file_name().to_str().is_some_and(is_excluded));

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = entry?;
        if entry.file_type().is_some_and(|ft| ft.is_file()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Drives the strictly ordered version sequence of one package.
///
/// Files of a version are analyzed in parallel. Everything that touches the
/// rolling state runs on the calling thread, one version at a time.
pub struct VersionPipeline<'a> {
    pub signals: &'a dyn FileSignalSource,
    pub checkout: &'a dyn VersionCheckout,
    pub accounts: &'a dyn AccountDataSource,
    pub deobfuscator: Option<&'a Deobfuscator>,
    pub rules: &'a [ThresholdRule],
    pub policy: ChangePolicy,
}

impl VersionPipeline<'_> {
    pub fn run(
        &self,
        package: &str,
        entries: &[VersionEntry],
        sink: &mut dyn ReportSink,
    ) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::default();
        let mut history = AggregateVersionMetrics::new(package);
        let mut previous: Option<VersionMetrics> = None;
        let total = entries.len();

        for (i, entry) in entries.iter().enumerate() {
            info!(package, "[{}/{}] Analyzing {}", i + 1, total, entry.name);

            // nothing below mutates state until measurement succeeded
            let (files, snapshot) = match self.measure(package, entry) {
                Ok(measured) => measured,
                Err(e) => {
                    warn!(package, version = %entry.name, error = %e, "skipping version");
                    outcome.versions_skipped += 1;
                    continue;
                }
            };

            debug!(package, version = %entry.name, stage = %Stage::Compare);
            let flags = compare(previous.as_ref(), &history, &snapshot, &self.policy);
            let triggered = evaluate(self.rules, &flags);

            debug!(package, version = %entry.name, stage = %Stage::RollForward);
            roll_forward(&mut history, &snapshot);

            debug!(package, version = %entry.name, stage = %Stage::Emit);
            emit(sink, &files, &snapshot, &history, &flags, &triggered);

            if !triggered.is_empty() {
                info!(package, version = %entry.name, count = triggered.len(), "flags triggered");
            }
            outcome.versions_analyzed += 1;
            outcome.flags_triggered += triggered.len();
            previous = Some(snapshot);
        }

        if let Err(e) = sink.finish() {
            warn!(package, error = %e, "failed to finish report");
        }
        outcome
    }

    fn measure(
        &self,
        package: &str,
        entry: &VersionEntry,
    ) -> Result<(Vec<FileMetrics>, VersionMetrics)> {
        let version = entry.name.as_str();

        debug!(package, version, stage = %Stage::Checkout);
        let root = self.checkout.materialize(package, entry)?;
        let paths = collect_files(&root)?;

        debug!(package, version, stage = %Stage::AnalyzeFiles, files = paths.len());
        let source = entry.origin.source_tag();
        let mut files: Vec<FileMetrics> = paths
            .par_iter()
            .filter_map(|path| self.analyze_path(package, version, &root, path, source))
            .collect();

        if let Some(deobfuscator) = self.deobfuscator {
            debug!(package, version, stage = %Stage::Deobfuscate);
            let derived = self.deobfuscate_pass(deobfuscator, package, version, &root, &files);
            files.extend(derived);
        }

        debug!(package, version, stage = %Stage::Snapshot);
        let account = self.accounts.fetch_account_data(package, entry);
        let snapshot = aggregate_version(package, version, &files, account);
        Ok((files, snapshot))
    }

    fn analyze_path(
        &self,
        package: &str,
        version: &str,
        root: &Path,
        path: &Path,
        source: SourceTag,
    ) -> Option<FileMetrics> {
        let relative = relative_path(root, path);
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(package, version, file = %relative, error = %e, "unreadable file skipped");
                return None;
            }
        };
        let content = String::from_utf8_lossy(&bytes);
        let ctx = FileContext {
            package: package.to_string(),
            version: version.to_string(),
            path: relative,
            source,
        };
        Some(self.signals.analyze_file(&content, &ctx))
    }

    /// Derived metrics for every obfuscated file of the version.
    fn deobfuscate_pass(
        &self,
        deobfuscator: &Deobfuscator,
        package: &str,
        version: &str,
        root: &Path,
        files: &[FileMetrics],
    ) -> Vec<FileMetrics> {
        files
            .par_iter()
            .filter(|f| f.evasion.code_type == Some(CodeType::Obfuscated))
            .filter_map(|f| {
                let content = fs::read(root.join(&f.path)).ok()?;
                let content = String::from_utf8_lossy(&content);
                match deobfuscator.deobfuscate(&content, f.path.as_str()) {
                    Ok(clear) => {
                        let ctx = FileContext {
                            package: package.to_string(),
                            version: version.to_string(),
                            path: Utf8PathBuf::from(derived_path(f.path.as_str())),
                            source: SourceTag::Derived,
                        };
                        Some(self.signals.analyze_file(&clear, &ctx))
                    }
                    Err(e) => {
                        warn!(package, version, file = %f.path, error = %e, "deobfuscation skipped");
                        None
                    }
                }
            })
            .collect()
    }
}

/// Forward-slash path of `path` relative to `root`.
fn relative_path(root: &Path, path: &Path) -> Utf8PathBuf {
    let relative = path.strip_prefix(root).unwrap_or(path);
    Utf8PathBuf::from(relative.to_string_lossy().replace('\\', "/"))
}

/// Report failures never abort the loop.
fn emit(
    sink: &mut dyn ReportSink,
    files: &[FileMetrics],
    snapshot: &VersionMetrics,
    history: &AggregateVersionMetrics,
    flags: &Flags,
    triggered: &[TriggeredRule],
) {
    let results = [
        ("files", sink.record_files(files)),
        ("snapshot", sink.record_snapshot(snapshot)),
        ("history", sink.record_history(history)),
        ("flags", sink.record_flags(flags, triggered)),
    ];
    for (stream, result) in results {
        if let Err(e) = result {
            warn!(package = %snapshot.package, version = %snapshot.version, stream, error = %e, "report write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::signals::PatternSignalSource;
    use crate::engine::threshold::default_rules;
    use crate::error::SightError;
    use crate::models::account::AccountData;
    use crate::models::version::{VersionLocator, VersionOrigin};
    use crate::report::tests::MemoryReport;
    use std::collections::HashMap;

    /// Versions served from pre-populated directories.
    struct DirCheckout {
        roots: HashMap<String, PathBuf>,
    }

    impl VersionCheckout for DirCheckout {
        fn materialize(&self, _package: &str, entry: &VersionEntry) -> Result<PathBuf> {
            self.roots
                .get(&entry.name)
                .cloned()
                .ok_or_else(|| SightError::checkout_failed(&entry.name, "missing").into())
        }
    }

    struct NoAccounts;

    impl AccountDataSource for NoAccounts {
        fn fetch_account_data(&self, _package: &str, _entry: &VersionEntry) -> AccountData {
            AccountData::empty()
        }
    }

    fn entry(name: &str) -> VersionEntry {
        VersionEntry::new(
            name,
            VersionOrigin::LocalArchive,
            VersionLocator::Archive {
                path: PathBuf::from(format!("/archives/{name}.tgz")),
            },
        )
    }

    fn version_dir(base: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = base.join(name);
        for (path, content) in files {
            let full = dir.join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        dir
    }

    fn run(
        checkout: &DirCheckout,
        names: &[&str],
        rules: &[ThresholdRule],
    ) -> (PipelineOutcome, MemoryReport) {
        let signals = PatternSignalSource::new().unwrap();
        let pipeline = VersionPipeline {
            signals: &signals,
            checkout,
            accounts: &NoAccounts,
            deobfuscator: None,
            rules,
            policy: ChangePolicy::default(),
        };
        let entries: Vec<_> = names.iter().map(|n| entry(n)).collect();
        let mut report = MemoryReport::default();
        let outcome = pipeline.run("pkg", &entries, &mut report);
        (outcome, report)
    }

    #[test]
    fn test_collect_files_skips_excluded() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = version_dir(
            dir.path(),
            "v",
            &[
                ("index.js", "a"),
                ("lib/b.js", "b"),
                ("node_modules/dep/index.js", "c"),
                (".git/config", "d"),
                ("LICENSE", "MIT"),
                (".npmrc", "token"),
                (".hidden.js", "e"),
            ],
        );
        let files = collect_files(&root).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| relative_path(&root, p).to_string())
            .collect();
        assert_eq!(names, vec![".hidden.js", "index.js", "lib/b.js"]);
    }

    #[test]
    fn test_eval_introduced_across_versions() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut roots = HashMap::new();
        roots.insert(
            "1.0.0".to_string(),
            version_dir(dir.path(), "1.0.0", &[("index.js", "module.exports = 1;\n")]),
        );
        let evals = "eval(x);\n".repeat(25);
        roots.insert(
            "1.0.1".to_string(),
            version_dir(dir.path(), "1.0.1", &[("index.js", evals.as_str())]),
        );
        let checkout = DirCheckout { roots };

        let rules = default_rules();
        let (outcome, report) = run(&checkout, &["1.0.0", "1.0.1"], &rules);

        assert_eq!(outcome.versions_analyzed, 2);
        assert_eq!(outcome.versions_skipped, 0);
        assert!(report.finished);

        let (first, first_triggered) = &report.flags[0];
        assert_eq!(first, &Flags::no_baseline("pkg", "1.0.0"));
        assert!(first_triggered.is_empty());

        let (second, triggered) = &report.flags[1];
        assert_eq!(second.previous_version.as_deref(), Some("1.0.0"));
        assert_eq!(second.payload.eval_function.previous.absolute, Some(25.0));
        assert!(triggered.iter().any(|t| t.name == "Eval introduced"));
        assert_eq!(outcome.flags_triggered, triggered.len());
    }

    #[test]
    fn test_failed_version_is_skipped_without_state_change() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut roots = HashMap::new();
        roots.insert(
            "1.0.0".to_string(),
            version_dir(dir.path(), "1.0.0", &[("a.js", "setTimeout(f, 1);")]),
        );
        roots.insert(
            "1.0.2".to_string(),
            version_dir(dir.path(), "1.0.2", &[("a.js", "setTimeout(f, 1);")]),
        );
        let checkout = DirCheckout { roots };

        let (outcome, report) = run(&checkout, &["1.0.0", "1.0.1", "1.0.2"], &[]);

        assert_eq!(outcome.versions_analyzed, 2);
        assert_eq!(outcome.versions_skipped, 1);
        // 1.0.2 is compared with 1.0.0, the skipped version left no trace
        assert_eq!(report.flags[1].0.previous_version.as_deref(), Some("1.0.0"));
        assert_eq!(report.histories.len(), 2);
        assert_eq!(report.histories[1].versions_seen(), 2);
        assert_eq!(
            report.histories[1].label,
            "all up to 1.0.0 (included) + 1.0.2 (included)"
        );
    }

    #[test]
    fn test_history_is_recorded_after_roll_forward() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut roots = HashMap::new();
        roots.insert(
            "1.0.0".to_string(),
            version_dir(dir.path(), "1.0.0", &[("a.js", "x"), ("b.js", "y")]),
        );
        let checkout = DirCheckout { roots };

        let (_, report) = run(&checkout, &["1.0.0"], &[]);
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.snapshots[0].generic.total_files, 2);
        assert_eq!(report.histories[0].versions_seen(), 1);
        assert_eq!(report.histories[0].generic.avg_total_files, 2.0);
        assert_eq!(report.histories[0].label, "all up to 1.0.0 (included)");
    }

    #[test]
    fn test_empty_sequence() {
        let checkout = DirCheckout {
            roots: HashMap::new(),
        };
        let (outcome, report) = run(&checkout, &[], &[]);
        assert_eq!(outcome, PipelineOutcome::default());
        assert!(report.flags.is_empty());
        assert!(report.finished);
    }

    #[cfg(unix)]
    #[test]
    fn test_obfuscated_file_gets_derived_twin() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let tool = dir.path().join("deob");
        fs::write(&tool, "#!/bin/sh\necho 'var clear = eval(1);' > \"$3\"\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        let deobfuscator = Deobfuscator::new(
            tool.to_string_lossy(),
            std::time::Duration::from_secs(10),
            &dir.path().join("cache"),
        )
        .unwrap();

        let obfuscated: String = (0..12).map(|i| format!("var _0x{i:04x} = {i};\n")).collect();
        let mut roots = HashMap::new();
        roots.insert(
            "1.0.0".to_string(),
            version_dir(dir.path(), "1.0.0", &[("lib/x.js", obfuscated.as_str())]),
        );
        let checkout = DirCheckout { roots };
        let signals = PatternSignalSource::new().unwrap();
        let pipeline = VersionPipeline {
            signals: &signals,
            checkout: &checkout,
            accounts: &NoAccounts,
            deobfuscator: Some(&deobfuscator),
            rules: &[],
            policy: ChangePolicy::default(),
        };
        let mut report = MemoryReport::default();
        pipeline.run("pkg", &[entry("1.0.0")], &mut report);

        assert_eq!(report.files.len(), 2);
        let derived = &report.files[1];
        assert_eq!(derived.source, SourceTag::Derived);
        assert_eq!(derived.path.as_str(), "lib/x-deobfuscated.js");
        assert_eq!(derived.evasion.code_type, Some(CodeType::Deobfuscated));
        let snapshot = &report.snapshots[0];
        assert!(snapshot.evasion.code_types.contains(&CodeType::Obfuscated));
        assert!(snapshot.evasion.code_types.contains(&CodeType::Deobfuscated));
        assert_eq!(snapshot.payload.eval_count, 1);
    }
}
