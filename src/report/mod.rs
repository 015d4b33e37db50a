//! Per-package report streams.

pub mod summary;
pub mod table;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::aggregate::AggregateVersionMetrics;
use crate::models::change::Flags;
use crate::models::file_metrics::FileMetrics;
use crate::models::rule::TriggeredRule;
use crate::models::version_metrics::VersionMetrics;
use crate::sources::history::safe_dir_name;
use summary::SummaryWriter;
use table::{CsvSink, FlagsRow};

/// Receiver of pipeline output, called once per step of each version.
pub trait ReportSink {
    fn record_files(&mut self, files: &[FileMetrics]) -> Result<()>;
    fn record_snapshot(&mut self, snapshot: &VersionMetrics) -> Result<()>;
    /// Called after the current version has been folded into `history`.
    fn record_history(&mut self, history: &AggregateVersionMetrics) -> Result<()>;
    fn record_flags(&mut self, flags: &Flags, triggered: &[TriggeredRule]) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

pub const FILE_METRICS_CSV: &str = "all_metrics.csv";
pub const SNAPSHOTS_CSV: &str = "aggregate_metrics_by_tag.csv";
pub const HISTORY_CSV: &str = "aggregate_metrics_history.csv";
pub const FLAGS_CSV: &str = "flags.csv";
pub const SUMMARY_TXT: &str = "red_flags_summary.txt";

/// CSV streams and text summary under `<output>/<package>/`.
pub struct PackageReport {
    dir: PathBuf,
    files: CsvSink,
    snapshots: CsvSink,
    history: CsvSink,
    flags: CsvSink,
    summary: SummaryWriter,
}

impl PackageReport {
    /// Create the package directory, truncating streams of an earlier run.
    pub fn create(output_root: &Path, package: &str) -> Result<Self> {
        let dir = output_root.join(safe_dir_name(package));
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
        Ok(Self {
            files: CsvSink::create::<FileMetrics>(&dir.join(FILE_METRICS_CSV))?,
            snapshots: CsvSink::create::<VersionMetrics>(&dir.join(SNAPSHOTS_CSV))?,
            history: CsvSink::create::<AggregateVersionMetrics>(&dir.join(HISTORY_CSV))?,
            flags: CsvSink::create::<FlagsRow>(&dir.join(FLAGS_CSV))?,
            summary: SummaryWriter::create(&dir.join(SUMMARY_TXT), package)?,
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ReportSink for PackageReport {
    fn record_files(&mut self, files: &[FileMetrics]) -> Result<()> {
        for file in files {
            self.files.append(file)?;
        }
        Ok(())
    }

    fn record_snapshot(&mut self, snapshot: &VersionMetrics) -> Result<()> {
        self.snapshots.append(snapshot)
    }

    fn record_history(&mut self, history: &AggregateVersionMetrics) -> Result<()> {
        self.history.append(history)
    }

    fn record_flags(&mut self, flags: &Flags, triggered: &[TriggeredRule]) -> Result<()> {
        self.flags.append(&FlagsRow { flags, triggered })?;
        self.summary.record(flags, triggered)
    }

    fn finish(&mut self) -> Result<()> {
        self.summary.finish()
    }
}
