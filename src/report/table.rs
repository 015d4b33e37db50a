//! Flat CSV rendering of the metric records.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::models::aggregate::AggregateVersionMetrics;
use crate::models::change::{Baseline, ChangeMetric, Flags, Signal};
use crate::models::file_metrics::FileMetrics;
use crate::models::metric::NumericMetric;
use crate::models::rule::TriggeredRule;
use crate::models::version_metrics::VersionMetrics;

/// Fixed column schema of a record kind.
pub trait Tabular {
    fn columns() -> Vec<String>;
    fn row(&self) -> Vec<String>;
}

fn join<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: ToString,
{
    items
        .into_iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join("|")
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn strings(cols: &[&str]) -> Vec<String> {
    cols.iter().map(|c| c.to_string()).collect()
}

const FILE_COLUMNS: &[&str] = &[
    "package",
    "version",
    "path",
    "source",
    "generic.size_bytes",
    "generic.size_chars",
    "generic.blank_space_ratio",
    "generic.shannon_entropy",
    "generic.longest_line_length",
    "evasion.code_type",
    "evasion.obfuscation_patterns_count",
    "evasion.obfuscation_patterns",
    "evasion.platform_detections_count",
    "evasion.platform_detections",
    "payload.timing_delays_count",
    "payload.timing_delays",
    "payload.eval_count",
    "payload.evals",
    "payload.shell_commands_count",
    "payload.shell_commands",
    "payload.install_scripts",
    "exfiltration.scan_functions_count",
    "exfiltration.scan_functions",
    "exfiltration.sensitive_elements_count",
    "exfiltration.sensitive_elements",
    "exfiltration.data_transmission_count",
    "exfiltration.data_transmissions",
    "crypto.crypto_addresses_count",
    "crypto.crypto_addresses",
    "crypto.cryptocurrency_names_count",
    "crypto.cryptocurrency_names",
    "crypto.wallet_detection_count",
    "crypto.wallet_detections",
    "crypto.replaced_addresses_count",
    "crypto.hook_provider_count",
];

impl Tabular for FileMetrics {
    fn columns() -> Vec<String> {
        strings(FILE_COLUMNS)
    }

    fn row(&self) -> Vec<String> {
        let (g, e, p, x, c) = (
            &self.generic,
            &self.evasion,
            &self.payload,
            &self.exfiltration,
            &self.crypto,
        );
        vec![
            self.package.clone(),
            self.version.clone(),
            self.path.to_string(),
            self.source.to_string(),
            g.size_bytes.to_string(),
            g.size_chars.to_string(),
            g.blank_space_ratio.to_string(),
            g.shannon_entropy.to_string(),
            g.longest_line_length.to_string(),
            opt(e.code_type),
            e.obfuscation_patterns_count.to_string(),
            join(&e.obfuscation_patterns),
            e.platform_detections_count.to_string(),
            join(&e.platform_detections),
            p.timing_delays_count.to_string(),
            join(&p.timing_delays),
            p.eval_count.to_string(),
            join(&p.evals),
            p.shell_commands_count.to_string(),
            join(&p.shell_commands),
            join(&p.install_scripts),
            x.scan_functions_count.to_string(),
            join(&x.scan_functions),
            x.sensitive_elements_count.to_string(),
            join(&x.sensitive_elements),
            x.data_transmission_count.to_string(),
            join(&x.data_transmissions),
            c.crypto_addresses_count.to_string(),
            join(&c.crypto_addresses),
            c.cryptocurrency_names_count.to_string(),
            join(&c.cryptocurrency_names),
            c.wallet_detection_count.to_string(),
            join(&c.wallet_detections),
            c.replaced_addresses_count.to_string(),
            c.hook_provider_count.to_string(),
        ]
    }
}

const SNAPSHOT_EXTRAS: &[&str] = &[
    "evasion.code_types",
    "payload.install_scripts",
    "crypto.crypto_addresses",
    "account.maintainer_handles",
    "account.registry_commit",
    "account.history_commit",
    "account.release_timestamp",
];

impl Tabular for VersionMetrics {
    fn columns() -> Vec<String> {
        let mut cols = strings(&["package", "version"]);
        cols.extend(NumericMetric::ALL.iter().map(|m| m.key()));
        cols.extend(strings(SNAPSHOT_EXTRAS));
        cols
    }

    fn row(&self) -> Vec<String> {
        let mut row = vec![self.package.clone(), self.version.clone()];
        row.extend(NumericMetric::ALL.iter().map(|&m| self.value(m).to_string()));
        row.extend([
            join(&self.evasion.code_types),
            join(&self.payload.install_scripts),
            join(&self.crypto.crypto_addresses),
            join(&self.account.maintainers),
            self.account.registry_commit.clone(),
            self.account.history_commit.clone(),
            self.account.release_rfc3339().unwrap_or_default(),
        ]);
        row
    }
}

impl Tabular for AggregateVersionMetrics {
    fn columns() -> Vec<String> {
        let mut cols = strings(&["package", "label", "versions_seen"]);
        cols.extend(NumericMetric::ALL.iter().map(|m| format!("{}.avg", m.key())));
        cols.extend(strings(&[
            "evasion.code_types",
            "payload.install_scripts",
            "crypto.crypto_addresses",
        ]));
        cols
    }

    fn row(&self) -> Vec<String> {
        let mut row = vec![
            self.package.clone(),
            self.label.clone(),
            self.versions_seen().to_string(),
        ];
        row.extend(NumericMetric::ALL.iter().map(|&m| self.average(m).to_string()));
        row.extend([
            join(&self.evasion.code_types),
            join(&self.payload.install_scripts),
            join(&self.crypto.crypto_addresses),
        ]);
        row
    }
}

/// One `flags.csv` line: the change record plus the rules it triggered.
pub struct FlagsRow<'a> {
    pub flags: &'a Flags,
    pub triggered: &'a [TriggeredRule],
}

fn change_cells(change: ChangeMetric) -> [String; 2] {
    [opt(change.absolute), opt(change.percentage)]
}

impl Tabular for FlagsRow<'_> {
    fn columns() -> Vec<String> {
        let mut cols = strings(&["package", "version", "previous_version"]);
        for metric in NumericMetric::ALL {
            for baseline in [Baseline::Previous, Baseline::History] {
                let base = format!("{}.{}", metric.key(), baseline.as_str());
                cols.push(format!("{base}.absolute"));
                cols.push(format!("{base}.percentage"));
            }
        }
        cols.extend(
            Signal::ALL
                .iter()
                .map(|s| format!("{}.{}", s.category(), s.field())),
        );
        cols.push("triggered_rules".to_string());
        cols
    }

    fn row(&self) -> Vec<String> {
        let f = self.flags;
        let mut row = vec![
            f.package.clone(),
            f.version.clone(),
            opt(f.previous_version.as_deref()),
        ];
        for metric in NumericMetric::ALL {
            let change = f.change(metric);
            row.extend(change_cells(change.previous));
            row.extend(change_cells(change.history));
        }
        row.extend(Signal::ALL.iter().map(|&s| opt(f.signal(s))));
        row.push(join(self.triggered.iter().map(|t| &t.name)));
        row
    }
}

/// Append-only CSV stream with a fixed header.
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
    width: usize,
}

impl CsvSink {
    /// Create (truncating) `path` and write the header of `T`.
    pub fn create<T: Tabular>(path: &Path) -> Result<Self> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let header = T::columns();
        writer.write_record(&header)?;
        writer.flush()?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            width: header.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush it to disk.
    pub fn append<T: Tabular>(&mut self, record: &T) -> Result<()> {
        let row = record.row();
        if row.len() != self.width {
            bail!(
                "{}: row has {} cells, header has {}",
                self.path.display(),
                row.len(),
                self.width
            );
        }
        self.writer.write_record(&row)?;
        self.writer.flush()?;
        Ok(())
    }
}
