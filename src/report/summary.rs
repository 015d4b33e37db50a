use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::change::Flags;
use crate::models::rule::{Trigger, TriggeredRule};

/// Human-readable `red_flags_summary.txt`.
pub struct SummaryWriter {
    path: PathBuf,
    file: File,
    blocks: usize,
}

fn detail(trigger: &Trigger) -> String {
    match trigger {
        Trigger::Percentage { value, threshold } => {
            format!("Value percentage: {value:.2}%. Threshold: {threshold:.2}%.")
        }
        Trigger::Absolute { value, threshold } => {
            format!("Value absolute: {value:.2}. Threshold: {threshold:.2}.")
        }
        Trigger::Boolean { value } => format!("Value: {value}."),
    }
}

impl SummaryWriter {
    pub fn create(path: &Path, package: &str) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writeln!(file, "FLAGS REPORT - Package: {package}")?;
        writeln!(file, "{}\n", "=".repeat(60))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            blocks: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the block for one version transition. Quiet transitions write
    /// nothing.
    pub fn record(&mut self, flags: &Flags, triggered: &[TriggeredRule]) -> Result<()> {
        if triggered.is_empty() {
            return Ok(());
        }
        let compared = flags.previous_version.as_deref().unwrap_or("nothing");
        writeln!(
            self.file,
            "Version: {} (compared with {compared}). Found {} flags",
            flags.version,
            triggered.len()
        )?;
        for rule in triggered {
            writeln!(self.file, "  • {} ({}).", rule.name, rule.description)?;
            writeln!(self.file, "     {}", detail(&rule.trigger))?;
        }
        writeln!(self.file)?;
        self.file.flush()?;
        self.blocks += 1;
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        if self.blocks == 0 {
            writeln!(self.file, "No flags found.")?;
        }
        self.file.flush()?;
        Ok(())
    }
}
