//! Logging system with daily rotation using local timezone.

use anyhow::Result;
use logroller::{LogRollerBuilder, Rotation, RotationAge, TimeZone};
use std::fs;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::prelude::*;

/// Split `log_file` into the directory and file name handed to the roller.
fn split_log_file(log_file: &Path) -> (PathBuf, String) {
    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = log_file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("release-sight.log")
        .to_string();
    (dir, name)
}

/// Install the file and stderr layers.
///
/// The returned guard flushes the file writer when dropped and must be held
/// for the life of the program.
pub fn init(log_file: &Path, debug: bool) -> Result<WorkerGuard> {
    let (dir, name) = split_log_file(log_file);
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
    }

    cleanup_old_logs(&dir, &name)?;

    // File naming: <name>.YYYY-MM-DD (e.g., log.txt.2026-10-16)
    let appender = LogRollerBuilder::new(dir.as_path(), Path::new(&name))
        .rotation(Rotation::AgeBased(RotationAge::Daily))
        .time_zone(TimeZone::Local)
        .max_keep_files(3)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create log roller: {}", e))?;

    // single writer thread serializes lines from every rayon worker
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let time_format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let local_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = OffsetTime::new(local_offset, time_format);

    let default_filter = if debug {
        "info,release_sight=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(debug)
                .with_line_number(debug)
                .with_timer(timer.clone()),
        )
        .with(
            fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_timer(timer),
        );

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set global subscriber: {}", e))?;

    Ok(guard)
}

/// Remove rotated logs named `<prefix>*` older than 3 days.
pub fn cleanup_old_logs(log_dir: &Path, prefix: &str) -> Result<()> {
    use std::time::{Duration, SystemTime};

    let three_days = Duration::from_secs(3 * 24 * 60 * 60);
    let cutoff = SystemTime::now() - three_days;

    if !log_dir.exists() {
        return Ok(());
    }

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };

        if !filename.starts_with(prefix) {
            continue;
        }

        if let Ok(metadata) = entry.metadata()
            && let Ok(modified) = metadata.modified()
            && modified < cutoff
        {
            let _ = fs::remove_file(&path);
        }
    }

    Ok(())
}
