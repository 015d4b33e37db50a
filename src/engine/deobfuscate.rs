//! Secondary pass through an external JavaScript deobfuscator.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use tracing::debug;

use crate::cache::store::CacheStore;
use crate::error::{ErrorCode, SightError};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Suffix appended to the path of a derived (deobfuscated) file.
pub const DERIVED_SUFFIX: &str = "-deobfuscated.js";

/// Derived path label for `path` (`lib/a.js` -> `lib/a-deobfuscated.js`).
pub fn derived_path(path: &str) -> String {
    let stem = path.strip_suffix(".js").unwrap_or(path);
    format!("{stem}{DERIVED_SUFFIX}")
}

/// Resolve `command` against `PATH`, or as given when it contains a separator.
pub fn find_in_path(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(command))
        .find(|p| p.is_file())
}

/// Runs `<command> <input> -o <output>` with a timeout, caching outputs by
/// content hash so unchanged files are processed once across versions.
pub struct Deobfuscator {
    command: String,
    timeout: Duration,
    store: CacheStore,
}

impl Deobfuscator {
    pub fn new(command: impl Into<String>, timeout: Duration, cache_dir: &Path) -> Result<Self> {
        Ok(Self {
            command: command.into(),
            timeout,
            store: CacheStore::open(cache_dir)?,
        })
    }

    pub fn is_available(&self) -> bool {
        find_in_path(&self.command).is_some()
    }

    /// Deobfuscated form of `content`. `file` is only used for diagnostics.
    pub fn deobfuscate(&self, content: &str, file: &str) -> Result<String> {
        let hash = CacheStore::hash(content.as_bytes());
        if let Some(cached) = self.store.get(&hash, "js") {
            debug!(file, "deobfuscation cache hit");
            return Ok(String::from_utf8_lossy(&cached).into_owned());
        }

        let input = self.store.path_for(&hash, "in.js");
        let output = self.store.path_for(&hash, "js");
        self.store.put(&hash, "in.js", content.as_bytes())?;

        let result = self.run(&input, &output, file);
        // the input copy is only needed while the tool runs
        let _ = fs::remove_file(&input);
        result?;

        let produced = fs::read(&output).map_err(|e| {
            SightError::new(
                ErrorCode::DeobfuscationFailed,
                format!("{file}: no output produced: {e}"),
            )
        })?;
        Ok(String::from_utf8_lossy(&produced).into_owned())
    }

    fn run(&self, input: &Path, output: &Path, file: &str) -> Result<()> {
        let mut child = Command::new(&self.command)
            .arg(input)
            .arg("-o")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                SightError::new(
                    ErrorCode::DeobfuscationFailed,
                    format!("Failed to start {}: {e}", self.command),
                )
            })?;

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                if !status.success() {
                    let _ = fs::remove_file(output);
                    bail!(SightError::new(
                        ErrorCode::DeobfuscationFailed,
                        format!("{file}: {} exited with {status}", self.command),
                    ));
                }
                return Ok(());
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                let _ = fs::remove_file(output);
                bail!(SightError::new(
                    ErrorCode::DeobfuscationFailed,
                    format!("{file}: timed out after {}s", self.timeout.as_secs()),
                ));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_path() {
        assert_eq!(derived_path("lib/a.js"), "lib/a-deobfuscated.js");
        assert_eq!(derived_path("bin/cli"), "bin/cli-deobfuscated.js");
    }

    #[test]
    fn test_find_in_path_missing() {
        assert!(find_in_path("definitely-not-a-real-tool-1234").is_none());
        assert!(find_in_path("/nonexistent/dir/tool").is_none());
    }

    #[test]
    fn test_missing_tool_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let d = Deobfuscator::new(
            "definitely-not-a-real-tool-1234",
            Duration::from_secs(1),
            dir.path(),
        )
        .unwrap();
        assert!(!d.is_available());
        let err = d.deobfuscate("var _0x1;", "a.js").unwrap_err();
        let se = err.downcast_ref::<SightError>().unwrap();
        assert_eq!(se.code, ErrorCode::DeobfuscationFailed);
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_output_is_cached_by_content() {
        let dir = tempfile::TempDir::new().unwrap();
        let counter = dir.path().join("runs");
        // $1 input, $3 output
        let tool = script(
            dir.path(),
            "deob",
            &format!("echo run >> {}\necho 'var clean = 1;' > \"$3\"", counter.display()),
        );
        let d = Deobfuscator::new(
            tool.to_string_lossy(),
            Duration::from_secs(10),
            &dir.path().join("cache"),
        )
        .unwrap();
        assert!(d.is_available());

        let first = d.deobfuscate("var _0xabc = 1;", "a.js").unwrap();
        let second = d.deobfuscate("var _0xabc = 1;", "b.js").unwrap();
        assert_eq!(first.trim(), "var clean = 1;");
        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(&counter).unwrap().lines().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_tool_is_not_cached() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = script(dir.path(), "deob", "exit 3");
        let d = Deobfuscator::new(
            tool.to_string_lossy(),
            Duration::from_secs(10),
            &dir.path().join("cache"),
        )
        .unwrap();

        assert!(d.deobfuscate("x", "a.js").is_err());
        let hash = CacheStore::hash(b"x");
        assert!(d.store.get(&hash, "js").is_none());
        assert!(d.store.get(&hash, "in.js").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_tool() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = script(dir.path(), "deob", "sleep 5");
        let d = Deobfuscator::new(
            tool.to_string_lossy(),
            Duration::from_millis(200),
            &dir.path().join("cache"),
        )
        .unwrap();

        let started = Instant::now();
        let err = d.deobfuscate("y", "a.js").unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(err.to_string().contains("timed out"));
    }
}
