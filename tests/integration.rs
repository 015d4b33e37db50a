use std::fs;
use std::path::Path;
use std::process::Command;

use flate2::Compression;
use flate2::write::GzEncoder;

const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

fn cargo_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_release-sight"))
}

fn write_tgz(path: &Path, files: &[(&str, &str)]) {
    let file = fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("package/{name}"), content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Config pointing every cache into `base` and the registry at a closed port.
fn write_offline_config(base: &Path) -> std::path::PathBuf {
    let path = base.join("config.toml");
    let content = format!(
        r#"registry_url = "http://127.0.0.1:9"
http_timeout_secs = 1
repos_dir = "{}"
work_dir = "{}"
deobfuscator = "definitely-not-a-deobfuscator"
"#,
        base.join("repos").display(),
        base.join("work").display()
    );
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn doctor_returns_json() {
    let output = cargo_bin().arg("doctor").output().expect("failed to run");
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("invalid JSON");
    assert_eq!(json["version"], PKG_VERSION);
    let tools = json["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0]["name"], "git");
    assert!(tools[0]["available"].is_boolean());
}

#[test]
fn rules_lists_builtin_table() {
    let output = cargo_bin()
        .args(["rules", "--pretty"])
        .output()
        .expect("failed to run");
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("invalid JSON");
    let rules = json.as_array().unwrap();
    assert!(!rules.is_empty());
    assert!(rules.iter().any(|r| r["name"] == "Eval introduced"));
}

#[test]
fn init_writes_config_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let output = cargo_bin()
        .args(["init", "--path", path.to_str().unwrap()])
        .output()
        .expect("failed to run");
    assert!(output.status.success());
    assert!(path.exists());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Configuration file created at"));
}

#[test]
fn analyze_without_packages_is_invalid_request() {
    let output = cargo_bin().arg("analyze").output().expect("failed to run");
    assert!(!output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("invalid JSON");
    assert_eq!(json["error"]["code"], "INVALID_REQUEST");
}

#[test]
fn analyze_bad_package_list_is_invalid_request() {
    let dir = tempfile::TempDir::new().unwrap();
    let list = dir.path().join("packages.json");
    fs::write(&list, r#"{"name": "left-pad"}"#).unwrap();

    let output = cargo_bin()
        .args(["analyze", "--json", list.to_str().unwrap()])
        .output()
        .expect("failed to run");
    assert!(!output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("invalid JSON");
    assert_eq!(json["error"]["code"], "INVALID_REQUEST");
}

#[test]
fn analyze_local_archives_writes_reports() {
    let dir = tempfile::TempDir::new().unwrap();
    let base = dir.path();
    let config = write_offline_config(base);

    let local = base.join("other_versions");
    fs::create_dir_all(&local).unwrap();
    write_tgz(
        &local.join("demo-1.0.0.tgz"),
        &[
            ("index.js", "module.exports = function add(a, b) { return a + b; };\n"),
            ("package.json", r#"{"name":"demo","version":"1.0.0"}"#),
        ],
    );
    write_tgz(
        &local.join("demo-1.1.0.tgz"),
        &[
            ("index.js", "eval(atob('YWxlcnQoMSk='));\nmodule.exports = 1;\n"),
            ("package.json", r#"{"name":"demo","version":"1.1.0"}"#),
        ],
    );

    let out = base.join("results");
    let output = cargo_bin()
        .args([
            "analyze",
            "demo",
            "--config",
            config.to_str().unwrap(),
            "--local",
            "--local-dir",
            local.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
            "--log",
            base.join("logs").join("log.txt").to_str().unwrap(),
            "--workers",
            "2",
        ])
        .output()
        .expect("failed to run");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("invalid JSON");
    assert_eq!(json["packages"], 1);
    assert_eq!(json["succeeded"], 1);

    let package_dir = out.join("demo");
    let snapshots = fs::read_to_string(package_dir.join("aggregate_metrics_by_tag.csv")).unwrap();
    // header plus one row per version
    assert_eq!(snapshots.lines().count(), 3);
    assert!(snapshots.contains("1.0.0-local"));
    assert!(snapshots.contains("1.1.0-local"));

    let files = fs::read_to_string(package_dir.join("all_metrics.csv")).unwrap();
    assert!(files.contains("index.js"));
    assert!(package_dir.join("aggregate_metrics_history.csv").exists());
    assert!(package_dir.join("flags.csv").exists());

    // daily rotation appends the date to the configured name
    let logs: Vec<String> = fs::read_dir(base.join("logs"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(
        logs.iter().any(|name| name.starts_with("log.txt.")),
        "log files: {logs:?}"
    );

    let summary = fs::read_to_string(package_dir.join("red_flags_summary.txt")).unwrap();
    assert!(summary.starts_with("FLAGS REPORT - Package: demo"));
    assert!(summary.contains("Version: 1.1.0-local"));
    assert!(summary.contains("Eval introduced"));
}

#[test]
fn analyze_unknown_package_counts_as_failed() {
    let dir = tempfile::TempDir::new().unwrap();
    let base = dir.path();
    let config = write_offline_config(base);

    let output = cargo_bin()
        .args([
            "analyze",
            "ghost-package",
            "--config",
            config.to_str().unwrap(),
            "-o",
            base.join("results").to_str().unwrap(),
            "--log",
            base.join("log.txt").to_str().unwrap(),
        ])
        .output()
        .expect("failed to run");
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("invalid JSON");
    assert_eq!(json["packages"], 1);
    assert_eq!(json["succeeded"], 0);
}
