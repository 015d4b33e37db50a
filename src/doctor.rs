use serde::Serialize;

use crate::config::Config;
use crate::engine::deobfuscate::find_in_path;

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub version: String,
    pub tools: Vec<ToolStatus>,
}

#[derive(Debug, Serialize)]
pub struct ToolStatus {
    pub name: String,
    pub purpose: &'static str,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn check(name: &str, purpose: &'static str) -> ToolStatus {
    let path = find_in_path(name);
    ToolStatus {
        name: name.to_string(),
        purpose,
        available: path.is_some(),
        path: path.map(|p| p.display().to_string()),
    }
}

/// Run the doctor check: locate the external tools the analyzer shells out to.
pub fn run_doctor(config: &Config) -> DoctorReport {
    DoctorReport {
        version: env!("CARGO_PKG_VERSION").to_string(),
        tools: vec![
            check("git", "source history (tags, checkout, commit hashes)"),
            check(&config.deobfuscator, "deobfuscation of obfuscated files"),
        ],
    }
}
