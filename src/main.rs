use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};

use release_sight::cli::{Cli, Commands};
use release_sight::config::{Config, ConfigService};
use release_sight::doctor;
use release_sight::engine::analyzer::{AnalyzeOptions, PackageAnalyzer, effective_rules};
use release_sight::error::{ErrorCode, SightError};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        let (code, message) = classify_error(&e);
        let error = serde_json::json!({
            "error": { "code": code, "message": message }
        });
        println!("{error}");
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn classify_error(e: &anyhow::Error) -> (String, String) {
    if let Some(se) = e.downcast_ref::<SightError>() {
        (se.code.to_string(), se.message.clone())
    } else {
        (ErrorCode::IoError.to_string(), format!("{e:#}"))
    }
}

fn serialize_output(value: &impl serde::Serialize, pretty: bool) -> Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(value)?)
    } else {
        Ok(serde_json::to_string(value)?)
    }
}

/// Package ids from a JSON file holding a string or an array of strings.
fn load_packages_json(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|_| SightError::file_not_found(&path.display().to_string()))?;
    let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        SightError::new(
            ErrorCode::InvalidRequest,
            format!("Invalid package list {}: {e}", path.display()),
        )
    })?;
    match value {
        serde_json::Value::String(s) => Ok(vec![s]),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => Ok(s),
                other => Err(SightError::new(
                    ErrorCode::InvalidRequest,
                    format!("Package ids must be strings, found {other}"),
                )
                .into()),
            })
            .collect(),
        _ => Err(SightError::new(
            ErrorCode::InvalidRequest,
            "Package list must be a string or an array of strings",
        )
        .into()),
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

fn run(cli: Cli) -> Result<()> {
    let config = ConfigService::load(cli.config.as_deref())?;
    let debug = cli.debug || config.debug;

    match cli.command {
        Commands::Analyze {
            packages,
            json,
            output,
            workers,
            local,
            local_dir,
            tarballs,
            log,
        } => {
            let opts = AnalyzeArgs {
                packages,
                json,
                options: AnalyzeOptions {
                    output_dir: output,
                    include_local: local,
                    local_dir,
                    include_tarballs: tarballs,
                },
                workers,
                log,
            };
            cmd_analyze(&config, opts, debug)
        }
        Commands::Init { path } => cmd_init(path.as_deref()),
        Commands::Rules { pretty } => cmd_rules(&config, pretty),
        Commands::Doctor => cmd_doctor(&config),
    }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

struct AnalyzeArgs {
    packages: Vec<String>,
    json: Option<PathBuf>,
    options: AnalyzeOptions,
    workers: Option<usize>,
    log: PathBuf,
}

fn cmd_analyze(config: &Config, args: AnalyzeArgs, debug: bool) -> Result<()> {
    let mut packages = args.packages;
    if let Some(json) = &args.json {
        packages.extend(load_packages_json(json)?);
    }
    if packages.is_empty() {
        return Err(SightError::new(
            ErrorCode::InvalidRequest,
            "At least one package id or --json is required",
        )
        .into());
    }

    let _guard = release_sight::logger::init(&args.log, debug)?;

    if let Some(workers) = args.workers {
        rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build_global()
            .map_err(|e| anyhow::anyhow!("Failed to configure worker pool: {e}"))?;
    }

    tracing::info!(
        packages = packages.len(),
        output = %args.options.output_dir.display(),
        "starting analysis"
    );
    let analyzer = PackageAnalyzer::from_config(config, args.options)?;
    let summary = analyzer.analyze_all(&packages);
    tracing::info!(
        packages = summary.packages,
        succeeded = summary.succeeded,
        "analysis finished"
    );

    println!("{}", serialize_output(&summary, false)?);
    Ok(())
}

fn cmd_init(path: Option<&Path>) -> Result<()> {
    let config_path = match path {
        Some(p) => {
            ConfigService::generate_at(p)?;
            p.to_path_buf()
        }
        None => ConfigService::generate_default()?,
    };
    eprintln!("Configuration file created at: {}", config_path.display());
    Ok(())
}

fn cmd_rules(config: &Config, pretty: bool) -> Result<()> {
    let rules = effective_rules(config)?;
    println!("{}", serialize_output(&rules, pretty)?);
    Ok(())
}

fn cmd_doctor(config: &Config) -> Result<()> {
    let report = doctor::run_doctor(config);
    println!("{}", serialize_output(&report, false)?);
    Ok(())
}
