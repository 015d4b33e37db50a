use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "release-sight",
    version,
    about = "Track a package's releases and flag supply-chain attack indicators"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Path to configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze every release of one or more packages
    Analyze {
        /// Package ids (e.g. left-pad, @scope/name)
        packages: Vec<String>,

        /// JSON file holding a package id or an array of ids
        #[arg(long)]
        json: Option<PathBuf>,

        /// Output directory, one subdirectory per package
        #[arg(short, long, default_value = "analysis_results")]
        output: PathBuf,

        /// Worker threads for file analysis (default: available parallelism)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Include local .tgz archives
        #[arg(long)]
        local: bool,

        /// Directory searched for local archives
        #[arg(long, default_value = "./other_versions")]
        local_dir: PathBuf,

        /// Also download registry tarballs for versions without a tag
        #[arg(long)]
        tarballs: bool,

        /// Log file base name; daily files are written as <file>.YYYY-MM-DD
        #[arg(long, default_value = "log.txt")]
        log: PathBuf,
    },

    /// Generate default configuration file
    Init {
        /// Output path (default: ~/.config/release-sight/config.toml)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Print the effective threshold rules as JSON
    Rules {
        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Check availability of external tools
    Doctor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_defaults() {
        let cli = Cli::try_parse_from(["release-sight", "analyze", "left-pad"]).unwrap();
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
                assert_eq!(packages, vec!["left-pad"]);
                assert!(json.is_none());
                assert_eq!(output, PathBuf::from("analysis_results"));
                assert!(workers.is_none());
                assert!(!local);
                assert_eq!(local_dir, PathBuf::from("./other_versions"));
                assert!(!tarballs);
                assert_eq!(log, PathBuf::from("log.txt"));
            }
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["release-sight", "doctor", "--debug", "--config", "c.toml"])
            .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
    }

    #[test]
    fn test_analyze_options() {
        let cli = Cli::try_parse_from([
            "release-sight",
            "analyze",
            "--json",
            "packages.json",
            "--local",
            "--workers",
            "4",
            "-o",
            "out",
        ])
        .unwrap();
        let Commands::Analyze {
            packages,
            json,
            workers,
            local,
            output,
            ..
        } = cli.command
        else {
            panic!("expected analyze");
        };
        assert!(packages.is_empty());
        assert_eq!(json, Some(PathBuf::from("packages.json")));
        assert_eq!(workers, Some(4));
        assert!(local);
        assert_eq!(output, PathBuf::from("out"));
    }
}
