//! CLI argument parsing definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Load generator for JupyterHub-style hubs", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error) or a filter directive
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Shorthand for --log-level debug
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs to a file instead of stderr (`--log-to-file=PATH`); without
    /// a path a timestamped file is created in the temp directory
    #[arg(long, value_name = "PATH", num_args = 0..=1, require_equals = true, global = true)]
    pub log_to_file: Option<Option<PathBuf>>,

    /// Log format: text, compact, json
    #[arg(long, value_name = "FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub output: OutputFormat,

    /// Hub API endpoint, e.g. https://hub.example.com/hub/api
    #[arg(long, value_name = "URL", global = true)]
    pub endpoint: Option<String>,

    /// Hub API token
    #[arg(long, value_name = "TOKEN", global = true)]
    pub token: Option<String>,

    /// Name prefix of the synthetic users
    #[arg(long, value_name = "PREFIX", global = true)]
    pub prefix: Option<String>,

    /// Run against an in-memory hub instead of the real one
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create users and sessions, wait for readiness, then tear down
    ScaleUp {
        /// Number of sessions to start
        #[arg(long, value_name = "N")]
        count: Option<usize>,

        /// Maximum number of hub calls in flight
        #[arg(
            short = 'b',
            long = "batch-size",
            visible_alias = "concurrency",
            value_name = "C"
        )]
        concurrency: Option<usize>,

        /// Leave the sessions running after they become ready
        #[arg(long)]
        keep: bool,

        /// Run deadline in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Delete every user and session under the prefix
    Purge {
        /// Maximum number of hub calls in flight
        #[arg(long, value_name = "C")]
        concurrency: Option<usize>,

        /// Lowest index to delete
        #[arg(long, value_name = "I")]
        from_index: Option<u64>,

        /// Highest index to delete
        #[arg(long, value_name = "J")]
        to_index: Option<u64>,
    },

    /// Show how many identities exist under the prefix and their session states
    Status,

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output file path; prints to stdout when omitted
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_scale_up_flags() {
        let cli = Cli::parse_from([
            "hubstress",
            "--endpoint",
            "http://localhost:8000/hub/api",
            "scale-up",
            "--count",
            "50",
            "-b",
            "5",
            "--keep",
        ]);
        assert_eq!(cli.endpoint.as_deref(), Some("http://localhost:8000/hub/api"));
        match cli.command {
            Some(Commands::ScaleUp {
                count,
                concurrency,
                keep,
                timeout,
            }) => {
                assert_eq!(count, Some(50));
                assert_eq!(concurrency, Some(5));
                assert!(keep);
                assert_eq!(timeout, None);
            }
            _ => panic!("expected scale-up"),
        }
    }

    #[test]
    fn test_concurrency_alias() {
        let cli = Cli::parse_from(["hubstress", "scale-up", "--concurrency", "7"]);
        assert!(matches!(
            cli.command,
            Some(Commands::ScaleUp {
                concurrency: Some(7),
                ..
            })
        ));
    }

    #[test]
    fn test_log_to_file_without_path() {
        let cli = Cli::parse_from(["hubstress", "--log-to-file", "status"]);
        assert_eq!(cli.log_to_file, Some(None));

        let cli = Cli::parse_from(["hubstress", "status", "--log-to-file=/tmp/run.log"]);
        assert_eq!(cli.log_to_file, Some(Some(PathBuf::from("/tmp/run.log"))));
    }

    #[test]
    fn test_purge_range_and_output() {
        let cli = Cli::parse_from([
            "hubstress",
            "--output",
            "json",
            "purge",
            "--from-index",
            "10",
            "--to-index",
            "19",
        ]);
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Some(Commands::Purge {
                from_index: Some(10),
                to_index: Some(19),
                concurrency: None,
            })
        ));
    }
}
