use anyhow::{Context, Result};
use clap::Parser;
use hubstress_config::{ConfigLoader, HubStressConfig, LogFormat, LoggingConfig};
use hubstress_core::{CoreError, RunController, RunReport, EXIT_FAILURES, EXIT_FATAL, EXIT_OK};
use hubstress_http::{HttpConfig, HubApi, HubClient, SimulatedHub};
use hubstress_logging::{default_log_file, init_logging};
use hubstress_resilience::ShutdownCoordinator;
use std::fs;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

mod cli;
use cli::{Cli, Commands, ConfigCommands, OutputFormat};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

/// Everything up to the exit code; the logging guard is dropped (and the log
/// file flushed) before `main` exits the process.
async fn run(cli: Cli) -> Result<i32> {
    let command = match &cli.command {
        Some(Commands::Config { config_cmd }) => {
            let _guard = init_logging(&LoggingConfig::default(), cli_log_level(&cli).as_deref())?;
            return handle_config_command(config_cmd);
        }
        Some(command) => command,
        None => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            cmd.print_help().context("Failed to print help")?;
            println!();
            return Ok(EXIT_OK);
        }
    };

    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {:#}", e);
            return Ok(EXIT_FAILURES);
        }
    };
    apply_command_overrides(command, &mut config);

    let guard = match init_logging(&config.logging, cli_log_level(&cli).as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Invalid logging configuration: {}", e);
            return Ok(EXIT_FAILURES);
        }
    };
    if let Some(file) = guard.file() {
        eprintln!("Logging to {}", file.display());
    }

    if let Err(e) = config.validate_all() {
        error!("Configuration validation failed: {}", e);
        eprintln!("Invalid configuration: {}", e);
        return Ok(EXIT_FAILURES);
    }
    info!(
        "Effective configuration: {}",
        serde_json::to_string(&config.redacted()).context("Failed to serialize configuration")?
    );

    let hub = connect(&config)?;
    let shutdown = ShutdownCoordinator::new();
    let listener = shutdown.listen_for_ctrl_c();
    let controller = RunController::from_config(hub, &config).with_cancellation(shutdown.token());

    let code = match command {
        Commands::ScaleUp { keep, .. } => {
            let outcome = controller
                .run_scale_up(
                    config.run.count,
                    config.run.concurrency,
                    *keep,
                    config.run.timeout,
                )
                .await;
            finish_run(outcome, cli.output)?
        }
        Commands::Purge {
            from_index,
            to_index,
            ..
        } => {
            let outcome = controller
                .run_purge(config.run.concurrency, index_range(*from_index, *to_index))
                .await;
            finish_run(outcome, cli.output)?
        }
        Commands::Status => match controller.inspect().await {
            Ok(summary) => {
                match cli.output {
                    OutputFormat::Text => print!("{}", summary),
                    OutputFormat::Json => println!(
                        "{}",
                        serde_json::to_string_pretty(&summary)
                            .context("Failed to serialize namespace summary")?
                    ),
                }
                EXIT_OK
            }
            Err(e) => fatal(e),
        },
        Commands::Config { .. } => EXIT_OK,
    };

    if shutdown.was_interrupted() {
        warn!(
            "Run was interrupted; leftover identities can be removed with `hubstress purge --prefix {}`",
            config.run.prefix
        );
    }
    listener.abort();
    Ok(code)
}

/// Read file and environment, then layer the global flags on top
fn load_config(cli: &Cli) -> Result<HubStressConfig> {
    let loader = ConfigLoader::new();
    let mut config = match &cli.config {
        Some(path) => loader
            .read(Some(path))
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => loader
            .read(None::<&PathBuf>)
            .context("Failed to load configuration from environment")?,
    };

    if let Some(endpoint) = &cli.endpoint {
        config.hub.endpoint = endpoint.clone();
    }
    if let Some(token) = &cli.token {
        config.hub.token = Some(token.clone());
    }
    if let Some(prefix) = &cli.prefix {
        config.run.prefix = prefix.clone();
    }
    if cli.dry_run {
        config.run.dry_run = true;
    }

    if let Some(format) = &cli.log_format {
        config.logging.format = LogFormat::from_str(format).map_err(|e| anyhow::anyhow!(e))?;
    }
    match &cli.log_to_file {
        Some(Some(path)) => config.logging.file = Some(path.clone()),
        Some(None) => config.logging.file = Some(default_log_file()),
        None => {}
    }

    Ok(config)
}

fn apply_command_overrides(command: &Commands, config: &mut HubStressConfig) {
    match command {
        Commands::ScaleUp {
            count,
            concurrency,
            timeout,
            ..
        } => {
            if let Some(count) = count {
                config.run.count = *count;
            }
            if let Some(concurrency) = concurrency {
                config.run.concurrency = *concurrency;
            }
            if let Some(timeout) = timeout {
                config.run.timeout = Duration::from_secs(*timeout);
            }
        }
        Commands::Purge {
            concurrency: Some(concurrency),
            ..
        } => config.run.concurrency = *concurrency,
        _ => {}
    }
}

fn cli_log_level(cli: &Cli) -> Option<String> {
    match (&cli.log_level, cli.verbose) {
        (Some(level), _) => Some(level.clone()),
        (None, true) => Some("debug".to_string()),
        (None, false) => None,
    }
}

fn index_range(from: Option<u64>, to: Option<u64>) -> Option<RangeInclusive<u64>> {
    match (from, to) {
        (None, None) => None,
        (from, to) => Some(from.unwrap_or(0)..=to.unwrap_or(u64::MAX)),
    }
}

fn connect(config: &HubStressConfig) -> Result<Arc<dyn HubApi>> {
    if config.run.dry_run {
        info!("Dry run: using an in-memory hub, nothing is sent to {}", config.hub.endpoint);
        return Ok(Arc::new(
            SimulatedHub::new()
                .with_latency(Duration::from_millis(20))
                .ready_after_polls(1),
        ));
    }

    let client = HubClient::new(HttpConfig::from(&config.hub)).context("Failed to create hub client")?;
    debug!("Connected hub client to {}", client.endpoint());
    Ok(Arc::new(client))
}

fn finish_run(outcome: hubstress_core::Result<RunReport>, output: OutputFormat) -> Result<i32> {
    let report = match outcome {
        Ok(report) => report,
        Err(e) => return Ok(fatal(e)),
    };

    match output {
        OutputFormat::Text => print!("{}", report),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize run report")?
        ),
    }
    Ok(report.exit_code())
}

fn fatal(e: CoreError) -> i32 {
    error!("Run aborted: {}", e);
    eprintln!("Run aborted: {}", e);
    match e {
        CoreError::InvalidRun(_) => EXIT_FAILURES,
        CoreError::Allocation(_) | CoreError::IndexExhausted(_) => EXIT_FATAL,
    }
}

fn handle_config_command(command: &ConfigCommands) -> Result<i32> {
    match command {
        ConfigCommands::Validate { config_file } => {
            info!("Validating configuration file: {:?}", config_file);
            if !config_file.exists() {
                eprintln!("Configuration file not found: {:?}", config_file);
                return Ok(EXIT_FAILURES);
            }
            match ConfigLoader::new().from_file(config_file) {
                Ok(_) => {
                    println!("Configuration file is valid");
                    Ok(EXIT_OK)
                }
                Err(e) => {
                    println!("Configuration validation failed: {}", e);
                    error!("Configuration validation failed: {}", e);
                    Ok(EXIT_FAILURES)
                }
            }
        }
        ConfigCommands::Generate { output, force } => {
            let sample = HubStressConfig::generate_sample();
            let Some(output) = output else {
                print!("{}", sample);
                return Ok(EXIT_OK);
            };

            if output.exists() && !*force {
                return Err(anyhow::anyhow!(
                    "Output file already exists: {:?}. Use --force to overwrite.",
                    output
                ));
            }
            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).context("Failed to create output directory")?;
            }
            fs::write(output, sample)
                .with_context(|| format!("Failed to write configuration to {:?}", output))?;
            println!("Sample configuration written to {:?}", output);
            Ok(EXIT_OK)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_range() {
        assert_eq!(index_range(None, None), None);
        assert_eq!(index_range(Some(5), None), Some(5..=u64::MAX));
        assert_eq!(index_range(None, Some(9)), Some(0..=9));
        assert_eq!(index_range(Some(2), Some(3)), Some(2..=3));
    }

    #[test]
    fn test_verbose_sets_debug_unless_level_given() {
        let cli = Cli::parse_from(["hubstress", "-v", "status"]);
        assert_eq!(cli_log_level(&cli).as_deref(), Some("debug"));

        let cli = Cli::parse_from(["hubstress", "-v", "--log-level", "trace", "status"]);
        assert_eq!(cli_log_level(&cli).as_deref(), Some("trace"));
    }

    #[test]
    fn test_scale_up_flags_override_config() {
        let cli = Cli::parse_from([
            "hubstress",
            "scale-up",
            "--count",
            "3",
            "-b",
            "2",
            "--timeout",
            "45",
        ]);
        let mut config = HubStressConfig::default();
        if let Some(command) = &cli.command {
            apply_command_overrides(command, &mut config);
        }
        assert_eq!(config.run.count, 3);
        assert_eq!(config.run.concurrency, 2);
        assert_eq!(config.run.timeout, Duration::from_secs(45));
    }
}
