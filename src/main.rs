//! hudson-maven - out-of-process Maven builds
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use hudson_maven::cli::{Cli, Commands};
use hudson_maven::config::ConfigManager;
use hudson_maven::error::MavenResult;
use hudson_maven::result::BuildResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            if let Some(msg) = e.report_message() {
                eprintln!("{} {}", style("Error:").red().bold(), msg);
            }
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// Initialize diagnostics on stderr: 0 = warn, 1 = info, 2+ = debug.
///
/// Stdout is left alone; in a worker it carries protocol frames.
fn init_tracing(verbose: u8, json: bool) {
    let filter = match verbose {
        0 => EnvFilter::new("hudson_maven=warn"),
        1 => EnvFilter::new("hudson_maven=info"),
        _ => EnvFilter::new("hudson_maven=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run() -> MavenResult<ExitCode> {
    let cli = Cli::parse();

    // Workers are started by a controller and don't read configuration
    if let Commands::Worker(args) = cli.command {
        init_tracing(cli.verbose, false);
        hudson_maven::cli::commands::worker(args).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    let verbose = if config.general.verbose {
        cli.verbose.max(1)
    } else {
        cli.verbose
    };
    init_tracing(verbose, config.general.log_format == "json");

    match cli.command {
        Commands::Worker(_) => unreachable!("Worker handled above"),
        Commands::Parse(args) => hudson_maven::cli::commands::parse(args, &config).await?,
        Commands::Config(args) => {
            hudson_maven::cli::commands::config(args, &config_manager, &config).await?
        }
        Commands::Build(args) => {
            let result = hudson_maven::cli::commands::build(args, &config).await?;
            if matches!(
                result,
                Some(BuildResult::Failure | BuildResult::Aborted)
            ) {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
