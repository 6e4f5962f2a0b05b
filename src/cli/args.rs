//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// hudson-maven - out-of-process Maven builds
///
/// Parses Maven module sets, runs their builds in cached worker processes
/// and records per-module results.
#[derive(Parser, Debug)]
#[command(name = "hudson-maven")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "HUDSON_MAVEN_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse the POM tree of a workspace and show its modules
    Parse(ParseArgs),

    /// Build a module set
    Build(BuildArgs),

    /// Serve a controller over stdin/stdout
    #[command(hide = true)]
    Worker(WorkerArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the parse command
#[derive(Parser, Debug)]
pub struct ParseArgs {
    /// Workspace holding the module set (defaults to current directory)
    pub workspace: Option<PathBuf>,

    /// Root POM relative to the workspace
    #[arg(long)]
    pub root_pom: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Workspace holding the module set (defaults to current directory)
    pub workspace: Option<PathBuf>,

    /// Project name builds are recorded under (defaults to the workspace name)
    #[arg(short, long)]
    pub project: Option<String>,

    /// Root POM relative to the workspace
    #[arg(long)]
    pub root_pom: Option<String>,

    /// Maven installation to build with
    #[arg(long, env = "MAVEN_HOME")]
    pub maven_home: Option<PathBuf>,

    /// Goals and options passed to Maven
    #[arg(short, long)]
    pub goals: Option<String>,

    /// System property for the build (KEY=VALUE)
    #[arg(short = 'D', long = "define", value_parser = parse_property)]
    pub properties: Vec<(String, String)>,

    /// Schedule the root module instead of building all modules in one worker
    #[arg(long)]
    pub no_aggregator: bool,
}

/// Arguments for the worker command
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Maven installation the worker drives
    pub maven_home: PathBuf,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for the parse command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
}

/// Parse a system property in KEY=VALUE format
fn parse_property(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE format: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}
