//! Configuration schema for hudson-maven
//!
//! Configuration is stored at `~/.config/hudson-maven/config.toml`

use crate::bridge::reporter::ReporterKind;
use crate::cache::{DEFAULT_CAPACITY, DEFAULT_MAX_AGE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Maven toolchain and build settings
    pub maven: MavenConfig,

    /// Worker process cache settings
    pub cache: CacheConfig,

    /// Support jars and agent layout
    pub agent: AgentConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,

    /// Where build records and module tables are kept
    pub state_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
            state_dir: None,
        }
    }
}

/// How worker processes are started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LauncherKind {
    /// This binary's `worker` subcommand driving `mvn`
    #[default]
    Native,
    /// A JVM running the classworlds launcher with the agent jars
    ///
    /// Only the command line is fixed here. The agent jar has to answer the
    /// same stdin/stdout frames as the native worker.
    Jvm,
}

/// Maven settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MavenConfig {
    /// Maven installation directory
    pub home: Option<PathBuf>,

    /// JDK to run Maven with; `java` from PATH when unset
    pub jdk_home: Option<PathBuf>,

    /// Options for the Maven JVM; falls back to `MAVEN_OPTS`
    pub opts: Option<String>,

    /// Goals and options passed to Maven
    pub goals: String,

    /// Root POM relative to the workspace
    pub root_pom: String,

    /// Run the JVM headless
    pub headless: bool,

    /// Port for a JDWP debugger to attach to the worker
    pub debug_port: Option<u16>,

    /// Use a repository private to the workspace
    pub private_repository: bool,

    /// Run all modules in one worker instead of scheduling the root module
    pub aggregator: bool,

    /// Reporters attached to every module
    pub reporters: Vec<ReporterKind>,

    /// Extra system properties for the build
    pub system_properties: BTreeMap<String, String>,

    /// How workers are launched
    pub launcher: LauncherKind,
}

impl Default for MavenConfig {
    fn default() -> Self {
        Self {
            home: None,
            jdk_home: None,
            opts: None,
            goals: "install".to_string(),
            root_pom: "pom.xml".to_string(),
            headless: false,
            debug_port: None,
            private_repository: false,
            aggregator: true,
            reporters: ReporterKind::ALL.to_vec(),
            system_properties: BTreeMap::new(),
            launcher: LauncherKind::Native,
        }
    }
}

/// Worker process cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Idle workers kept per node (0 disables reuse)
    pub capacity: usize,

    /// Reuses before a worker is retired
    pub max_age: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

/// Support jars injected into JVM workers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Jar holding the worker main class
    pub agent_jar: Option<PathBuf>,

    /// Remoting library jar
    pub remoting_jar: Option<PathBuf>,

    /// Plugin-manager interceptor jar
    pub interceptor_jar: Option<PathBuf>,

    /// Root directory of the agent; jars are copied here on remote nodes
    pub root: Option<PathBuf>,
}
