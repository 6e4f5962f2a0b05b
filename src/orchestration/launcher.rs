//! Starting worker processes
//!
//! A worker is either this binary's `worker` subcommand driving the `mvn`
//! script ([`LauncherKind::Native`]) or a JVM running the classworlds
//! launcher with the agent jars on its classpath ([`LauncherKind::Jvm`]).
//! Either way the worker talks to the controller over its stdio.

use crate::cache::ProcessFactory;
use crate::channel::{Channel, Launcher};
use crate::config::schema::{AgentConfig, Config};
use crate::config::LauncherKind;
use crate::error::{MavenError, MavenResult};
use crate::listener::{BuildListener, LogStream, OutputRedirector};
use crate::orchestration::args::{expand, tokenize};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

/// Main class of the JVM worker agent
pub const AGENT_MAIN_CLASS: &str = "hudson.maven.agent.Main";

/// A Maven installation.
///
/// Installations are compared by identity when matching cached workers, so
/// callers share one `Arc` per configured installation.
#[derive(Debug, PartialEq, Eq)]
pub struct MavenInstallation {
    name: String,
    home: PathBuf,
}

impl MavenInstallation {
    pub fn new(name: impl Into<String>, home: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            home: home.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// The `mvn` launcher script
    pub fn mvn_script(&self) -> PathBuf {
        let script = if cfg!(windows) { "mvn.cmd" } else { "mvn" };
        self.home.join("bin").join(script)
    }

    /// Locate the classworlds launcher jar.
    ///
    /// Maven 3 keeps it in `boot/`, Maven 2 in `core/boot/`.
    pub async fn classworlds_jar(&self) -> MavenResult<PathBuf> {
        for dir in ["boot", "core/boot"] {
            let dir = self.home.join(dir);
            let Ok(mut entries) = fs::read_dir(&dir).await else {
                continue;
            };
            let mut found = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| MavenError::io(format!("listing {}", dir.display()), e))?
            {
                let name = entry.file_name().to_string_lossy().to_string();
                if is_classworlds_jar(&name) {
                    found.push(entry.path());
                }
            }
            found.sort();
            if let Some(jar) = found.pop() {
                debug!("Using launcher jar {}", jar.display());
                return Ok(jar);
            }
        }
        Err(MavenError::ClassWorldsNotFound {
            home: self.home.clone(),
        })
    }
}

fn is_classworlds_jar(name: &str) -> bool {
    let stem = name.strip_prefix("plexus-").unwrap_or(name);
    stem.starts_with("classworlds") && name.ends_with(".jar")
}

/// Options for the worker JVM.
///
/// Configured options win; otherwise the node's `MAVEN_OPTS` is used. The
/// headless flag is appended when requested and `$VAR` references are
/// expanded from `env`.
pub fn effective_options(
    configured: Option<&str>,
    env: &BTreeMap<String, String>,
    headless: bool,
) -> Option<String> {
    let mut opts = configured
        .filter(|o| !o.trim().is_empty())
        .map(str::to_string)
        .or_else(|| {
            env.get("MAVEN_OPTS")
                .filter(|o| !o.trim().is_empty())
                .cloned()
        });

    if headless {
        opts = Some(match opts {
            Some(o) => format!("{} -Djava.awt.headless=true", o),
            None => "-Djava.awt.headless=true".to_string(),
        });
    }

    opts.map(|o| expand(&o, env))
}

/// Copy `jar` into `root` as `<seed>.jar` unless the copy is newer
async fn copy_jar(log: &LogStream, root: &Path, jar: &Path, seed: &str) -> MavenResult<PathBuf> {
    let copied = root.join(format!("{}.jar", seed));

    let source_modified = fs::metadata(jar)
        .await
        .and_then(|m| m.modified())
        .map_err(|e| MavenError::io(format!("reading {}", jar.display()), e))?;
    if let Ok(copy_modified) = fs::metadata(&copied).await.and_then(|m| m.modified()) {
        if copy_modified > source_modified {
            log.println(&format!("{}.jar already up to date", seed));
            return Ok(copied);
        }
    }

    fs::create_dir_all(root)
        .await
        .map_err(|e| MavenError::io(format!("creating {}", root.display()), e))?;
    fs::copy(jar, &copied)
        .await
        .map_err(|e| MavenError::io(format!("copying {} to {}", jar.display(), copied.display()), e))?;
    log.println(&format!("Copied {}.jar", seed));
    Ok(copied)
}

/// Builds worker command lines and launches them through a [`Launcher`]
pub struct WorkerProcessLauncher {
    launcher: Arc<dyn Launcher>,
    kind: LauncherKind,
    installation: Option<Arc<MavenInstallation>>,
    jdk_home: Option<PathBuf>,
    options: Option<String>,
    debug_port: Option<u16>,
    agent: AgentConfig,
    env: BTreeMap<String, String>,
    work_dir: Option<PathBuf>,
    project: String,
}

impl WorkerProcessLauncher {
    /// Launcher for `project` configured from `config`.
    ///
    /// `env` is the build environment on the node; it supplies `MAVEN_OPTS`
    /// and is passed to the worker.
    pub fn new(
        launcher: Arc<dyn Launcher>,
        config: &Config,
        installation: Option<Arc<MavenInstallation>>,
        env: BTreeMap<String, String>,
        project: impl Into<String>,
    ) -> Self {
        let options = effective_options(config.maven.opts.as_deref(), &env, config.maven.headless);
        Self {
            launcher,
            kind: config.maven.launcher,
            installation,
            jdk_home: config.maven.jdk_home.clone(),
            options,
            debug_port: config.maven.debug_port,
            agent: config.agent.clone(),
            env,
            work_dir: None,
            project: project.into(),
        }
    }

    /// Start workers in `dir`
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    fn java(&self) -> String {
        match &self.jdk_home {
            Some(home) => home.join("bin").join("java").display().to_string(),
            None => "java".to_string(),
        }
    }

    /// Resolve a support jar for the current node, copying it to the agent root if needed
    async fn support_jar(
        &self,
        listener: &dyn BuildListener,
        jar: Option<&Path>,
        seed: &str,
    ) -> MavenResult<String> {
        let Some(jar) = jar else {
            listener.error(&format!("Failed to determine the location of {}.jar", seed));
            return Err(MavenError::AlreadyReported);
        };
        let node = self.launcher.node();
        let path = match node.root() {
            Some(root) if !node.is_controller() => {
                copy_jar(&listener.logger(), root, jar, seed).await?
            }
            _ => jar.to_path_buf(),
        };
        Ok(path.display().to_string())
    }

    /// Command line for a JVM worker
    async fn jvm_command_line(
        &self,
        listener: &dyn BuildListener,
        mvn: &MavenInstallation,
        classworlds: &Path,
    ) -> MavenResult<Vec<String>> {
        let mut args = vec![self.java()];

        if let Some(port) = self.debug_port {
            args.push(format!(
                "-Xrunjdwp:transport=dt_socket,server=y,address={}",
                port
            ));
        }
        if let Some(opts) = &self.options {
            args.extend(tokenize(opts));
        }

        let agent = self
            .support_jar(listener, self.agent.agent_jar.as_deref(), "maven-agent")
            .await?;
        let classpath = std::env::join_paths([Path::new(&agent), classworlds])
            .map_err(|e| MavenError::Launch(e.to_string()))?;
        args.push("-cp".to_string());
        args.push(classpath.to_string_lossy().to_string());
        args.push(AGENT_MAIN_CLASS.to_string());
        args.push(mvn.home().display().to_string());

        args.push(
            self.support_jar(listener, self.agent.remoting_jar.as_deref(), "remoting")
                .await?,
        );
        args.push(
            self.support_jar(
                listener,
                self.agent.interceptor_jar.as_deref(),
                "maven-interceptor",
            )
            .await?,
        );
        Ok(args)
    }

    /// Command line for a native worker
    fn native_command_line(&self, mvn: &MavenInstallation) -> MavenResult<Vec<String>> {
        let exe = std::env::current_exe()
            .map_err(|e| MavenError::io("locating the current executable", e))?;
        Ok(vec![
            exe.display().to_string(),
            "worker".to_string(),
            mvn.home().display().to_string(),
        ])
    }

    /// Full command line and environment for a new worker
    pub async fn command_line(
        &self,
        listener: &dyn BuildListener,
    ) -> MavenResult<(Vec<String>, BTreeMap<String, String>)> {
        let Some(mvn) = self.installation.as_deref() else {
            listener.error(&MavenError::MavenNotConfigured.to_string());
            return Err(MavenError::AlreadyReported);
        };
        let classworlds = match mvn.classworlds_jar().await {
            Ok(jar) => jar,
            Err(e @ MavenError::ClassWorldsNotFound { .. }) => {
                listener.error(&e.to_string());
                return Err(MavenError::AlreadyReported);
            }
            Err(e) => return Err(e),
        };

        let mut env = self.env.clone();
        let argv = match self.kind {
            LauncherKind::Jvm => self.jvm_command_line(listener, mvn, &classworlds).await?,
            LauncherKind::Native => {
                match &self.options {
                    Some(opts) => env.insert("MAVEN_OPTS".to_string(), opts.clone()),
                    None => env.remove("MAVEN_OPTS"),
                };
                if let Some(jdk) = &self.jdk_home {
                    env.insert("JAVA_HOME".to_string(), jdk.display().to_string());
                }
                self.native_command_line(mvn)?
            }
        };
        Ok((argv, env))
    }

    /// Turn a failed launch into a diagnosis when `java` itself is missing
    fn diagnose(&self, err: MavenError) -> MavenError {
        match err {
            MavenError::CommandFailed { command, source }
                if self.jdk_home.is_none()
                    && command == "java"
                    && (source.kind() == ErrorKind::NotFound
                        || source.to_string().contains("java: not found")) =>
            {
                MavenError::JavaNotFound {
                    project: self.project.clone(),
                    source,
                }
            }
            other => other,
        }
    }
}

#[async_trait]
impl ProcessFactory for WorkerProcessLauncher {
    fn options(&self) -> Option<&str> {
        self.options.as_deref()
    }

    fn installation(&self) -> Option<Arc<MavenInstallation>> {
        self.installation.clone()
    }

    async fn new_process(
        &self,
        listener: &dyn BuildListener,
        out: OutputRedirector,
    ) -> MavenResult<Arc<dyn Channel>> {
        let (argv, env) = self.command_line(listener).await?;
        info!(
            "Starting {:?} worker for {} on {}",
            self.kind,
            self.project,
            self.launcher.node().name()
        );
        self.launcher
            .launch_channel(&argv, out, self.work_dir.as_deref(), &env)
            .await
            .map_err(|e| self.diagnose(e))
    }
}
