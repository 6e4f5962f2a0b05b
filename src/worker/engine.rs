//! Build engine driving the `mvn` launcher script
//!
//! Maven is run in batch mode and its console is followed line by line.
//! Goal boundaries come from the execution banners Maven prints before
//! every goal:
//!
//! ```text
//! [INFO] --- maven-compiler-plugin:3.11.0:compile (default-compile) @ core ---
//! ```
//!
//! A goal ends when the next banner or project header shows up, or when
//! Maven exits. The goal in flight when Maven exits non-zero is the one that
//! failed.
//!
//! Every line is logged after the callbacks it causes, so a module's log
//! starts with its own banner. Lines between a project header and that
//! project's first banner are held until the module has started.

use crate::bridge::adapter::ExecutionListener;
use crate::bridge::mojo::{MojoInfo, ProjectRef};
use crate::channel::BuildRequest;
use crate::error::{MavenError, MavenResult};
use crate::listener::LogStream;
use crate::worker::BuildEngine;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// A goal execution as announced by its banner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub group_id: Option<String>,
    pub artifact_id: String,
    pub version: String,
    pub goal: String,
    pub execution_id: Option<String>,
    /// artifactId of the module the goal runs for
    pub module: String,
}

fn strip_level(line: &str) -> &str {
    line.strip_prefix("[INFO] ").unwrap_or(line).trim()
}

/// Parse an execution banner line
pub fn parse_banner(line: &str) -> Option<Banner> {
    let body = strip_level(line)
        .strip_prefix("--- ")?
        .strip_suffix(" ---")?;
    let (mojo, module) = body.rsplit_once(" @ ")?;
    let (coords, execution_id) = match mojo.split_once(" (") {
        Some((coords, exec)) => (coords, Some(exec.trim_end_matches(')').to_string())),
        None => (mojo, None),
    };

    let parts: Vec<&str> = coords.split(':').collect();
    let (group_id, artifact_id, version, goal) = match parts.as_slice() {
        [a, v, g] => (None, *a, *v, *g),
        [gr, a, v, g] => (Some(gr.to_string()), *a, *v, *g),
        _ => return None,
    };

    Some(Banner {
        group_id,
        artifact_id: artifact_id.to_string(),
        version: version.to_string(),
        goal: goal.to_string(),
        execution_id,
        module: module.trim().to_string(),
    })
}

/// Parse a project header line: `----< org.example:core >----`
pub fn parse_project_header(line: &str) -> Option<(String, String)> {
    let body = strip_level(line);
    let start = body.find("< ")?;
    let end = body.rfind(" >")?;
    if !body.starts_with('-') || end <= start {
        return None;
    }
    let (group, artifact) = body[start + 2..end].split_once(':')?;
    Some((group.to_string(), artifact.to_string()))
}

/// What a console line meant to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Header,
    Banner,
    Other,
}

/// Follows Maven's console and raises goal callbacks
struct GoalTracker<'a> {
    projects: HashMap<String, ProjectRef>,
    repository: Option<PathBuf>,
    current: Option<(ProjectRef, MojoInfo)>,
    last_error: Option<String>,
    listener: &'a mut dyn ExecutionListener,
}

impl<'a> GoalTracker<'a> {
    fn new(request: &BuildRequest, listener: &'a mut dyn ExecutionListener) -> Self {
        let projects = request
            .modules
            .iter()
            .map(|m| (m.name.artifact_id.clone(), m.project(&request.work_dir)))
            .collect();
        let repository = request.repository.clone().or_else(default_repository);
        Self {
            projects,
            repository,
            current: None,
            last_error: None,
            listener,
        }
    }

    fn mojo(&self, banner: Banner) -> MojoInfo {
        let mut mojo = MojoInfo {
            group_id: banner.group_id,
            artifact_id: banner.artifact_id,
            version: banner.version,
            goal: banner.goal,
            execution_id: banner.execution_id,
            plugin_jar: None,
        };
        if let Some(repo) = &self.repository {
            let jar = mojo.jar_in_repository(repo);
            if jar.is_file() {
                mojo.plugin_jar = Some(jar);
            }
        }
        mojo
    }

    async fn finish_current(&mut self, error: Option<&str>) -> MavenResult<()> {
        if let Some((project, mojo)) = self.current.take() {
            self.listener.post_execute(&project, &mojo, error).await?;
        }
        Ok(())
    }

    async fn on_line(&mut self, line: &str) -> MavenResult<LineKind> {
        if let Some(message) = line.strip_prefix("[ERROR] ") {
            if self.last_error.is_none() && !message.trim().is_empty() {
                self.last_error = Some(message.trim().to_string());
            }
            return Ok(LineKind::Other);
        }

        if parse_project_header(line).is_some() {
            self.finish_current(None).await?;
            self.listener.end_module().await?;
            return Ok(LineKind::Header);
        }

        let Some(banner) = parse_banner(line) else {
            return Ok(LineKind::Other);
        };
        self.finish_current(None).await?;

        let Some(project) = self.projects.get(&banner.module).cloned() else {
            debug!("Goal for module {} outside this build", banner.module);
            return Ok(LineKind::Banner);
        };
        let mojo = self.mojo(banner);
        self.listener.pre_execute(&project, &mojo).await?;
        self.current = Some((project, mojo));
        Ok(LineKind::Banner)
    }

    async fn on_exit(&mut self, code: i32) -> MavenResult<()> {
        if code == 0 {
            return self.finish_current(None).await;
        }
        let error = self
            .last_error
            .clone()
            .unwrap_or_else(|| format!("Maven exited with code {}", code));
        self.finish_current(Some(&error)).await
    }
}

/// Console lines on their way to the build log
#[derive(Default)]
struct HeldLines(Option<Vec<String>>);

impl HeldLines {
    /// Log `line` now, or keep it while a header is being held
    fn push(&mut self, log: &LogStream, line: String) {
        match &mut self.0 {
            Some(held) => held.push(line),
            None => log.println(&line),
        }
    }

    /// Start holding from a project header
    fn hold(&mut self, log: &LogStream, header: String) {
        self.release(log);
        self.0 = Some(vec![header]);
    }

    fn release(&mut self, log: &LogStream) {
        for line in self.0.take().into_iter().flatten() {
            log.println(&line);
        }
    }
}

fn default_repository() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".m2").join("repository"))
}

/// Runs the `mvn` script of a Maven installation
pub struct ConsoleEngine {
    maven_home: PathBuf,
}

impl ConsoleEngine {
    pub fn new(maven_home: impl Into<PathBuf>) -> Self {
        Self {
            maven_home: maven_home.into(),
        }
    }

    fn script(&self) -> PathBuf {
        let script = if cfg!(windows) { "mvn.cmd" } else { "mvn" };
        self.maven_home.join("bin").join(script)
    }

    /// Arguments passed to `mvn` for `request`
    pub fn arguments(request: &BuildRequest) -> Vec<String> {
        let mut args = vec![
            "-B".to_string(),
            "-f".to_string(),
            pom_path(&request.work_dir, &request.pom).display().to_string(),
        ];
        if let Some(repo) = &request.repository {
            args.push(format!("-Dmaven.repo.local={}", repo.display()));
        }
        for (key, value) in &request.system_properties {
            args.push(format!("-D{}={}", key, value));
        }
        args.extend(request.goals.iter().cloned());
        args
    }
}

fn pom_path(work_dir: &Path, pom: &Path) -> PathBuf {
    if pom.is_absolute() {
        pom.to_path_buf()
    } else {
        work_dir.join(pom)
    }
}

#[async_trait]
impl BuildEngine for ConsoleEngine {
    async fn launch(
        &mut self,
        request: &BuildRequest,
        listener: &mut dyn ExecutionListener,
        log: &LogStream,
    ) -> MavenResult<i32> {
        let script = self.script();
        let args = Self::arguments(request);
        info!("Running {} {}", script.display(), args.join(" "));

        let mut child = Command::new(&script)
            .args(&args)
            .current_dir(&request.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MavenError::command_failed(script.display().to_string(), e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MavenError::Launch("mvn stdout is not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MavenError::Launch("mvn stderr is not piped".to_string()))?;
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let mut stdout_done = false;
        let mut stderr_done = false;

        listener.pre_build().await?;
        let mut tracker = GoalTracker::new(request, listener);
        let mut held = HeldLines::default();

        loop {
            let line = tokio::select! {
                line = stdout.next_line(), if !stdout_done => match line {
                    Ok(Some(line)) => Some((line, true)),
                    _ => {
                        stdout_done = true;
                        None
                    }
                },
                line = stderr.next_line(), if !stderr_done => match line {
                    Ok(Some(line)) => Some((line, false)),
                    _ => {
                        stderr_done = true;
                        None
                    }
                },
                else => break,
            };
            let Some((line, from_stdout)) = line else {
                continue;
            };
            let kind = if from_stdout {
                tracker.on_line(&line).await?
            } else {
                LineKind::Other
            };
            match kind {
                LineKind::Header => held.hold(log, line),
                LineKind::Banner => {
                    held.release(log);
                    log.println(&line);
                }
                LineKind::Other => held.push(log, line),
            }
        }
        held.release(log);

        let status = child
            .wait()
            .await
            .map_err(|e| MavenError::io("waiting for mvn", e))?;
        let code = status.code().unwrap_or(-1);
        debug!("mvn exited with {}", code);

        tracker.on_exit(code).await?;
        tracker.listener.post_build().await?;
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ModuleSpec;
    use crate::module::ModuleName;

    #[test]
    fn parses_execution_banners() {
        let b = parse_banner(
            "[INFO] --- maven-compiler-plugin:3.11.0:compile (default-compile) @ core ---",
        )
        .unwrap();
        assert_eq!(b.artifact_id, "maven-compiler-plugin");
        assert_eq!(b.version, "3.11.0");
        assert_eq!(b.goal, "compile");
        assert_eq!(b.execution_id.as_deref(), Some("default-compile"));
        assert_eq!(b.module, "core");

        let b = parse_banner("--- org.example:tool-plugin:1.0:run @ app ---").unwrap();
        assert_eq!(b.group_id.as_deref(), Some("org.example"));
        assert_eq!(b.execution_id, None);

        assert!(parse_banner("[INFO] BUILD SUCCESS").is_none());
        assert!(parse_banner("--- not a banner ---").is_none());
    }

    #[test]
    fn parses_project_headers() {
        assert_eq!(
            parse_project_header("[INFO] ----------------------< org.example:core >-----------------------"),
            Some(("org.example".to_string(), "core".to_string()))
        );
        assert_eq!(parse_project_header("[INFO] Building core 1.0"), None);
    }

    #[test]
    fn arguments_put_properties_before_goals() {
        let mut request = BuildRequest {
            work_dir: PathBuf::from("/ws"),
            pom: PathBuf::from("pom.xml"),
            goals: vec!["clean".to_string(), "install".to_string()],
            system_properties: Default::default(),
            modules: vec![],
            repository: Some(PathBuf::from("/ws/.repository")),
        };
        request
            .system_properties
            .insert("skipTests".to_string(), "true".to_string());

        assert_eq!(
            ConsoleEngine::arguments(&request),
            vec![
                "-B",
                "-f",
                "/ws/pom.xml",
                "-Dmaven.repo.local=/ws/.repository",
                "-DskipTests=true",
                "clean",
                "install"
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn drives_listener_from_console_output() {
        use crate::bridge::adapter::tests::Trace;
        use crate::bridge::adapter::Adapter;
        use crate::listener::MemoryLog;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("maven").join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let script = bin.join("mvn");
        std::fs::write(
            &script,
            r#"#!/bin/sh
echo "[INFO] ------------------< org.example:core >------------------"
echo "[INFO] --- maven-resources-plugin:3.3.1:resources (default-resources) @ core ---"
echo "[INFO] --- maven-compiler-plugin:3.11.0:compile (default-compile) @ core ---"
echo "[INFO] ------------------< org.example:app >-------------------"
echo "[INFO] --- maven-compiler-plugin:3.11.0:compile (default-compile) @ app ---"
echo "[ERROR] COMPILATION ERROR"
echo "warning on stderr" >&2
exit 1
"#,
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let spec = |artifact: &str| ModuleSpec {
            name: ModuleName::new("org.example", artifact),
            version: "1.0".to_string(),
            relative_path: artifact.to_string(),
            reporters: vec![],
        };
        let request = BuildRequest {
            work_dir: temp.path().to_path_buf(),
            pom: PathBuf::from("pom.xml"),
            goals: vec!["install".to_string()],
            system_properties: Default::default(),
            modules: vec![spec("core"), spec("app")],
            repository: Some(temp.path().join("repo")),
        };

        let mut engine = ConsoleEngine::new(temp.path().join("maven"));
        let mut adapter = Adapter::new(Trace::default());
        let log = MemoryLog::default();
        let code = engine
            .launch(&request, &mut adapter, &log.stream())
            .await
            .unwrap();

        assert_eq!(code, 1);
        assert_eq!(
            adapter.into_inner().0,
            vec![
                "pre_build",
                "enter core",
                "pre resources",
                "post resources",
                "pre compile",
                "post compile",
                "leave core",
                "enter app",
                "pre compile",
                "post compile",
                "leave app",
                "post_build",
            ]
        );
        assert!(log.contents().contains("warning on stderr"));
    }

    /// Lifecycle listener that marks module boundaries in the build log
    #[cfg(unix)]
    struct Boundaries(LogStream);

    #[cfg(unix)]
    #[async_trait]
    impl crate::bridge::adapter::LifecycleListener for Boundaries {
        async fn pre_build(&mut self) -> MavenResult<()> {
            Ok(())
        }

        async fn pre_module(&mut self, project: &ProjectRef) -> MavenResult<()> {
            self.0.println(&format!(">> {}", project.name.artifact_id));
            Ok(())
        }

        async fn post_module(&mut self, project: &ProjectRef) -> MavenResult<()> {
            self.0.println(&format!("<< {}", project.name.artifact_id));
            Ok(())
        }

        async fn pre_execute(&mut self, _project: &ProjectRef, _mojo: &MojoInfo) -> MavenResult<()> {
            Ok(())
        }

        async fn post_execute(
            &mut self,
            _project: &ProjectRef,
            _mojo: &MojoInfo,
            _error: Option<&str>,
        ) -> MavenResult<()> {
            Ok(())
        }

        async fn post_build(&mut self) -> MavenResult<()> {
            Ok(())
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn module_output_is_logged_inside_its_module() {
        use crate::bridge::adapter::Adapter;
        use crate::listener::MemoryLog;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("maven").join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let script = bin.join("mvn");
        std::fs::write(
            &script,
            r#"#!/bin/sh
echo "[INFO] Scanning for projects..."
echo "[INFO] ------------------< org.example:core >------------------"
echo "[INFO] Building core 1.0"
echo "[INFO] --- maven-compiler-plugin:3.11.0:compile (default-compile) @ core ---"
echo "compiling core sources"
echo "[INFO] ------------------< org.example:app >-------------------"
echo "[INFO] Building app 1.0"
echo "[INFO] --- maven-compiler-plugin:3.11.0:compile (default-compile) @ app ---"
echo "compiling app sources"
echo "[INFO] BUILD SUCCESS"
"#,
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let spec = |artifact: &str| ModuleSpec {
            name: ModuleName::new("org.example", artifact),
            version: "1.0".to_string(),
            relative_path: artifact.to_string(),
            reporters: vec![],
        };
        let request = BuildRequest {
            work_dir: temp.path().to_path_buf(),
            pom: PathBuf::from("pom.xml"),
            goals: vec!["install".to_string()],
            system_properties: Default::default(),
            modules: vec![spec("core"), spec("app")],
            repository: Some(temp.path().join("repo")),
        };

        let log = MemoryLog::default();
        let mut engine = ConsoleEngine::new(temp.path().join("maven"));
        let mut adapter = Adapter::new(Boundaries(log.stream()));
        let code = engine
            .launch(&request, &mut adapter, &log.stream())
            .await
            .unwrap();
        assert_eq!(code, 0);

        let lines: Vec<String> = log.contents().lines().map(str::to_string).collect();
        assert_eq!(
            lines,
            vec![
                "[INFO] Scanning for projects...",
                ">> core",
                "[INFO] ------------------< org.example:core >------------------",
                "[INFO] Building core 1.0",
                "[INFO] --- maven-compiler-plugin:3.11.0:compile (default-compile) @ core ---",
                "compiling core sources",
                "<< core",
                ">> app",
                "[INFO] ------------------< org.example:app >-------------------",
                "[INFO] Building app 1.0",
                "[INFO] --- maven-compiler-plugin:3.11.0:compile (default-compile) @ app ---",
                "compiling app sources",
                "[INFO] BUILD SUCCESS",
                "<< app",
            ]
        );
    }
}
