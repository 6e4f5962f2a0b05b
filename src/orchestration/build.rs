//! Module-set builds
//!
//! A [`ModuleSetBuild`] parses the POM tree of a workspace, reconciles the
//! module table and then either hands the root module to a [`Scheduler`] or,
//! aggregator style, runs the whole reactor in one worker and records a
//! [`ModuleBuild`] per module from the worker's events.

use crate::bridge::mojo::ExecutedMojo;
use crate::bridge::proxy::{BuildProxy, ProxyDispatcher};
use crate::cache::ProcessCache;
use crate::channel::{BuildRequest, Launcher};
use crate::config::Config;
use crate::error::{MavenError, MavenResult};
use crate::listener::{BuildListener, SplittableBuildListener};
use crate::module::{DependencyGraph, ModuleName, PomInfo};
use crate::orchestration::args::{expand, tokenize};
use crate::orchestration::launcher::{MavenInstallation, WorkerProcessLauncher};
use crate::orchestration::module_set::ModuleSet;
use crate::pom::PomParser;
use crate::result::BuildResult;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info};

const NO_INSTALLATION: &str = "A Maven installation needs to be available for this project to be built.\n\
Either your server has no Maven installations defined, or the requested Maven version does not exist.";

const DEFECT: &str =
    "Processing failed due to a bug in the code. Please report this to the issue tracker";

/// Where module builds go once the module set has been parsed
pub trait Scheduler: Send + Sync {
    /// Dependencies between modules changed
    fn rebuild_dependency_graph(&self, graph: DependencyGraph);

    /// Queue a build of `module`
    fn schedule_build(&self, module: &ModuleName, cause: &str);
}

/// Scheduler that only remembers what it was asked to do
#[derive(Debug, Default)]
pub struct QueueScheduler {
    graph: Mutex<Option<DependencyGraph>>,
    queue: Mutex<Vec<(ModuleName, String)>>,
}

impl QueueScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest dependency graph
    pub fn graph(&self) -> Option<DependencyGraph> {
        lock(&self.graph).clone()
    }

    /// Modules scheduled so far with their causes
    pub fn queued(&self) -> Vec<(ModuleName, String)> {
        lock(&self.queue).clone()
    }
}

impl Scheduler for QueueScheduler {
    fn rebuild_dependency_graph(&self, graph: DependencyGraph) {
        debug!("Dependency graph now has {} edge(s)", graph.edges().len());
        *lock(&self.graph) = Some(graph);
    }

    fn schedule_build(&self, module: &ModuleName, cause: &str) {
        info!("Scheduling {} ({})", module, cause);
        lock(&self.queue).push((module.clone(), cause.to_string()));
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared in-memory log of one module build
#[derive(Clone, Default)]
struct ModuleLog(Arc<Mutex<Vec<u8>>>);

impl Write for ModuleLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ModuleState {
    started: bool,
    result: Option<BuildResult>,
    mojos: Vec<ExecutedMojo>,
}

/// Controller-side record of one module's part in an aggregated build.
///
/// While the module is being built its log is attached as the side stream
/// of the module-set log.
pub struct ModuleBuild {
    name: ModuleName,
    number: u32,
    listener: Arc<SplittableBuildListener>,
    log: ModuleLog,
    state: Mutex<ModuleState>,
}

impl ModuleBuild {
    pub fn new(name: ModuleName, number: u32, listener: Arc<SplittableBuildListener>) -> Self {
        Self {
            name,
            number,
            listener,
            log: ModuleLog::default(),
            state: Mutex::new(ModuleState::default()),
        }
    }

    pub fn name(&self) -> &ModuleName {
        &self.name
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// Whether the worker ever started this module
    pub fn started(&self) -> bool {
        lock(&self.state).started
    }

    pub fn result(&self) -> Option<BuildResult> {
        lock(&self.state).result
    }

    /// Mark a module the worker never got to
    fn mark_not_built(&self) {
        let mut state = lock(&self.state);
        if !state.started {
            state.result = Some(BuildResult::NotBuilt);
        }
    }

    /// Snapshot of the finished module build
    pub fn outcome(&self) -> ModuleOutcome {
        let state = lock(&self.state);
        ModuleOutcome {
            name: self.name.clone(),
            number: self.number,
            result: state.result,
            mojos: state.mojos.clone(),
            log: lock(&self.log.0).clone(),
        }
    }
}

#[async_trait]
impl BuildProxy for ModuleBuild {
    async fn start(&self) -> MavenResult<()> {
        debug!("Module {} started", self.name);
        self.listener
            .set_side_output_stream(Some(Box::new(self.log.clone())))
            .map_err(|e| MavenError::io(format!("attaching the log of {}", self.name), e))?;
        lock(&self.state).started = true;
        Ok(())
    }

    async fn end(&self) -> MavenResult<()> {
        self.listener
            .set_side_output_stream(None)
            .map_err(|e| MavenError::io(format!("detaching the log of {}", self.name), e))?;
        let mut state = lock(&self.state);
        if state.result.is_none() {
            state.result = Some(BuildResult::Success);
        }
        debug!("Module {} ended with {:?}", self.name, state.result);
        Ok(())
    }

    async fn set_result(&self, result: BuildResult) -> MavenResult<()> {
        let mut state = lock(&self.state);
        state.result = Some(match state.result {
            Some(r) => r.combine(result),
            None => result,
        });
        Ok(())
    }

    async fn set_executed_mojos(&self, mojos: Vec<ExecutedMojo>) -> MavenResult<()> {
        lock(&self.state).mojos.extend(mojos);
        Ok(())
    }
}

/// What one module build produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOutcome {
    pub name: ModuleName,
    pub number: u32,
    pub result: Option<BuildResult>,
    pub mojos: Vec<ExecutedMojo>,
    /// The module's slice of the build log
    pub log: Vec<u8>,
}

/// What a module-set build produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    /// The module-set build's own result; unset when deferred to the
    /// scheduled root module build
    pub own: Option<BuildResult>,
    pub modules: Vec<ModuleOutcome>,
}

impl BuildSummary {
    /// Own result combined with the module results, worst wins
    pub fn result(&self) -> Option<BuildResult> {
        BuildResult::combine_modules(self.own, self.modules.iter().map(|m| m.result))
    }
}

/// Collaborators a module-set build runs with
pub struct BuildEnvironment<'a> {
    pub config: &'a Config,
    pub launcher: Arc<dyn Launcher>,
    pub cache: &'a ProcessCache,
    pub scheduler: &'a dyn Scheduler,
    pub installation: Option<Arc<MavenInstallation>>,
    /// Environment variables of the build on its node
    pub env: BTreeMap<String, String>,
}

/// One build of a module set
pub struct ModuleSetBuild<'a> {
    project: &'a ModuleSet,
    number: u32,
    workspace: PathBuf,
}

impl<'a> ModuleSetBuild<'a> {
    /// Build number `number` of `project` in `workspace`.
    ///
    /// A relative workspace is resolved against the current directory here,
    /// since the worker runs in a directory of its own.
    pub fn new(project: &'a ModuleSet, number: u32, workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        Self {
            project,
            number,
            workspace: std::path::absolute(&workspace).unwrap_or(workspace),
        }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// Run the build.
    ///
    /// Aborts, interruptions and IO failures end up as a FAILURE result with
    /// their cause in the build log. Defects are logged and returned.
    pub async fn run(
        &self,
        env: &BuildEnvironment<'_>,
        listener: Arc<dyn BuildListener>,
    ) -> MavenResult<BuildSummary> {
        let mut modules = Vec::new();
        let own = match self.do_run(env, &listener, &mut modules).await {
            Ok(result) => result,
            Err(e) if e.is_abort() => {
                if let Some(msg) = e.report_message() {
                    listener.error(&msg);
                }
                Some(BuildResult::Failure)
            }
            Err(e) if e.is_interrupted() => {
                listener.error("Aborted");
                Some(BuildResult::Failure)
            }
            Err(e) if e.is_defect() => {
                listener.logger().println(&format!(
                    "{}\nProject: {}\nBuild: #{}",
                    DEFECT,
                    self.project.name(),
                    self.number
                ));
                error!("Build #{} of {} failed: {}", self.number, self.project.name(), e);
                return Err(e);
            }
            Err(e) => {
                listener.error(&e.to_string());
                Some(BuildResult::Failure)
            }
        };

        let own = if listener.is_failed() {
            Some(own.map_or(BuildResult::Failure, |r| r.combine(BuildResult::Failure)))
        } else {
            own
        };
        Ok(BuildSummary { own, modules })
    }

    async fn do_run(
        &self,
        env: &BuildEnvironment<'_>,
        listener: &Arc<dyn BuildListener>,
        outcomes: &mut Vec<ModuleOutcome>,
    ) -> MavenResult<Option<BuildResult>> {
        let log = listener.logger();
        log.println("Parsing POMs");
        let installation = env
            .installation
            .clone()
            .ok_or_else(|| MavenError::Abort(NO_INSTALLATION.to_string()))?;

        let poms = self.parse(env.config, listener).await?;
        self.project
            .reconcile(&poms, self.number, &log, env.config.general.verbose)?;
        env.scheduler
            .rebuild_dependency_graph(DependencyGraph::build(&poms));

        if !env.config.maven.aggregator {
            let root = self
                .project
                .root_module()
                .ok_or_else(|| MavenError::Internal("no root module after reconciliation".to_string()))?;
            log.println(&format!("Triggering {}", root));
            env.scheduler
                .schedule_build(&root, &format!("{} #{}", self.project.name(), self.number));
            return Ok(None);
        }

        self.run_aggregated(env, listener, installation, outcomes)
            .await
            .map(Some)
    }

    /// Parse the POM tree on the blocking pool
    async fn parse(
        &self,
        config: &Config,
        listener: &Arc<dyn BuildListener>,
    ) -> MavenResult<Vec<PomInfo>> {
        let parser = PomParser::new(config.maven.root_pom.clone()).verbose(config.general.verbose);
        let workspace = self.workspace.clone();
        let task_listener = Arc::clone(listener);

        let parsed = tokio::task::spawn_blocking(move || parser.parse(&workspace, task_listener.as_ref()))
            .await
            .map_err(|e| {
                if e.is_cancelled() {
                    MavenError::Interrupted
                } else {
                    MavenError::Internal(format!("POM parser panicked: {}", e))
                }
            })?;

        match parsed {
            Err(e @ (MavenError::PomParse { .. } | MavenError::Io { .. })) => {
                listener.error("Failed to parse POMs");
                listener.logger().println(&e.to_string());
                Err(MavenError::AlreadyReported)
            }
            other => other,
        }
    }

    /// Run every active module in one worker
    async fn run_aggregated(
        &self,
        env: &BuildEnvironment<'_>,
        listener: &Arc<dyn BuildListener>,
        installation: Arc<MavenInstallation>,
        outcomes: &mut Vec<ModuleOutcome>,
    ) -> MavenResult<BuildResult> {
        let maven = &env.config.maven;
        let splitter = Arc::new(SplittableBuildListener::new(Arc::clone(listener)));

        let modules = self.project.active_modules();
        let builds: Vec<Arc<ModuleBuild>> = modules
            .iter()
            .map(|m| Arc::new(ModuleBuild::new(m.name.clone(), m.next_build_number, Arc::clone(&splitter))))
            .collect();
        let proxies: HashMap<ModuleName, Arc<dyn BuildProxy>> = builds
            .iter()
            .map(|b| (b.name().clone(), Arc::clone(b) as Arc<dyn BuildProxy>))
            .collect();

        let pom = PomParser::new(maven.root_pom.clone()).locate(&self.workspace)?;
        let base = tree_base(&pom, &maven.root_pom);
        let request = BuildRequest {
            work_dir: base.clone(),
            pom: PathBuf::from(&maven.root_pom),
            goals: tokenize(&expand(&maven.goals, &env.env)),
            system_properties: maven.system_properties.clone(),
            modules: modules.iter().map(|m| m.spec()).collect(),
            repository: maven
                .private_repository
                .then(|| self.workspace.join(".repository")),
        };

        let factory = WorkerProcessLauncher::new(
            Arc::clone(&env.launcher),
            env.config,
            Some(installation),
            env.env.clone(),
            self.project.name(),
        )
        .with_work_dir(&base);
        let process = env
            .cache
            .acquire(env.launcher.node(), splitter.as_ref(), &factory)
            .await?;

        let dispatcher = ProxyDispatcher::new(proxies).with_console(splitter.logger());
        let outcome = dispatcher
            .run_build(process.channel().as_ref(), request)
            .await;
        match &outcome {
            Ok(_) => env.cache.release(process).await,
            Err(_) => process.discard().await,
        }

        for build in &builds {
            build.mark_not_built();
            self.project
                .record_build(build.name(), build.number(), build.result());
            outcomes.push(build.outcome());
        }

        let outcome = outcome?;
        if outcome.mark_as_success {
            info!("Build of {} tolerated a Maven failure", self.project.name());
        }
        Ok(outcome.result)
    }
}

/// Directory the root POM path is relative to
fn tree_base(pom: &Path, root_pom: &str) -> PathBuf {
    let depth = Path::new(root_pom).components().count();
    pom.ancestors()
        .nth(depth)
        .map(Path::to_path_buf)
        .unwrap_or_default()
}
