//! Worker-side driver of a module-set build
//!
//! [`ModuleSetBuilder`] receives the module-level lifecycle from the
//! [`Adapter`] and turns it into reporter callbacks and build-proxy updates
//! for each module. [`MavenBuilder`] runs the build engine around it.

use crate::bridge::adapter::{Adapter, LifecycleListener};
use crate::bridge::mojo::{ExecutedMojo, MojoInfo, ProjectRef};
use crate::bridge::proxy::BuildProxy;
use crate::bridge::reporter::{MavenReporter, ModuleContext};
use crate::channel::protocol::{BuildRequest, WorkerOutcome};
use crate::error::{MavenError, MavenResult};
use crate::listener::LogStream;
use crate::module::ModuleName;
use crate::result::BuildResult;
use crate::worker::BuildEngine;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// One module of the build with its proxy and reporters
pub struct ModuleSlot {
    pub project: ProjectRef,
    pub proxy: Arc<dyn BuildProxy>,
    pub reporters: Vec<Box<dyn MavenReporter>>,
    executed: Vec<ExecutedMojo>,
}

impl ModuleSlot {
    pub fn new(
        project: ProjectRef,
        proxy: Arc<dyn BuildProxy>,
        reporters: Vec<Box<dyn MavenReporter>>,
    ) -> Self {
        Self {
            project,
            proxy,
            reporters,
            executed: Vec::new(),
        }
    }
}

#[derive(Clone, Copy)]
enum Phase<'a> {
    PreBuild,
    Enter,
    Leave,
    PreExecute(&'a MojoInfo),
    PostExecute(&'a MojoInfo, Option<&'a str>),
    PostBuild,
}

/// Deliver `phase` to every reporter of `slot` in registration order
async fn notify(slot: &mut ModuleSlot, log: &LogStream, phase: Phase<'_>) -> MavenResult<()> {
    let ModuleSlot {
        project,
        proxy,
        reporters,
        ..
    } = slot;
    let ctx = ModuleContext {
        proxy: proxy.as_ref(),
        project,
        log,
    };
    for reporter in reporters.iter_mut() {
        let proceed = match phase {
            Phase::PreBuild => reporter.pre_build(&ctx).await?,
            Phase::Enter => reporter.enter_module(&ctx).await?,
            Phase::Leave => reporter.leave_module(&ctx).await?,
            Phase::PreExecute(mojo) => reporter.pre_execute(&ctx, mojo).await?,
            Phase::PostExecute(mojo, error) => reporter.post_execute(&ctx, mojo, error).await?,
            Phase::PostBuild => reporter.post_build(&ctx).await?,
        };
        if !proceed {
            return Err(MavenError::ReporterAborted {
                reporter: reporter.name().to_string(),
            });
        }
    }
    Ok(())
}

fn slot_mut<'a>(
    modules: &'a mut BTreeMap<ModuleName, ModuleSlot>,
    name: &ModuleName,
) -> MavenResult<&'a mut ModuleSlot> {
    modules
        .get_mut(name)
        .ok_or_else(|| MavenError::UnknownModule(name.to_string()))
}

/// Aggregator-style builder: one build-tool run covering many modules
pub struct ModuleSetBuilder {
    log: LogStream,
    modules: BTreeMap<ModuleName, ModuleSlot>,
    mojo_started: Option<Instant>,
}

impl ModuleSetBuilder {
    pub fn new(log: LogStream, slots: impl IntoIterator<Item = ModuleSlot>) -> Self {
        let modules = slots
            .into_iter()
            .map(|s| (s.project.name.clone(), s))
            .collect();
        Self {
            log,
            modules,
            mojo_started: None,
        }
    }

    /// Whether any reporter asked for a failed run to count as a success
    pub fn marks_as_success(&self) -> bool {
        self.modules
            .values()
            .flat_map(|s| s.reporters.iter())
            .any(|r| r.marks_as_success())
    }

    fn flush_log(&self) {
        let mut log = self.log.clone();
        if let Err(e) = log.flush() {
            warn!("Failed to flush build log: {}", e);
        }
    }
}

#[async_trait]
impl LifecycleListener for ModuleSetBuilder {
    async fn pre_build(&mut self) -> MavenResult<()> {
        for slot in self.modules.values_mut() {
            notify(slot, &self.log, Phase::PreBuild).await?;
        }
        Ok(())
    }

    async fn pre_module(&mut self, project: &ProjectRef) -> MavenResult<()> {
        self.flush_log();
        let slot = slot_mut(&mut self.modules, &project.name)?;
        slot.proxy.start().await?;
        notify(slot, &self.log, Phase::Enter).await
    }

    async fn post_module(&mut self, project: &ProjectRef) -> MavenResult<()> {
        let slot = slot_mut(&mut self.modules, &project.name)?;
        notify(slot, &self.log, Phase::Leave).await?;
        let executed = std::mem::take(&mut slot.executed);
        slot.proxy.set_executed_mojos(executed).await?;
        let proxy = Arc::clone(&slot.proxy);
        self.flush_log();
        proxy.end().await
    }

    async fn pre_execute(&mut self, project: &ProjectRef, mojo: &MojoInfo) -> MavenResult<()> {
        let slot = slot_mut(&mut self.modules, &project.name)?;
        notify(slot, &self.log, Phase::PreExecute(mojo)).await?;
        self.mojo_started = Some(Instant::now());
        Ok(())
    }

    async fn post_execute(
        &mut self,
        project: &ProjectRef,
        mojo: &MojoInfo,
        error: Option<&str>,
    ) -> MavenResult<()> {
        let duration_ms = self
            .mojo_started
            .take()
            .map_or(0, |t| t.elapsed().as_millis() as u64);
        let slot = slot_mut(&mut self.modules, &project.name)?;
        slot.executed.push(ExecutedMojo::new(mojo, duration_ms));

        notify(slot, &self.log, Phase::PostExecute(mojo, error)).await?;
        if error.is_some() {
            slot.proxy.set_result(BuildResult::Failure).await?;
        }
        Ok(())
    }

    async fn post_build(&mut self) -> MavenResult<()> {
        for slot in self.modules.values_mut() {
            notify(slot, &self.log, Phase::PostBuild).await?;
        }
        Ok(())
    }
}

/// Runs the build engine once with a [`ModuleSetBuilder`] attached
pub struct MavenBuilder<'a> {
    request: &'a BuildRequest,
    log: LogStream,
}

impl<'a> MavenBuilder<'a> {
    pub fn new(request: &'a BuildRequest, log: LogStream) -> Self {
        Self { request, log }
    }

    /// Run the build and map the tool's exit status to a result.
    ///
    /// A non-zero exit still yields SUCCESS when a reporter tolerated the
    /// failure; the outcome then carries `mark_as_success`.
    pub async fn call(
        self,
        engine: &mut dyn BuildEngine,
        builder: ModuleSetBuilder,
    ) -> MavenResult<WorkerOutcome> {
        if let Some(key) = self.request.system_properties.keys().find(|k| k.trim().is_empty()) {
            return Err(MavenError::Abort(format!(
                "System property {:?} has an empty name",
                key
            )));
        }

        self.log.println(&format_goals(&self.request.goals));
        let mut adapter = Adapter::new(builder);
        let exit = engine.launch(self.request, &mut adapter, &self.log).await?;

        let overhead_ms = adapter.overhead().as_millis() as u64;
        debug!("Total overhead was {}ms", overhead_ms);
        let mark_as_success = adapter.listener().marks_as_success();

        let result = if exit == 0 {
            BuildResult::Success
        } else if mark_as_success {
            self.log
                .println("Maven failed with error, but the failure was tolerated by a reporter");
            BuildResult::Success
        } else {
            BuildResult::Failure
        };

        Ok(WorkerOutcome {
            result,
            mark_as_success: mark_as_success && exit != 0,
            overhead_ms,
        })
    }
}

fn format_goals(goals: &[String]) -> String {
    let mut buf = String::from("Executing Maven: ");
    for goal in goals {
        buf.push(' ');
        buf.push_str(goal);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::adapter::tests::{mojo, project};
    use crate::bridge::adapter::ExecutionListener;
    use crate::bridge::proxy::tests::RecordingProxy;
    use crate::listener::MemoryLog;
    use std::sync::Mutex;

    /// Reporter that logs its callbacks into a shared trace
    struct TraceReporter {
        name: String,
        trace: Arc<Mutex<Vec<String>>>,
        veto_goal: Option<String>,
        tolerate: bool,
    }

    impl TraceReporter {
        fn boxed(trace: &Arc<Mutex<Vec<String>>>) -> Box<dyn MavenReporter> {
            Box::new(Self {
                name: "Trace".to_string(),
                trace: trace.clone(),
                veto_goal: None,
                tolerate: false,
            })
        }

        fn push(&self, entry: String) {
            self.trace.lock().unwrap().push(entry);
        }
    }

    #[async_trait]
    impl MavenReporter for TraceReporter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn enter_module(&mut self, ctx: &ModuleContext<'_>) -> MavenResult<bool> {
            self.push(format!("enter {}", ctx.project.name.artifact_id));
            Ok(true)
        }

        async fn leave_module(&mut self, ctx: &ModuleContext<'_>) -> MavenResult<bool> {
            self.push(format!("leave {}", ctx.project.name.artifact_id));
            Ok(true)
        }

        async fn pre_execute(&mut self, _ctx: &ModuleContext<'_>, mojo: &MojoInfo) -> MavenResult<bool> {
            Ok(self.veto_goal.as_deref() != Some(mojo.goal.as_str()))
        }

        async fn post_execute(
            &mut self,
            ctx: &ModuleContext<'_>,
            mojo: &MojoInfo,
            _error: Option<&str>,
        ) -> MavenResult<bool> {
            self.push(format!("execute {} {}", ctx.project.name.artifact_id, mojo.goal));
            Ok(true)
        }

        fn marks_as_success(&self) -> bool {
            self.tolerate
        }
    }

    /// Engine replaying a fixed list of (project, goal, failed) steps
    struct ScriptedEngine {
        steps: Vec<(ProjectRef, &'static str, bool)>,
        exit: i32,
    }

    #[async_trait]
    impl BuildEngine for ScriptedEngine {
        async fn launch(
            &mut self,
            _request: &BuildRequest,
            listener: &mut dyn ExecutionListener,
            _log: &LogStream,
        ) -> MavenResult<i32> {
            listener.pre_build().await?;
            for (project, goal, failed) in &self.steps {
                let m = mojo(goal);
                listener.pre_execute(project, &m).await?;
                let error = failed.then_some("goal failed");
                listener.post_execute(project, &m, error).await?;
            }
            listener.post_build().await?;
            Ok(self.exit)
        }
    }

    fn request() -> BuildRequest {
        BuildRequest {
            work_dir: ".".into(),
            pom: "pom.xml".into(),
            goals: vec!["clean".to_string(), "install".to_string()],
            system_properties: Default::default(),
            modules: vec![],
            repository: None,
        }
    }

    fn slots(
        names: &[&str],
        trace: &Arc<Mutex<Vec<String>>>,
    ) -> (Vec<ModuleSlot>, BTreeMap<String, Arc<RecordingProxy>>) {
        let mut proxies = BTreeMap::new();
        let slots = names
            .iter()
            .map(|n| {
                let proxy = Arc::new(RecordingProxy::default());
                proxies.insert(n.to_string(), proxy.clone());
                ModuleSlot::new(project(n), proxy, vec![TraceReporter::boxed(trace)])
            })
            .collect();
        (slots, proxies)
    }

    #[tokio::test]
    async fn reporters_see_bracketed_modules() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let (slots, proxies) = slots(&["a", "b"], &trace);
        let log = MemoryLog::default();
        let builder = ModuleSetBuilder::new(log.stream(), slots);

        let (a, b) = (project("a"), project("b"));
        let mut engine = ScriptedEngine {
            steps: vec![
                (a.clone(), "compile", false),
                (a.clone(), "test", false),
                (b, "compile", false),
                (a, "install", false),
            ],
            exit: 0,
        };

        let req = request();
        let outcome = MavenBuilder::new(&req, log.stream())
            .call(&mut engine, builder)
            .await
            .unwrap();

        assert_eq!(outcome.result, BuildResult::Success);
        assert!(!outcome.mark_as_success);
        assert_eq!(
            *trace.lock().unwrap(),
            vec![
                "enter a",
                "execute a compile",
                "execute a test",
                "leave a",
                "enter b",
                "execute b compile",
                "leave b",
                "enter a",
                "execute a install",
                "leave a",
            ]
        );
        assert_eq!(
            *proxies["a"].calls.lock().unwrap(),
            vec!["start", "mojos 2", "end", "start", "mojos 1", "end"]
        );
        assert!(log.contents().starts_with("Executing Maven:  clean install\n"));
    }

    #[tokio::test]
    async fn failed_goal_marks_module_failure() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let (slots, proxies) = slots(&["a"], &trace);
        let builder = ModuleSetBuilder::new(LogStream::null(), slots);
        let mut engine = ScriptedEngine {
            steps: vec![(project("a"), "compile", true)],
            exit: 1,
        };

        let req = request();
        let outcome = MavenBuilder::new(&req, LogStream::null())
            .call(&mut engine, builder)
            .await
            .unwrap();

        assert_eq!(outcome.result, BuildResult::Failure);
        assert_eq!(
            *proxies["a"].calls.lock().unwrap(),
            vec!["start", "result FAILURE", "mojos 1", "end"]
        );
    }

    #[tokio::test]
    async fn tolerated_failure_counts_as_success() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let proxy = Arc::new(RecordingProxy::default());
        let reporter = Box::new(TraceReporter {
            name: "Tolerant".to_string(),
            trace: trace.clone(),
            veto_goal: None,
            tolerate: true,
        });
        let builder = ModuleSetBuilder::new(
            LogStream::null(),
            [ModuleSlot::new(project("a"), proxy, vec![reporter])],
        );
        let mut engine = ScriptedEngine {
            steps: vec![(project("a"), "test", true)],
            exit: 1,
        };

        let req = request();
        let outcome = MavenBuilder::new(&req, LogStream::null())
            .call(&mut engine, builder)
            .await
            .unwrap();
        assert_eq!(outcome.result, BuildResult::Success);
        assert!(outcome.mark_as_success);
    }

    #[tokio::test]
    async fn vetoing_reporter_aborts_with_its_name() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let reporter = Box::new(TraceReporter {
            name: "Gatekeeper".to_string(),
            trace: trace.clone(),
            veto_goal: Some("deploy".to_string()),
            tolerate: false,
        });
        let builder = ModuleSetBuilder::new(
            LogStream::null(),
            [ModuleSlot::new(
                project("a"),
                Arc::new(RecordingProxy::default()),
                vec![reporter],
            )],
        );
        let mut engine = ScriptedEngine {
            steps: vec![(project("a"), "install", false), (project("a"), "deploy", false)],
            exit: 0,
        };

        let req = request();
        let err = MavenBuilder::new(&req, LogStream::null())
            .call(&mut engine, builder)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Gatekeeper failed");
        assert!(err.is_abort());
        assert_eq!(*trace.lock().unwrap(), vec!["enter a", "execute a install"]);
    }

    #[tokio::test]
    async fn empty_property_name_is_rejected() {
        let mut req = request();
        req.system_properties.insert(String::new(), "x".to_string());
        let builder = ModuleSetBuilder::new(LogStream::null(), []);
        let mut engine = ScriptedEngine {
            steps: vec![],
            exit: 0,
        };
        let err = MavenBuilder::new(&req, LogStream::null())
            .call(&mut engine, builder)
            .await
            .unwrap_err();
        assert!(matches!(err, MavenError::Abort(_)));
    }

    #[tokio::test]
    async fn unknown_module_is_reported() {
        let builder = ModuleSetBuilder::new(LogStream::null(), []);
        let mut adapter = Adapter::new(builder);
        let err = adapter
            .pre_execute(&project("ghost"), &mojo("compile"))
            .await
            .unwrap_err();
        assert!(matches!(err, MavenError::UnknownModule(_)));
    }
}
