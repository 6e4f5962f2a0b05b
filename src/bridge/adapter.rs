//! Turns the build tool's flat goal callbacks into module-level lifecycle
//!
//! The build tool only reports "goal X of project P starts/ends". Module
//! boundaries are derived from changes of P: every maximal run of goals of
//! one project is bracketed by exactly one `pre_module`/`post_module` pair.

use crate::bridge::mojo::{MojoInfo, ProjectRef};
use crate::error::MavenResult;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::trace;

/// Callbacks the build engine raises while it runs
#[async_trait]
pub trait ExecutionListener: Send {
    async fn pre_build(&mut self) -> MavenResult<()>;

    async fn pre_execute(&mut self, project: &ProjectRef, mojo: &MojoInfo) -> MavenResult<()>;

    async fn post_execute(
        &mut self,
        project: &ProjectRef,
        mojo: &MojoInfo,
        error: Option<&str>,
    ) -> MavenResult<()>;

    /// The engine knows the current module is done
    async fn end_module(&mut self) -> MavenResult<()>;

    async fn post_build(&mut self) -> MavenResult<()>;
}

/// Module-level view of a build
#[async_trait]
pub trait LifecycleListener: Send {
    /// Before the whole build
    async fn pre_build(&mut self) -> MavenResult<()>;

    /// The build entered `project`
    async fn pre_module(&mut self, project: &ProjectRef) -> MavenResult<()>;

    /// The build left `project`
    async fn post_module(&mut self, project: &ProjectRef) -> MavenResult<()>;

    async fn pre_execute(&mut self, project: &ProjectRef, mojo: &MojoInfo) -> MavenResult<()>;

    async fn post_execute(
        &mut self,
        project: &ProjectRef,
        mojo: &MojoInfo,
        error: Option<&str>,
    ) -> MavenResult<()>;

    /// After the build fully completed
    async fn post_build(&mut self) -> MavenResult<()>;
}

/// [`ExecutionListener`] that detects module transitions and forwards to a
/// [`LifecycleListener`], timing the time spent outside the build tool.
pub struct Adapter<L> {
    listener: L,
    last_module: Option<ProjectRef>,
    overhead: Duration,
}

impl<L: LifecycleListener> Adapter<L> {
    pub fn new(listener: L) -> Self {
        Self {
            listener,
            last_module: None,
            overhead: Duration::ZERO,
        }
    }

    /// Total time spent in listener callbacks
    pub fn overhead(&self) -> Duration {
        self.overhead
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn into_inner(self) -> L {
        self.listener
    }

    async fn fire_enter_module(&mut self, project: &ProjectRef) -> MavenResult<()> {
        trace!("Entering {}", project.name);
        self.last_module = Some(project.clone());
        self.listener.pre_module(project).await
    }

    async fn fire_leave_module(&mut self) -> MavenResult<()> {
        if let Some(last) = self.last_module.take() {
            trace!("Leaving {}", last.name);
            self.listener.post_module(&last).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<L: LifecycleListener> ExecutionListener for Adapter<L> {
    async fn pre_build(&mut self) -> MavenResult<()> {
        let start = Instant::now();
        let r = self.listener.pre_build().await;
        self.overhead += start.elapsed();
        r
    }

    async fn pre_execute(&mut self, project: &ProjectRef, mojo: &MojoInfo) -> MavenResult<()> {
        let start = Instant::now();
        let r = async {
            if self.last_module.as_ref() != Some(project) {
                self.fire_leave_module().await?;
                self.fire_enter_module(project).await?;
            }
            self.listener.pre_execute(project, mojo).await
        }
        .await;
        self.overhead += start.elapsed();
        r
    }

    async fn post_execute(
        &mut self,
        project: &ProjectRef,
        mojo: &MojoInfo,
        error: Option<&str>,
    ) -> MavenResult<()> {
        let start = Instant::now();
        let r = self.listener.post_execute(project, mojo, error).await;
        self.overhead += start.elapsed();
        r
    }

    async fn end_module(&mut self) -> MavenResult<()> {
        let start = Instant::now();
        let r = self.fire_leave_module().await;
        self.overhead += start.elapsed();
        r
    }

    async fn post_build(&mut self) -> MavenResult<()> {
        let start = Instant::now();
        let r = async {
            self.fire_leave_module().await?;
            self.listener.post_build().await
        }
        .await;
        self.overhead += start.elapsed();
        r
    }
}
