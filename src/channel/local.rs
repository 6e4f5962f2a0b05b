//! Launcher for worker processes on the controller's own machine

use crate::channel::{Channel, Launcher, Node, ProcessChannel};
use crate::error::{MavenError, MavenResult};
use crate::listener::OutputRedirector;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

/// Starts workers as child processes of this process
pub struct LocalLauncher {
    node: Node,
}

impl LocalLauncher {
    /// Launcher on the controller node
    pub fn new() -> Self {
        Self::on(Node::controller())
    }

    /// Launcher on a given node; processes still start locally
    pub fn on(node: Node) -> Self {
        Self { node }
    }
}

impl Default for LocalLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Launcher for LocalLauncher {
    fn node(&self) -> &Node {
        &self.node
    }

    async fn launch_channel(
        &self,
        argv: &[String],
        out: OutputRedirector,
        work_dir: Option<&Path>,
        env: &BTreeMap<String, String>,
    ) -> MavenResult<Arc<dyn Channel>> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| MavenError::Launch("empty command line".to_string()))?;
        info!("Launching worker: {}", argv.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = work_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| MavenError::command_failed(program.clone(), e))?;
        debug!("Worker started with pid {:?}", child.id());

        let name = format!("worker {}", child.id().map_or_else(|| "?".to_string(), |p| p.to_string()));
        Ok(Arc::new(ProcessChannel::for_process(name, child, out)?))
    }
}
