//! Remote command channels to worker processes
//!
//! A [`Channel`] carries [`Command`]s to one worker and brings back replies
//! plus the ordered stream of build events and output. A [`Launcher`] starts workers on
//! a [`Node`], the machine (controller or agent) the build runs on.

mod local;
mod process;
pub mod protocol;

pub use local::LocalLauncher;
pub use process::ProcessChannel;
pub use protocol::{BuildRequest, Command, ModuleSpec, Reply, WorkerOutcome};

use crate::bridge::proxy::BuildMessage;
use crate::error::{MavenError, MavenResult};
use crate::listener::OutputRedirector;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Identity of a channel or node connection
pub type ChannelId = Uuid;

/// Callback run once when a channel or node goes away
pub type CloseHook = Box<dyn FnOnce(ChannelId) + Send>;

/// Close hooks of one channel.
///
/// Hooks registered after the close run immediately.
#[derive(Default)]
pub struct CloseHooks {
    state: Mutex<HooksState>,
}

#[derive(Default)]
struct HooksState {
    closed: bool,
    hooks: Vec<CloseHook>,
}

impl CloseHooks {
    /// Register `hook` for the close of `id`
    pub fn register(&self, id: ChannelId, hook: CloseHook) {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.closed {
            drop(state);
            hook(id);
        } else {
            state.hooks.push(hook);
        }
    }

    /// Mark closed and run every pending hook; later calls do nothing
    pub fn fire(&self, id: ChannelId) {
        let hooks = {
            let mut state = match self.state.lock() {
                Ok(s) => s,
                Err(poisoned) => poisoned.into_inner(),
            };
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.hooks)
        };
        debug!("Running {} close hook(s) for {}", hooks.len(), id);
        for hook in hooks {
            hook(id);
        }
    }

    /// Whether [`CloseHooks::fire`] has run
    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|s| s.closed).unwrap_or(true)
    }
}

/// A machine builds run on, as seen from the controller
pub struct Node {
    id: ChannelId,
    name: String,
    is_controller: bool,
    /// Root directory on the node that support jars are copied into
    root: Option<PathBuf>,
    hooks: CloseHooks,
}

impl Node {
    /// The controller itself
    pub fn controller() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "controller".to_string(),
            is_controller: true,
            root: None,
            hooks: CloseHooks::default(),
        }
    }

    /// A remote agent with its root directory
    pub fn agent(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            is_controller: false,
            root: Some(root.into()),
            hooks: CloseHooks::default(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_controller(&self) -> bool {
        self.is_controller
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Run `hook` when the connection to this node closes
    pub fn on_close(&self, hook: CloseHook) {
        self.hooks.register(self.id, hook);
    }

    /// Disconnect the node
    pub fn close(&self) {
        debug!("Node {} disconnected", self.name);
        self.hooks.fire(self.id);
    }

    pub fn is_closed(&self) -> bool {
        self.hooks.is_closed()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("is_controller", &self.is_controller)
            .field("root", &self.root)
            .finish()
    }
}

/// Ordered, call-and-reply connection to one worker process
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique id of this channel
    fn id(&self) -> ChannelId;

    /// Display name for logs
    fn name(&self) -> &str;

    /// Send `command` and wait for its reply.
    ///
    /// A `Failed` reply is returned as the error it encodes.
    async fn call(&self, command: Command) -> MavenResult<Reply>;

    /// Round-trip no-op
    async fn ping(&self) -> MavenResult<()> {
        match self.call(Command::Ping).await? {
            Reply::Pong => Ok(()),
            _ => Err(MavenError::UnexpectedReply { expected: "pong" }),
        }
    }

    /// Stop accepting commands and let the worker exit
    async fn close(&self) -> MavenResult<()>;

    /// Wait until the worker has exited
    async fn join(&self) -> MavenResult<()>;

    fn is_closed(&self) -> bool;

    /// Run `hook` once the channel is closed from either end
    fn on_close(&self, hook: CloseHook);

    /// Take the receiving end of the build message stream; `None` while
    /// someone else holds it
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<BuildMessage>>;

    /// Hand the message stream back after [`Channel::take_events`]
    fn return_events(&self, events: mpsc::UnboundedReceiver<BuildMessage>);
}

/// Starts worker processes on a node
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Node the launched processes run on
    fn node(&self) -> &Node;

    /// Start `argv` and connect a channel to its stdio.
    ///
    /// The process console goes to `out`.
    async fn launch_channel(
        &self,
        argv: &[String],
        out: OutputRedirector,
        work_dir: Option<&Path>,
        env: &BTreeMap<String, String>,
    ) -> MavenResult<Arc<dyn Channel>>;
}
