//! Build proxies: how the worker reports module progress to the controller
//!
//! Inside the worker every module gets an [`EventProxy`] that turns proxy
//! calls into [`BuildEvent`]s. The events travel over the channel in order,
//! interleaved with the build's log output, and the controller's
//! [`ProxyDispatcher`] replays them against the real per-module proxies.

use crate::bridge::mojo::ExecutedMojo;
use crate::channel::protocol::{BuildRequest, Command, Reply, WorkerOutcome};
use crate::channel::Channel;
use crate::error::{MavenError, MavenResult};
use crate::listener::LogStream;
use crate::module::ModuleName;
use crate::result::BuildResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Progress of one module build, as sent from worker to controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildEvent {
    Start {
        module: ModuleName,
    },
    End {
        module: ModuleName,
    },
    SetResult {
        module: ModuleName,
        result: BuildResult,
    },
    SetExecutedMojos {
        module: ModuleName,
        mojos: Vec<ExecutedMojo>,
    },
}

impl BuildEvent {
    /// Module the event is about
    pub fn module(&self) -> &ModuleName {
        match self {
            Self::Start { module }
            | Self::End { module }
            | Self::SetResult { module, .. }
            | Self::SetExecutedMojos { module, .. } => module,
        }
    }
}

/// What a worker streams back while a build runs, in production order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildMessage {
    Event(BuildEvent),
    /// Build log text
    Output(String),
}

/// Controller-side handle to one module build
#[async_trait]
pub trait BuildProxy: Send + Sync {
    /// The module build has started
    async fn start(&self) -> MavenResult<()>;

    /// The module build has finished
    async fn end(&self) -> MavenResult<()>;

    /// Override the module build's result
    async fn set_result(&self, result: BuildResult) -> MavenResult<()>;

    /// Attach the goals executed for this module
    async fn set_executed_mojos(&self, mojos: Vec<ExecutedMojo>) -> MavenResult<()>;
}

/// Worker-side proxy that forwards every call as a [`BuildEvent`]
pub struct EventProxy {
    module: ModuleName,
    sink: mpsc::UnboundedSender<BuildMessage>,
}

impl EventProxy {
    /// Proxy for `module` sending into `sink`
    pub fn new(module: ModuleName, sink: mpsc::UnboundedSender<BuildMessage>) -> Self {
        Self { module, sink }
    }

    fn send(&self, event: BuildEvent) -> MavenResult<()> {
        self.sink
            .send(BuildMessage::Event(event))
            .map_err(|_| MavenError::ChannelClosed)
    }
}

#[async_trait]
impl BuildProxy for EventProxy {
    async fn start(&self) -> MavenResult<()> {
        self.send(BuildEvent::Start {
            module: self.module.clone(),
        })
    }

    async fn end(&self) -> MavenResult<()> {
        self.send(BuildEvent::End {
            module: self.module.clone(),
        })
    }

    async fn set_result(&self, result: BuildResult) -> MavenResult<()> {
        self.send(BuildEvent::SetResult {
            module: self.module.clone(),
            result,
        })
    }

    async fn set_executed_mojos(&self, mojos: Vec<ExecutedMojo>) -> MavenResult<()> {
        self.send(BuildEvent::SetExecutedMojos {
            module: self.module.clone(),
            mojos,
        })
    }
}

/// Applies worker events to the controller's module proxies
pub struct ProxyDispatcher {
    proxies: HashMap<ModuleName, Arc<dyn BuildProxy>>,
    console: LogStream,
}

impl ProxyDispatcher {
    /// Dispatcher over the given module proxies; build output is discarded
    pub fn new(proxies: HashMap<ModuleName, Arc<dyn BuildProxy>>) -> Self {
        Self {
            proxies,
            console: LogStream::null(),
        }
    }

    /// Write the worker's build output to `console`
    pub fn with_console(mut self, console: LogStream) -> Self {
        self.console = console;
        self
    }

    /// Apply one message: events go to their proxy, output to the console
    pub async fn dispatch(&self, message: BuildMessage) -> MavenResult<()> {
        match message {
            BuildMessage::Event(event) => self.apply(event).await,
            BuildMessage::Output(text) => {
                let mut console = self.console.clone();
                console
                    .write_all(text.as_bytes())
                    .and_then(|_| console.flush())
                    .map_err(|e| MavenError::io("writing worker output", e))
            }
        }
    }

    /// Apply one event to the proxy it addresses.
    ///
    /// Events for modules that are not part of this build are dropped.
    pub async fn apply(&self, event: BuildEvent) -> MavenResult<()> {
        let Some(proxy) = self.proxies.get(event.module()) else {
            warn!("Dropping event for unknown module {}", event.module());
            return Ok(());
        };
        debug!("Applying {:?}", event);
        match event {
            BuildEvent::Start { .. } => proxy.start().await,
            BuildEvent::End { .. } => proxy.end().await,
            BuildEvent::SetResult { result, .. } => proxy.set_result(result).await,
            BuildEvent::SetExecutedMojos { mojos, .. } => proxy.set_executed_mojos(mojos).await,
        }
    }

    /// Run `request` on `channel`, applying events and output as they arrive.
    ///
    /// The worker sends everything a build produces before its reply, so
    /// once the reply is in the rest is already queued and gets drained here.
    pub async fn run_build(
        &self,
        channel: &dyn Channel,
        request: BuildRequest,
    ) -> MavenResult<WorkerOutcome> {
        let mut events = channel
            .take_events()
            .ok_or_else(|| MavenError::Internal("channel events already taken".to_string()))?;

        let call = channel.call(Command::RunBuild(request));
        tokio::pin!(call);

        let reply = loop {
            tokio::select! {
                biased;
                Some(message) = events.recv() => self.dispatch(message).await?,
                reply = &mut call => break reply,
            }
        };

        while let Ok(message) = events.try_recv() {
            self.dispatch(message).await?;
        }
        channel.return_events(events);

        match reply? {
            Reply::BuildFinished(outcome) => Ok(outcome),
            _ => Err(MavenError::UnexpectedReply {
                expected: "build_finished",
            }),
        }
    }
}
