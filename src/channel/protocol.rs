//! Wire protocol between the controller and a worker process
//!
//! Frames are newline-delimited JSON. The controller sends [`Request`]s; the
//! worker answers each with any number of event and output frames followed
//! by exactly one reply frame carrying the request's id.
//!
//! Build log text travels as output frames on the same stream as the events,
//! so the controller sees both in the order the worker produced them.

use crate::bridge::mojo::ProjectRef;
use crate::bridge::proxy::{BuildEvent, BuildMessage};
use crate::bridge::reporter::ReporterKind;
use crate::error::{MavenError, MavenResult};
use crate::module::ModuleName;
use crate::result::BuildResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Controller to worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: Command,
}

/// Worker to controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Reply { id: u64, reply: Reply },
    Event { event: BuildEvent },
    /// Build log text, one or more complete lines
    Output { output: String },
}

impl From<BuildMessage> for Response {
    fn from(message: BuildMessage) -> Self {
        match message {
            BuildMessage::Event(event) => Self::Event { event },
            BuildMessage::Output(output) => Self::Output { output },
        }
    }
}

/// Everything the controller can ask a worker to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Round-trip no-op used as a liveness check
    Ping,
    /// Set system properties for subsequent builds
    SystemProperties(BTreeMap<String, String>),
    /// Run the build tool once
    RunBuild(BuildRequest),
    /// Finish the current reply and exit
    Shutdown,
}

impl Command {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::SystemProperties(_) => "system_properties",
            Self::RunBuild(_) => "run_build",
            Self::Shutdown => "shutdown",
        }
    }
}

/// One module taking part in a worker-side build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub name: ModuleName,
    pub version: String,
    /// Module directory relative to the build's work directory
    #[serde(default)]
    pub relative_path: String,
    /// Reporters to attach to this module, in registration order
    #[serde(default)]
    pub reporters: Vec<ReporterKind>,
}

impl ModuleSpec {
    /// The module as the build tool sees it when run in `work_dir`
    pub fn project(&self, work_dir: &Path) -> ProjectRef {
        let base_dir = if self.relative_path.is_empty() {
            work_dir.to_path_buf()
        } else {
            work_dir.join(&self.relative_path)
        };
        ProjectRef::new(self.name.clone(), self.version.clone(), base_dir)
    }
}

/// Parameters of one build-tool run inside the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Directory the build runs in
    pub work_dir: PathBuf,
    /// Root POM relative to `work_dir`
    pub pom: PathBuf,
    pub goals: Vec<String>,
    #[serde(default)]
    pub system_properties: BTreeMap<String, String>,
    pub modules: Vec<ModuleSpec>,
    /// Local repository used to locate plugin jars
    #[serde(default)]
    pub repository: Option<PathBuf>,
}

/// What a worker build ended with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOutcome {
    pub result: BuildResult,
    /// Set when a reporter asked for a failed tool run to count as a success
    #[serde(default)]
    pub mark_as_success: bool,
    /// Time spent in event bridging rather than in the build tool
    #[serde(default)]
    pub overhead_ms: u64,
}

/// Kind of failure a worker reports back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Abort,
    Interrupted,
    Error,
}

/// Answer to a [`Command`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Pong,
    Ack,
    BuildFinished(WorkerOutcome),
    Failed {
        kind: FailureKind,
        /// Absent when the failure was already written to the build log
        message: Option<String>,
    },
}

impl Reply {
    /// Encode a worker-side error
    pub fn failed(err: &MavenError) -> Self {
        let kind = if err.is_interrupted() {
            FailureKind::Interrupted
        } else if err.is_abort() {
            FailureKind::Abort
        } else {
            FailureKind::Error
        };
        Self::Failed {
            kind,
            message: err.report_message(),
        }
    }

    /// Turn a `Failed` reply back into an error, pass anything else through
    pub fn into_result(self) -> MavenResult<Self> {
        match self {
            Self::Failed { kind, message } => Err(match (kind, message) {
                (FailureKind::Interrupted, _) => MavenError::Interrupted,
                (FailureKind::Abort, None) => MavenError::AlreadyReported,
                (FailureKind::Abort, Some(m)) => MavenError::Abort(m),
                (FailureKind::Error, m) => MavenError::channel(
                    m.unwrap_or_else(|| "worker failed without a message".to_string()),
                ),
            }),
            other => Ok(other),
        }
    }
}

/// Write one frame and flush it
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> MavenResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| MavenError::io("writing frame", e))?;
    writer
        .flush()
        .await
        .map_err(|e| MavenError::io("flushing frame", e))
}

/// Read the next frame; `None` at end of stream.
///
/// Blank lines are skipped.
pub async fn read_frame<R, T>(reader: &mut R) -> MavenResult<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|e| MavenError::io("reading frame", e))?;
        if n == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            return Ok(Some(serde_json::from_str(line.trim_end())?));
        }
    }
}
