//! The worker side of a channel
//!
//! A worker process reads [`Request`]s from the controller, runs builds
//! through a [`BuildEngine`] and answers with replies. Module progress and
//! the build log produced during a build are sent as event and output frames
//! ahead of the build's reply, in the order they happened.

mod engine;

pub use engine::{parse_banner, parse_project_header, Banner, ConsoleEngine};

use crate::bridge::adapter::ExecutionListener;
use crate::bridge::builder::{MavenBuilder, ModuleSetBuilder, ModuleSlot};
use crate::bridge::proxy::{BuildMessage, BuildProxy, EventProxy};
use crate::bridge::reporter::create_reporters;
use crate::channel::protocol::{read_frame, write_frame, Request, Response};
use crate::channel::{BuildRequest, Command, Reply, WorkerOutcome};
use crate::error::MavenResult;
use crate::listener::LogStream;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The build tool, as driven from inside a worker
#[async_trait]
pub trait BuildEngine: Send {
    /// Run the build described by `request`, raising callbacks on
    /// `listener` as goals start and finish. Returns the tool's exit code.
    async fn launch(
        &mut self,
        request: &BuildRequest,
        listener: &mut dyn ExecutionListener,
        log: &LogStream,
    ) -> MavenResult<i32>;
}

/// Build log that queues complete lines as output messages, behind any
/// events sent before them
struct OutputLines {
    pending: Vec<u8>,
    sink: mpsc::UnboundedSender<BuildMessage>,
}

impl OutputLines {
    fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let text = String::from_utf8_lossy(bytes).into_owned();
        self.sink
            .send(BuildMessage::Output(text))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "build message stream closed"))
    }
}

impl Write for OutputLines {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        if let Some(end) = self.pending.iter().rposition(|b| *b == b'\n') {
            let rest = self.pending.split_off(end + 1);
            let lines = std::mem::replace(&mut self.pending, rest);
            self.send(&lines)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let partial = std::mem::take(&mut self.pending);
            self.send(&partial)?;
        }
        Ok(())
    }
}

/// Run one build, forwarding its events and output to `writer` while it runs
async fn run_build<W>(
    request: BuildRequest,
    engine: &mut dyn BuildEngine,
    writer: &mut W,
) -> MavenResult<WorkerOutcome>
where
    W: AsyncWrite + Unpin + Send,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<BuildMessage>();
    let log = LogStream::new(OutputLines {
        pending: Vec::new(),
        sink: tx.clone(),
    });
    let slots: Vec<ModuleSlot> = request
        .modules
        .iter()
        .map(|spec| {
            let proxy: Arc<dyn BuildProxy> = Arc::new(EventProxy::new(spec.name.clone(), tx.clone()));
            ModuleSlot::new(
                spec.project(&request.work_dir),
                proxy,
                create_reporters(&spec.reporters),
            )
        })
        .collect();
    drop(tx);

    let builder = ModuleSetBuilder::new(log.clone(), slots);
    let call = MavenBuilder::new(&request, log.clone()).call(engine, builder);
    tokio::pin!(call);

    let outcome = loop {
        tokio::select! {
            biased;
            Some(message) = rx.recv() => write_frame(writer, &Response::from(message)).await?,
            outcome = &mut call => break outcome,
        }
    };

    // an unterminated last line
    if let Err(e) = log.clone().flush() {
        warn!("Failed to flush build output: {}", e);
    }
    while let Ok(message) = rx.try_recv() {
        write_frame(writer, &Response::from(message)).await?;
    }
    outcome
}

/// Serve controller requests until `Shutdown` or end of input.
///
/// Properties set with `SystemProperties` apply to every later build;
/// properties of the build request itself take precedence.
pub async fn serve<R, W>(reader: R, mut writer: W, engine: &mut dyn BuildEngine) -> MavenResult<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut reader = BufReader::new(reader);
    let mut properties: BTreeMap<String, String> = BTreeMap::new();

    while let Some(Request { id, command }) = read_frame::<_, Request>(&mut reader).await? {
        debug!("Worker received {} ({})", command.name(), id);
        let shutdown = matches!(command, Command::Shutdown);

        let reply = match command {
            Command::Ping => Reply::Pong,
            Command::Shutdown => Reply::Ack,
            Command::SystemProperties(props) => {
                properties.extend(props);
                Reply::Ack
            }
            Command::RunBuild(mut request) => {
                let mut merged = properties.clone();
                merged.append(&mut request.system_properties);
                request.system_properties = merged;

                match run_build(request, engine, &mut writer).await {
                    Ok(outcome) => {
                        info!("Build finished with {}", outcome.result);
                        Reply::BuildFinished(outcome)
                    }
                    Err(e) => {
                        warn!("Build failed: {}", e);
                        Reply::failed(&e)
                    }
                }
            }
        };

        write_frame(&mut writer, &Response::Reply { id, reply }).await?;
        if shutdown {
            break;
        }
    }

    debug!("Worker shutting down");
    Ok(())
}
