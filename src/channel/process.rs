//! Channel over a worker's stdio
//!
//! Requests go out on the worker's stdin; replies, events and build output
//! come back on its stdout. Anything else the worker prints goes to its
//! stderr, which is copied into an [`OutputRedirector`].

use crate::bridge::proxy::BuildMessage;
use crate::channel::protocol::{read_frame, write_frame, Command, Reply, Request, Response};
use crate::channel::{Channel, ChannelId, CloseHook, CloseHooks};
use crate::error::{MavenError, MavenResult};
use crate::listener::OutputRedirector;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type ReplySender = oneshot::Sender<MavenResult<Reply>>;

/// Calls waiting for their reply
#[derive(Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, ReplySender>,
}

struct Shared {
    id: ChannelId,
    name: String,
    pending: Mutex<Pending>,
    hooks: CloseHooks,
}

impl Shared {
    fn pending(&self) -> std::sync::MutexGuard<'_, Pending> {
        match self.pending.lock() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Fail every waiter and run the close hooks
    fn shut(&self) {
        let waiters = {
            let mut pending = self.pending();
            pending.closed = true;
            std::mem::take(&mut pending.waiters)
        };
        for (_, waiter) in waiters {
            let _ = waiter.send(Err(MavenError::ChannelClosed));
        }
        self.hooks.fire(self.id);
    }
}

/// [`Channel`] speaking the newline-delimited JSON protocol over a byte stream
pub struct ProcessChannel {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    writer: tokio::sync::Mutex<Option<Writer>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<BuildMessage>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    console: Mutex<Option<JoinHandle<()>>>,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl ProcessChannel {
    /// Channel over an arbitrary reader/writer pair
    pub fn from_streams<R, W>(name: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            name: name.into(),
            pending: Mutex::new(Pending::default()),
            hooks: CloseHooks::default(),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), BufReader::new(reader), tx));
        debug!("Opened channel {} ({})", shared.name, shared.id);

        Self {
            shared,
            next_id: AtomicU64::new(1),
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            events: Mutex::new(Some(rx)),
            reader: Mutex::new(Some(reader)),
            console: Mutex::new(None),
            child: tokio::sync::Mutex::new(None),
        }
    }

    /// Channel over a spawned child with piped stdin, stdout and stderr
    pub fn for_process(
        name: impl Into<String>,
        mut child: Child,
        out: OutputRedirector,
    ) -> MavenResult<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MavenError::Launch("worker stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MavenError::Launch("worker stdout is not piped".to_string()))?;
        let stderr = child.stderr.take();

        let mut channel = Self::from_streams(name, stdout, stdin);
        if let Some(stderr) = stderr {
            let console = tokio::spawn(forward_console(stderr, out));
            *lock(&channel.console) = Some(console);
        }
        channel.child = tokio::sync::Mutex::new(Some(child));
        Ok(channel)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn read_loop<R>(
    shared: Arc<Shared>,
    mut reader: BufReader<R>,
    events: mpsc::UnboundedSender<BuildMessage>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame::<_, Response>(&mut reader).await {
            Ok(Some(Response::Event { event })) => {
                // nobody listening is fine; the build still gets its reply
                let _ = events.send(BuildMessage::Event(event));
            }
            Ok(Some(Response::Output { output })) => {
                let _ = events.send(BuildMessage::Output(output));
            }
            Ok(Some(Response::Reply { id, reply })) => {
                let waiter = shared.pending().waiters.remove(&id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(reply.into_result());
                    }
                    None => warn!("Channel {}: reply to unknown call {}", shared.name, id),
                }
            }
            Ok(None) => {
                debug!("Channel {} reached end of stream", shared.name);
                break;
            }
            Err(e) => {
                warn!("Channel {} failed: {}", shared.name, e);
                break;
            }
        }
    }
    shared.shut();
}

/// Copy the worker console into `out` until the worker closes it
async fn forward_console<R>(stream: R, mut out: OutputRedirector)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if let Err(e) = out.write_all(&line).and_then(|_| out.flush()) {
                    warn!("Failed to copy worker output: {}", e);
                }
            }
            Err(e) => {
                warn!("Failed to read worker output: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl Channel for ProcessChannel {
    fn id(&self) -> ChannelId {
        self.shared.id
    }

    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn call(&self, command: Command) -> MavenResult<Reply> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending();
            if pending.closed {
                return Err(MavenError::ChannelClosed);
            }
            pending.waiters.insert(id, tx);
        }

        debug!("Channel {}: call {} {}", self.shared.name, id, command.name());
        let sent = {
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(w) => write_frame(w, &Request { id, command }).await,
                None => Err(MavenError::ChannelClosed),
            }
        };
        if let Err(e) = sent {
            self.shared.pending().waiters.remove(&id);
            return Err(e);
        }

        rx.await.map_err(|_| MavenError::ChannelClosed)?
    }

    async fn close(&self) -> MavenResult<()> {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            debug!("Closing channel {}", self.shared.name);
            if let Err(e) = writer.shutdown().await {
                debug!("Channel {}: shutdown failed: {}", self.shared.name, e);
            }
        }
        Ok(())
    }

    async fn join(&self) -> MavenResult<()> {
        let reader = lock(&self.reader).take();
        if let Some(reader) = reader {
            reader
                .await
                .map_err(|e| MavenError::Internal(format!("channel reader panicked: {}", e)))?;
        }
        let console = lock(&self.console).take();
        if let Some(console) = console {
            let _ = console.await;
        }
        if let Some(mut child) = self.child.lock().await.take() {
            let status = child
                .wait()
                .await
                .map_err(|e| MavenError::io("waiting for worker", e))?;
            debug!("Worker {} exited with {}", self.shared.name, status);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.shared.pending().closed
    }

    fn on_close(&self, hook: CloseHook) {
        self.shared.hooks.register(self.shared.id, hook);
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<BuildMessage>> {
        lock(&self.events).take()
    }

    fn return_events(&self, events: mpsc::UnboundedReceiver<BuildMessage>) {
        *lock(&self.events) = Some(events);
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
    }
}
