//! Build listeners and log sinks
//!
//! A build's log is a byte stream shared by every component writing to it:
//! the orchestrator, the worker process console and reporters. Diagnostics
//! for operators go through `tracing` instead.

mod redirect;
mod splittable;

pub use redirect::OutputRedirector;
pub use splittable::SplittableBuildListener;

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Cloneable handle to a byte sink.
///
/// All clones write to the same underlying writer; each `write` call is
/// applied atomically with respect to other clones.
#[derive(Clone)]
pub struct LogStream {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl LogStream {
    /// Wrap a writer
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Sink that discards everything
    pub fn null() -> Self {
        Self::new(io::sink())
    }

    /// Process standard output
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Write one line, logging instead of failing when the sink is broken
    pub fn println(&self, line: &str) {
        let mut w = self.clone();
        if let Err(e) = writeln!(w, "{}", line).and_then(|_| w.flush()) {
            warn!("Failed to write to build log: {}", e);
        }
    }

    /// Whether two handles share the same underlying writer
    pub fn same_sink(&self, other: &LogStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, Box<dyn Write + Send>>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("log stream lock poisoned"))
    }
}

impl Write for LogStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.lock()?.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream").finish_non_exhaustive()
    }
}

/// Receives the log of one build.
///
/// `error` and `fatal_error` print the message and mark the build failed.
pub trait BuildListener: Send + Sync {
    /// Sink for the build log
    fn logger(&self) -> LogStream;

    /// Record that the build has failed
    fn mark_failed(&self);

    /// Whether an error has been reported to this listener
    fn is_failed(&self) -> bool;

    /// Report an error and mark the build failed
    fn error(&self, msg: &str) {
        self.logger().println(&format!("ERROR: {}", msg));
        self.mark_failed();
    }

    /// Report a fatal error and mark the build failed
    fn fatal_error(&self, msg: &str) {
        self.logger().println(&format!("FATAL: {}", msg));
        self.mark_failed();
    }
}

/// Listener backed by a plain stream
#[derive(Debug)]
pub struct StreamBuildListener {
    out: LogStream,
    failed: AtomicBool,
}

impl StreamBuildListener {
    /// Create a listener writing to `out`
    pub fn new(out: LogStream) -> Self {
        Self {
            out,
            failed: AtomicBool::new(false),
        }
    }
}

impl BuildListener for StreamBuildListener {
    fn logger(&self) -> LogStream {
        self.out.clone()
    }

    fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

/// In-memory sink for tests
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct MemoryLog(pub Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl MemoryLog {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }

    pub fn stream(&self) -> LogStream {
        LogStream::new(self.clone())
    }
}

#[cfg(test)]
impl Write for MemoryLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
