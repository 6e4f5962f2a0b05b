//! Re-targetable output for long-lived worker processes

use crate::listener::LogStream;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Output sink whose target can be swapped while writers hold it.
///
/// A cached worker process keeps one redirector for its whole life; it is
/// pointed at the current build's log while the worker is leased and at a
/// null sink while it sits idle.
#[derive(Clone)]
pub struct OutputRedirector {
    target: Arc<Mutex<LogStream>>,
}

impl OutputRedirector {
    /// Redirector that starts out discarding
    pub fn new() -> Self {
        Self::to(LogStream::null())
    }

    /// Redirector that starts out writing to `target`
    pub fn to(target: LogStream) -> Self {
        Self {
            target: Arc::new(Mutex::new(target)),
        }
    }

    /// Point the output at `target`
    pub fn set(&self, target: LogStream) {
        match self.target.lock() {
            Ok(mut current) => *current = target,
            Err(poisoned) => *poisoned.into_inner() = target,
        }
    }

    /// Discard output from now on
    pub fn set_null(&self) {
        self.set(LogStream::null());
    }

    fn current(&self) -> io::Result<LogStream> {
        self.target
            .lock()
            .map(|t| t.clone())
            .map_err(|_| io::Error::other("redirector lock poisoned"))
    }
}

impl Default for OutputRedirector {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for OutputRedirector {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.current()?.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.current()?.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.current()?.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::MemoryLog;

    #[test]
    fn follows_the_current_target() {
        let first = MemoryLog::default();
        let second = MemoryLog::default();
        let mut out = OutputRedirector::to(first.stream());

        out.write_all(b"a").unwrap();
        out.set(second.stream());
        out.write_all(b"b").unwrap();
        out.set_null();
        out.write_all(b"c").unwrap();

        assert_eq!(first.contents(), "a");
        assert_eq!(second.contents(), "b");
    }
}
