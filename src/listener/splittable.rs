//! Build listener whose output can be temporarily teed to a side stream

use crate::listener::{BuildListener, LogStream, StreamBuildListener};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

type SideStream = Arc<Mutex<Option<Box<dyn Write + Send>>>>;

/// Writes every byte to the primary sink and to the current side stream
struct Fanout {
    primary: LogStream,
    side: SideStream,
}

impl Write for Fanout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_all(buf)?;
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        // holding the side lock for the whole write keeps a swap from
        // landing in the middle of it
        let mut side = self
            .side
            .lock()
            .map_err(|_| io::Error::other("side stream lock poisoned"))?;
        self.primary.write_all(buf)?;
        if let Some(side) = side.as_mut() {
            side.write_all(buf)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut side = self
            .side
            .lock()
            .map_err(|_| io::Error::other("side stream lock poisoned"))?;
        self.primary.flush()?;
        if let Some(side) = side.as_mut() {
            side.flush()?;
        }
        Ok(())
    }
}

/// [`BuildListener`] that lets an observer attach a secondary sink to a
/// live build log.
///
/// Used by the aggregator-style build: the module-set log is the primary
/// sink and each module build borrows it as a side stream while that module
/// is being built.
pub struct SplittableBuildListener {
    core: Arc<dyn BuildListener>,
    merged: LogStream,
    side: SideStream,
}

impl SplittableBuildListener {
    /// Wrap `core`; the side stream starts out discarding
    pub fn new(core: Arc<dyn BuildListener>) -> Self {
        let side: SideStream = Arc::new(Mutex::new(None));
        let merged = LogStream::new(Fanout {
            primary: core.logger(),
            side: Arc::clone(&side),
        });
        Self { core, merged, side }
    }

    /// Replace the side stream; `None` goes back to discarding.
    ///
    /// Whatever has been written so far is flushed to the old side stream first.
    pub fn set_side_output_stream(&self, stream: Option<Box<dyn Write + Send>>) -> io::Result<()> {
        let mut merged = self.merged.clone();
        merged.flush()?;
        let mut side = self
            .side
            .lock()
            .map_err(|_| io::Error::other("side stream lock poisoned"))?;
        if let Some(old) = side.as_mut() {
            old.flush()?;
        }
        *side = stream;
        Ok(())
    }

    /// Plain listener bound to the merged writer.
    ///
    /// This is what crosses a process boundary: the side-stream indirection
    /// only makes sense where this object lives.
    pub fn to_stream_listener(&self) -> StreamBuildListener {
        StreamBuildListener::new(self.merged.clone())
    }
}

impl BuildListener for SplittableBuildListener {
    fn logger(&self) -> LogStream {
        self.merged.clone()
    }

    fn mark_failed(&self) {
        self.core.mark_failed();
    }

    fn is_failed(&self) -> bool {
        self.core.is_failed()
    }
}
