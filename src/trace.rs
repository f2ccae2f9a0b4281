//! Decision trace capture for ranking sessions.

use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Mutex};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::types::{ComparisonResult, ItemId};

/// One answered question.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionTrace {
    pub timestamp_ms: i64,
    pub list_id: String,
    /// 1-based count of questions answered in this session.
    pub comparison_index: usize,
    pub item_a: ItemId,
    pub item_b: ItemId,
    pub result: ComparisonResult,
    /// Pairs added by transitive closure right after this answer.
    pub inferred: usize,
    pub item_set_hash: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("trace sink is closed")]
    Closed,
    #[error("trace sink lock poisoned")]
    Poisoned,
    #[error("trace writer thread panicked")]
    WriterPanicked,
}

pub trait TraceSink: Send + Sync {
    fn record(&self, event: DecisionTrace) -> Result<(), TraceError>;

    /// Flush everything recorded so far. Later `record` calls fail with
    /// `TraceError::Closed`.
    fn close(&self) -> Result<(), TraceError> {
        Ok(())
    }
}

/// Appends one JSON object per line from a background writer thread.
/// Closed on `close` or drop.
pub struct JsonlTraceSink {
    path: PathBuf,
    sender: Mutex<Option<mpsc::Sender<DecisionTrace>>>,
    writer: Mutex<Option<JoinHandle<Result<usize, TraceError>>>>,
}

impl JsonlTraceSink {
    /// Opens `path` in append mode; resumed sessions keep extending one file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let (sender, receiver) = mpsc::channel();
        let writer = std::thread::spawn(move || append_lines(file, receiver));
        Ok(Self {
            path,
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TraceSink for JsonlTraceSink {
    fn record(&self, event: DecisionTrace) -> Result<(), TraceError> {
        let sender = self.sender.lock().map_err(|_| TraceError::Poisoned)?;
        match sender.as_ref() {
            Some(sender) => sender.send(event).map_err(|_| TraceError::Closed),
            None => Err(TraceError::Closed),
        }
    }

    fn close(&self) -> Result<(), TraceError> {
        // dropping the sender ends the writer's receive loop
        drop(self.sender.lock().map_err(|_| TraceError::Poisoned)?.take());
        let writer = self.writer.lock().map_err(|_| TraceError::Poisoned)?.take();
        let Some(writer) = writer else {
            return Ok(());
        };
        let written = writer.join().map_err(|_| TraceError::WriterPanicked)??;
        debug!(path = %self.path.display(), written, "closed decision trace");
        Ok(())
    }
}

impl Drop for JsonlTraceSink {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(path = %self.path.display(), error = %err, "decision trace not flushed");
        }
    }
}

fn append_lines(
    file: std::fs::File,
    receiver: mpsc::Receiver<DecisionTrace>,
) -> Result<usize, TraceError> {
    let mut out = BufWriter::new(file);
    let mut written = 0;
    for event in receiver {
        serde_json::to_writer(&mut out, &event)?;
        out.write_all(b"\n")?;
        // flushed per record
        out.flush()?;
        written += 1;
    }
    Ok(written)
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
