use super::{LogEntry, LogKind};
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Append-only run log shared across every component of a run.
///
/// Appends go to an in-memory list and, when configured, to a JSON-lines
/// file. Lock scope is a single push/write, so holding it across `.await`
/// points never happens.
pub struct RunLog {
    entries: Mutex<Vec<LogEntry>>,
    sink: Option<Mutex<File>>,
}

impl RunLog {
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sink: None,
        }
    }

    /// Mirror entries to a JSON-lines file, appending to any existing log.
    pub fn with_file(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open run log at {}", path.display()))?;
        Ok(Self {
            entries: Mutex::new(Vec::new()),
            sink: Some(Mutex::new(file)),
        })
    }

    pub fn record(&self, kind: LogKind, detail: impl Into<String>) {
        let entry = LogEntry::new(kind, detail);
        if let Some(sink) = &self.sink {
            // Serialization of a LogEntry cannot fail; a write error must not
            // take the run down, so it degrades to a tracing warning.
            if let Ok(line) = serde_json::to_string(&entry) {
                let mut file = sink.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(err) = writeln!(file, "{}", line) {
                    tracing::warn!(error = %err, "run log file write failed");
                }
            }
        }
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of requests dispatched to the backend so far.
    pub fn request_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.kind == LogKind::Request)
            .count()
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::in_memory()
    }
}
