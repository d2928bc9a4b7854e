//! Durable, append-only log of update activity.
//!
//! Every entry is mirrored to `tracing` and, for [`FileLogSink`], appended as
//! one JSON line to the log store file.

use std::error::Error;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Information,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub message: String,
    pub level: Severity,
    /// Rendered error source chain, one cause per line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    pub timestamp: DateTime<Local>,
}

impl LogEntry {
    pub fn information(message: impl Into<String>) -> Self {
        Self::new(message.into(), Severity::Information, None)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message.into(), Severity::Error, None)
    }

    /// An `ERROR` entry whose message is the error's display text and whose
    /// stack trace lists its sources.
    pub fn from_error(err: &(dyn Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        let stack_trace = (!causes.is_empty()).then(|| causes.join("\n"));
        Self::new(err.to_string(), Severity::Error, stack_trace)
    }

    fn new(message: String, level: Severity, stack_trace: Option<String>) -> Self {
        Self {
            message,
            level,
            stack_trace,
            timestamp: Local::now(),
        }
    }
}

/// Append-only sink for [`LogEntry`] values.
///
/// Logging never fails the caller; implementations report their own write
/// errors through `tracing`.
pub trait LogSink: Send + Sync {
    fn log(&self, entry: LogEntry);
}

/// Appends entries as NDJSON to a file.
#[derive(Debug)]
pub struct FileLogSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileLogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Blocking write on the caller's thread. Entries are one per record and
    // per cycle, small enough not to stall the runtime.
    fn append(&self, entry: &LogEntry) -> std::io::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

impl LogSink for FileLogSink {
    fn log(&self, entry: LogEntry) {
        emit(&entry);
        if let Err(e) = self.append(&entry) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to append to log store"
            );
        }
    }
}

fn emit(entry: &LogEntry) {
    match entry.level {
        Severity::Information => tracing::info!(target: "tax_update_log", "{}", entry.message),
        Severity::Error => tracing::error!(
            target: "tax_update_log",
            stack_trace = entry.stack_trace.as_deref().unwrap_or_default(),
            "{}",
            entry.message
        ),
    }
}
