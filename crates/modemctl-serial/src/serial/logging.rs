//! Session transcript capture.
//!
//! Every command sent to the modem is recorded twice: once as pending
//! right after the write, and once with the response after the read.
//! Transcript failures are logged and swallowed; they never interrupt a
//! session.

use chrono::{DateTime, Local};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Line written in place of a response that has not been read yet.
pub const PENDING_RESPONSE: &str = "Waiting for response...";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Transcript entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single transcript record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Local>,
    pub command: String,
    /// `None` while the response is still pending.
    pub response: Option<String>,
}

impl TranscriptEntry {
    pub fn new(command: &str, response: Option<&str>) -> Self {
        Self {
            timestamp: Local::now(),
            command: command.to_string(),
            response: response.map(str::to_string),
        }
    }
}

/// Format an entry as transcript file text, blank separator line included.
pub fn format_entry(entry: &TranscriptEntry) -> String {
    let ts = entry.timestamp.format("%Y-%m-%d %H:%M:%S");
    let second = match entry.response.as_deref() {
        Some(response) if !response.is_empty() => format!("{} - Response: {}", ts, response),
        _ => format!("{} - {}", ts, PENDING_RESPONSE),
    };
    format!("{} - Command: {}\n{}\n\n", ts, entry.command, second)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Sinks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append-only destination for transcript entries.
pub trait TranscriptSink: Send + Sync {
    fn record(&self, command: &str, response: Option<&str>);
}

/// Appends entries to a text file.
pub struct TranscriptWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TranscriptWriter {
    /// Transcript file name inside the log directory.
    pub const FILE_NAME: &'static str = "modem_log.txt";

    /// Writer for `<log_dir>/modem_log.txt`, creating the directory.
    pub fn in_dir(log_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        Ok(Self::new(log_dir.join(Self::FILE_NAME)))
    }

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, text: &str) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(text.as_bytes())
    }
}

impl TranscriptSink for TranscriptWriter {
    fn record(&self, command: &str, response: Option<&str>) {
        let entry = TranscriptEntry::new(command, response);
        if let Err(e) = self.append(&format_entry(&entry)) {
            log::error!(
                "[transcript] failed to write {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryTranscript {
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl MemoryTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

impl TranscriptSink for MemoryTranscript {
    fn record(&self, command: &str, response: Option<&str>) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(TranscriptEntry::new(command, response)),
            Err(e) => log::error!("[transcript] memory transcript poisoned: {}", e),
        }
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullTranscript;

impl TranscriptSink for NullTranscript {
    fn record(&self, _command: &str, _response: Option<&str>) {}
}
