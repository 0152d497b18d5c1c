//! Session Log Export
//!
//! One JSON object per closed session, appended to `oitls-sessions.log`
//! with size-based rotation.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

use oitls_shared::events::{Event, EventSink, SessionId, SessionSummary};

const LOG_NAME: &str = "oitls-sessions";

/// Session log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogExportConfig {
    /// Log directory
    pub dir: PathBuf,
    /// Max file size before rotation (bytes)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Max number of rotated files to keep
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_max_file_size() -> u64 {
    64 * 1024 * 1024
}

fn default_max_files() -> usize {
    10
}

impl LogExportConfig {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            max_file_size: default_max_file_size(),
            max_files: default_max_files(),
        }
    }
}

/// A closed session as written to the log
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry<'a> {
    pub timestamp: String,
    pub session: SessionId,
    #[serde(flatten)]
    pub summary: &'a SessionSummary,
}

struct Output {
    file: Option<File>,
    size: u64,
}

/// Writes closed sessions to disk
pub struct LogExporter {
    config: LogExportConfig,
    output: Mutex<Output>,
}

impl LogExporter {
    pub fn new(config: LogExportConfig) -> Self {
        if let Err(e) = std::fs::create_dir_all(&config.dir) {
            warn!(dir = %config.dir.display(), error = %e, "Failed to create session log directory");
        }
        Self {
            config,
            output: Mutex::new(Output { file: None, size: 0 }),
        }
    }

    fn path(&self, generation: usize) -> PathBuf {
        if generation == 0 {
            self.config.dir.join(format!("{}.log", LOG_NAME))
        } else {
            self.config.dir.join(format!("{}.{}.log", LOG_NAME, generation))
        }
    }

    fn write(&self, session: SessionId, summary: &SessionSummary) {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            session,
            summary,
        };
        let line = match serde_json::to_string(&entry) {
            Ok(json) => format!("{}\n", json),
            Err(e) => {
                warn!(error = %e, "Failed to encode session log entry");
                return;
            }
        };
        let line_len = line.len() as u64;

        let mut out = self.output.lock().unwrap_or_else(|p| p.into_inner());

        if out.file.is_some() && out.size + line_len > self.config.max_file_size {
            out.file = None;
            self.rotate();
        }

        if out.file.is_none() {
            let path = self.path(0);
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(f) => {
                    out.size = f.metadata().map(|m| m.len()).unwrap_or(0);
                    out.file = Some(f);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to open session log");
                    return;
                }
            }
        }

        let written = match out.file.as_mut() {
            Some(f) => f.write_all(line.as_bytes()),
            None => return,
        };
        match written {
            Ok(()) => out.size += line_len,
            Err(e) => {
                warn!(path = %self.path(0).display(), error = %e, "Failed to write session log");
                // Reopen on the next entry
                out.file = None;
            }
        }
    }

    /// oitls-sessions.log -> .1.log -> .2.log ... dropping the oldest
    fn rotate(&self) {
        let _ = std::fs::remove_file(self.path(self.config.max_files));
        for generation in (1..self.config.max_files).rev() {
            let _ = std::fs::rename(self.path(generation), self.path(generation + 1));
        }
        let _ = std::fs::rename(self.path(0), self.path(1));
    }
}

impl EventSink for LogExporter {
    fn emit(&self, session: SessionId, event: &Event) {
        if let Event::Closed(summary) = event {
            self.write(session, summary);
        }
    }
}
