//! Durable run output: the JSON array of committed records and the
//! append-only run log. Both survive crashes and feed later resumes.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::info;
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::extractor::FlatRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("stored data is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The single JSON array every run of a query appends to.
pub struct OutputStore {
    path: PathBuf,
}

impl OutputStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        OutputStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `records` to the array on disk. The whole array is rewritten
    /// into a temp file in the same directory and renamed over the target,
    /// so a crash mid-write never leaves a truncated or invalid file.
    /// A missing or empty file counts as an empty array; a file that holds
    /// anything else fails the append and is left untouched.
    pub fn append_records(&self, records: &[FlatRecord]) -> Result<(), StoreError> {
        let mut all = self.read_existing()?;
        for record in records {
            all.push(serde_json::to_value(record)?);
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let json = serde_json::to_string_pretty(&all)?;
        let tmp = NamedTempFile::new_in(dir)?;
        tmp.as_file().write_all(json.as_bytes())?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    fn read_existing(&self) -> Result<Vec<Value>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    SessionStart,
    Success,
    Retry,
    Error,
    NewSession,
    Stopped,
    Completed,
}

impl LogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStatus::SessionStart => "SESSION_START",
            LogStatus::Success => "SUCCESS",
            LogStatus::Retry => "RETRY",
            LogStatus::Error => "ERROR",
            LogStatus::NewSession => "NEW_SESSION",
            LogStatus::Stopped => "STOPPED",
            LogStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the `Page:` column of a log entry shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLabel {
    Start,
    Page(u32),
    Range(u32, u32),
}

impl fmt::Display for PageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageLabel::Start => f.write_str("START"),
            PageLabel::Page(page) => write!(f, "{page}"),
            PageLabel::Range(first, last) => write!(f, "{first}-{last}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub page: PageLabel,
    pub status: LogStatus,
    pub message: String,
}

impl LogEntry {
    pub fn new(query: &str, page: PageLabel, status: LogStatus, message: impl Into<String>) -> Self {
        LogEntry {
            timestamp: Utc::now(),
            query: query.to_string(),
            page,
            status,
            message: message.into(),
        }
    }

    /// One formatted, newline-terminated log line. The trailing message
    /// segment is omitted when the message is empty.
    pub fn to_line(&self) -> String {
        let stamp = self.timestamp.format("%Y-%m-%d %H:%M:%S");
        if self.message.is_empty() {
            format!(
                "{stamp} UTC | Query: {} | Page: {} | Status: {}\n",
                self.query, self.page, self.status
            )
        } else {
            format!(
                "{stamp} UTC | Query: {} | Page: {} | Status: {} | {}\n",
                self.query, self.page, self.status, self.message
            )
        }
    }
}

/// Append-only, line-oriented history of run events.
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RunLog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, flushed before returning. The line is mirrored to
    /// the process log so a live run stays observable on the console.
    pub fn append(&self, entry: &LogEntry) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let line = entry.to_line();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        info!("{}", line.trim_end());
        Ok(())
    }
}
