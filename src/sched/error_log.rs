//! Durable log of items that exhausted their retries
//!
//! Entries are buffered by the control loop and appended to an NDJSON file on
//! the report timer, never from the request path.

use crate::error::PersistError;
use crate::sched::task::{ResultCode, WorkItem};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry<C> {
    pub coord: C,
    pub attempts: u32,
    pub result: Option<ResultCode>,
    pub error: Option<String>,
    pub failed_at: DateTime<Utc>,
}

impl<C: Clone> ErrorEntry<C> {
    pub fn from_item(item: &WorkItem<C>) -> Self {
        Self {
            coord: item.coord.clone(),
            attempts: item.attempts,
            result: item.result,
            error: item.last_error.clone(),
            failed_at: Utc::now(),
        }
    }
}

/// Buffered NDJSON sink; `None` path keeps entries in memory only
#[derive(Debug)]
pub struct ErrorLog {
    path: Option<PathBuf>,
    buffer: Vec<String>,
    written: u64,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            buffer: Vec::new(),
            written: 0,
        }
    }

    pub fn discard() -> Self {
        Self {
            path: None,
            buffer: Vec::new(),
            written: 0,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn push<C: Serialize>(&mut self, entry: &ErrorEntry<C>) -> Result<(), PersistError> {
        self.buffer.push(serde_json::to_string(entry)?);
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Entries flushed over the log's lifetime
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append buffered entries. On failure they stay buffered for the next flush.
    pub fn flush(&mut self) -> Result<(), PersistError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let Some(path) = &self.path else {
            self.written += self.buffer.len() as u64;
            self.buffer.clear();
            return Ok(());
        };

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| PersistError::io(dir, e))?;
        }

        let mut payload = self.buffer.join("\n");
        payload.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PersistError::io(path, e))?;
        file.write_all(payload.as_bytes())
            .map_err(|e| PersistError::io(path, e))?;

        self.written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }
}
