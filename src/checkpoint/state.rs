//! The persisted checkpoint record

use crate::error::PersistError;
use crate::grid::GridSpace;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default checkpoint file name
pub const CHECKPOINT_FILE: &str = "regions.checkpoint.json";

/// Highest row already sealed, plus an informational progress index.
///
/// Only `last_sealed_row_index` decides where a sweep resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub last_sealed_row_index: Option<u32>,
    pub next_unprocessed_index: u64,
}

impl Checkpoint {
    pub fn fresh() -> Self {
        Self {
            last_sealed_row_index: None,
            next_unprocessed_index: 0,
        }
    }

    /// First row that still needs work
    pub fn resume_row(&self, space: GridSpace) -> u32 {
        self.last_sealed_row_index
            .map_or(space.min_row, |row| row.saturating_add(1))
    }

    /// Linear index just past the last sealed row
    pub fn sealed_boundary(&self, space: GridSpace) -> u64 {
        space.row_start(self.resume_row(space)).min(space.len())
    }

    /// Rebuild from loosely typed JSON, repairing what does not fit `space`
    fn from_value(value: &Value, space: GridSpace) -> Self {
        let last_sealed_row_index = value
            .get("lastSealedRowIndex")
            .and_then(Value::as_i64)
            .and_then(|row| {
                if row < i64::from(space.min_row) {
                    None
                } else {
                    Some(row.min(i64::from(space.max_row)) as u32)
                }
            });

        let mut checkpoint = Self {
            last_sealed_row_index,
            next_unprocessed_index: 0,
        };

        let total = space.len();
        checkpoint.next_unprocessed_index = match value
            .get("nextUnprocessedIndex")
            .and_then(Value::as_u64)
        {
            Some(index) if index < total => index,
            _ => checkpoint.sealed_boundary(space),
        };
        checkpoint
    }
}

/// Checkpoint file written by temp file and rename
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files start a fresh sweep
    pub fn load(&self, space: GridSpace) -> Checkpoint {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Checkpoint::fresh(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not read checkpoint, starting fresh");
                return Checkpoint::fresh();
            }
        };

        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Checkpoint::from_value(&value, space),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt checkpoint, starting fresh");
                Checkpoint::fresh()
            }
        }
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), PersistError> {
        let body = serde_json::to_string(checkpoint)?;
        write_atomic(&self.path, body.as_bytes())
    }
}

/// Replace `path` so readers see either the old or the new content
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), PersistError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, contents).map_err(|e| PersistError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| PersistError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> GridSpace {
        GridSpace::new(0, 9, 0, 99)
    }

    fn load(text: &str) -> Checkpoint {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        std::fs::write(&path, text).unwrap();
        CheckpointFile::new(path).load(space())
    }

    #[test]
    fn test_missing_file_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let file = CheckpointFile::new(dir.path().join(CHECKPOINT_FILE));
        assert_eq!(file.load(space()), Checkpoint::fresh());
        assert_eq!(Checkpoint::fresh().resume_row(space()), 0);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = CheckpointFile::new(dir.path().join(CHECKPOINT_FILE));
        let checkpoint = Checkpoint {
            last_sealed_row_index: Some(3),
            next_unprocessed_index: 450,
        };
        file.save(&checkpoint).unwrap();

        assert_eq!(file.load(space()), checkpoint);
        assert_eq!(checkpoint.resume_row(space()), 4);
        let text = std::fs::read_to_string(file.path()).unwrap();
        assert!(text.contains("\"lastSealedRowIndex\":3"));
        assert!(!dir.path().join("regions.checkpoint.json.tmp").exists());
    }

    #[test]
    fn test_out_of_range_index_is_rederived() {
        let checkpoint = load(r#"{"lastSealedRowIndex": 2, "nextUnprocessedIndex": 99999}"#);
        assert_eq!(checkpoint.next_unprocessed_index, 300);

        let checkpoint = load(r#"{"lastSealedRowIndex": 2}"#);
        assert_eq!(checkpoint.next_unprocessed_index, 300);

        let checkpoint = load(r#"{"lastSealedRowIndex": 2, "nextUnprocessedIndex": "x"}"#);
        assert_eq!(checkpoint.next_unprocessed_index, 300);
    }

    #[test]
    fn test_negative_or_null_row_means_nothing_sealed() {
        assert_eq!(load(r#"{"lastSealedRowIndex": -1}"#).last_sealed_row_index, None);
        assert_eq!(load(r#"{"lastSealedRowIndex": null}"#).last_sealed_row_index, None);
    }

    #[test]
    fn test_garbage_is_fresh() {
        assert_eq!(load("{not json"), Checkpoint::fresh());
    }

    #[test]
    fn test_fully_sealed_resumes_past_end() {
        let checkpoint = load(r#"{"lastSealedRowIndex": 9, "nextUnprocessedIndex": 1000}"#);
        assert_eq!(checkpoint.resume_row(space()), 10);
        assert_eq!(checkpoint.next_unprocessed_index, 1000);
    }
}
