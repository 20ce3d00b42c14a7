//! Run summary written once all split workers have exited

use crate::error::PersistError;
use crate::sched::progress::format_duration;
use crate::split::monitor::WorkerExit;
use crate::TileBounds;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

static ARCHIVE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^tiles-(\d+)\.7z$").expect("Invalid archive name regex"));

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub elapsed_formatted: String,
    pub splits: usize,
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
    pub total_files_checked: u64,
    pub total_files_made: u64,
    pub archive_index: u32,
    pub workers: Vec<WorkerExit>,
}

impl RunSummary {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
        splits: usize,
        bounds: TileBounds,
        total_files_checked: u64,
        total_files_made: u64,
        archive_index: u32,
        workers: Vec<WorkerExit>,
    ) -> Self {
        let elapsed = (finished - started).to_std().unwrap_or_default();
        Self {
            run_id: Uuid::new_v4(),
            started,
            finished,
            elapsed_ms: elapsed.as_millis() as u64,
            elapsed_formatted: format_duration(elapsed),
            splits,
            min_x: bounds.min_x,
            max_x: bounds.max_x,
            min_y: bounds.min_y,
            max_y: bounds.max_y,
            total_files_checked,
            total_files_made,
            archive_index,
            workers,
        }
    }

    /// `run-2025-08-14T10-20-30-123Z.json`
    pub fn file_name(&self) -> String {
        format!("run-{}.json", self.finished.format("%Y-%m-%dT%H-%M-%S-%3fZ"))
    }

    pub fn write(&self, logs_dir: &Path) -> Result<PathBuf, PersistError> {
        std::fs::create_dir_all(logs_dir).map_err(|e| PersistError::io(logs_dir, e))?;
        let path = logs_dir.join(self.file_name());
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, body).map_err(|e| PersistError::io(&path, e))?;
        Ok(path)
    }
}

/// One past the highest `tiles-N.7z` in `dir`, or 1 when there is none
pub fn next_archive_index(dir: &Path) -> u32 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 1;
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let caps = ARCHIVE_NAME.captures(name.to_str()?)?;
            caps[1].parse::<u32>().ok()
        })
        .max()
        .map_or(1, |highest| highest.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_archive_index() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_archive_index(dir.path()), 1);

        for name in ["tiles-1.7z", "tiles-12.7z", "tiles-3.7z", "tiles-99.zip", "notes-50.7z"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(next_archive_index(dir.path()), 13);
        assert_eq!(next_archive_index(&dir.path().join("missing")), 1);
    }

    #[test]
    fn test_summary_fields() {
        let started = Utc.with_ymd_and_hms(2025, 8, 14, 10, 0, 0).unwrap();
        let finished = Utc.with_ymd_and_hms(2025, 8, 14, 12, 5, 0).unwrap();
        let summary = RunSummary::new(started, finished, 6, TileBounds::default(), 900, 400, 4, Vec::new());

        assert_eq!(summary.elapsed_ms, 7_500_000);
        assert_eq!(summary.elapsed_formatted, "2h 5m");
        assert_eq!(summary.file_name(), "run-2025-08-14T12-05-00-000Z.json");

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["totalFilesMade"], 400);
        assert_eq!(json["archiveIndex"], 4);
        assert_eq!(json["maxX"], 2047);
        assert!(json["runId"].is_string());
    }

    #[test]
    fn test_write_creates_logs_dir() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let summary = RunSummary::new(now, now, 1, TileBounds::default(), 0, 0, 1, Vec::new());
        let path = summary.write(&dir.path().join("logs")).unwrap();
        assert!(path.exists());
    }
}
