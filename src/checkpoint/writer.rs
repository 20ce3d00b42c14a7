//! Row-sharded record writer with ordered sealing
//!
//! Records are appended to `row-<r>.ndjson` as they arrive. Once every
//! coordinate of the lowest unsealed row is terminal, the file is rewritten
//! sorted by column and the checkpoint moves past it.

use crate::checkpoint::rows::RowTracker;
use crate::checkpoint::state::{write_atomic, Checkpoint, CheckpointFile};
use crate::error::PersistError;
use crate::fetch::Persister;
use crate::grid::{Coordinate, GridSpace, WorkSource};
use crate::sched::task::ResultCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Safety-net checkpoint period between seals
pub const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(15);

/// One line of a row file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowLine<T> {
    pub col: u32,
    pub record: T,
}

#[derive(Debug)]
struct RowState {
    tracker: RowTracker,
    /// Highest dispatch frontier reported by the scheduler
    frontier: u64,
    last_checkpoint: Instant,
}

/// [`Persister`] for the row-sealed sweep
#[derive(Debug)]
pub struct RowShardWriter {
    dir: PathBuf,
    checkpoint: CheckpointFile,
    space: GridSpace,
    resume_row: u32,
    checkpoint_every: Duration,
    state: Mutex<RowState>,
}

impl RowShardWriter {
    /// Load the checkpoint and discard every row buffer that was not sealed,
    /// since those rows are requested again from scratch.
    pub fn open(
        dir: impl Into<PathBuf>,
        checkpoint: CheckpointFile,
        space: GridSpace,
    ) -> Result<Self, PersistError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| PersistError::io(&dir, e))?;

        let saved = checkpoint.load(space);
        let resume_row = saved.resume_row(space);
        let discarded = discard_unsealed(&dir, resume_row)?;

        info!(
            resume_row,
            last_sealed = ?saved.last_sealed_row_index,
            index = saved.sealed_boundary(space),
            total = space.len(),
            discarded,
            "resuming row sweep"
        );

        Ok(Self {
            dir,
            checkpoint,
            space,
            resume_row,
            checkpoint_every: CHECKPOINT_INTERVAL,
            state: Mutex::new(RowState {
                tracker: RowTracker::new(space, saved.last_sealed_row_index),
                frontier: saved.sealed_boundary(space),
                last_checkpoint: Instant::now(),
            }),
        })
    }

    pub fn with_checkpoint_interval(mut self, every: Duration) -> Self {
        self.checkpoint_every = every;
        self
    }

    pub fn resume_row(&self) -> u32 {
        self.resume_row
    }

    /// Work source covering only rows that are not sealed yet
    pub fn source<C: Coordinate>(&self) -> WorkSource<C> {
        WorkSource::starting_at_row(self.space, self.resume_row)
    }

    pub fn row_path(&self, row: u32) -> PathBuf {
        row_path(&self.dir, row)
    }

    pub fn last_sealed(&self) -> Option<u32> {
        self.lock().tracker.last_sealed()
    }

    fn lock(&self) -> MutexGuard<'_, RowState> {
        // A poisoned lock only means a panic elsewhere; the counters are still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn append(&self, row: u32, line: &str) -> Result<(), PersistError> {
        let path = self.row_path(row);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| PersistError::io(&path, e))?;
        writeln!(file, "{}", line).map_err(|e| PersistError::io(&path, e))
    }

    /// Seal every consecutive ready row
    fn seal_ready(&self, state: &mut RowState) {
        // Blocking file I/O on the control loop. A row is at most one grid
        // width of short lines, so a seal stays in the millisecond range.
        while let Some(row) = state.tracker.next_sealable() {
            match seal_row(&self.row_path(row)) {
                Ok(records) => {
                    state.tracker.mark_sealed(row);
                    info!(row, records, "row complete & sorted");
                    self.save_checkpoint(state);
                }
                Err(e) => {
                    // Retried on the next tick.
                    error!(row, error = %e, "could not seal row");
                    break;
                }
            }
        }
    }

    fn save_checkpoint(&self, state: &mut RowState) {
        let sealed = Checkpoint {
            last_sealed_row_index: state.tracker.last_sealed(),
            next_unprocessed_index: 0,
        };
        let checkpoint = Checkpoint {
            next_unprocessed_index: state
                .frontier
                .max(sealed.sealed_boundary(self.space))
                .min(self.space.len()),
            ..sealed
        };

        match self.checkpoint.save(&checkpoint) {
            Ok(()) => state.last_checkpoint = Instant::now(),
            Err(e) => warn!(error = %e, "could not write checkpoint"),
        }
    }
}

#[async_trait]
impl<C, R> Persister<C, R> for RowShardWriter
where
    C: Coordinate,
    R: Serialize + Send + 'static,
{
    async fn persist(&self, coord: &C, record: R) -> Result<(), PersistError> {
        let line = serde_json::to_string(&RowLine {
            col: coord.col(),
            record,
        })?;
        self.append(coord.row(), &line)
    }

    fn on_terminal(&self, coord: &C, _code: &ResultCode, frontier: u64) {
        let mut state = self.lock();
        state.frontier = state.frontier.max(frontier);
        if state.tracker.record(coord.row()) {
            self.seal_ready(&mut state);
        }
    }

    fn on_tick(&self, frontier: u64) {
        let mut state = self.lock();
        state.frontier = state.frontier.max(frontier);
        self.seal_ready(&mut state);
        if state.last_checkpoint.elapsed() >= self.checkpoint_every {
            self.save_checkpoint(&mut state);
        }
    }

    fn finish(&self) {
        let mut state = self.lock();
        self.seal_ready(&mut state);
        self.save_checkpoint(&mut state);
        if !state.tracker.all_sealed() {
            warn!(last_sealed = ?state.tracker.last_sealed(), "sweep ended with unsealed rows");
        }
    }
}

fn row_path(dir: &Path, row: u32) -> PathBuf {
    dir.join(format!("row-{}.ndjson", row))
}

fn parse_row_file_name(name: &str) -> Option<u32> {
    name.strip_prefix("row-")?.strip_suffix(".ndjson")?.parse().ok()
}

/// Remove `row-<r>.ndjson` for every `r >= resume_row`
fn discard_unsealed(dir: &Path, resume_row: u32) -> Result<usize, PersistError> {
    let mut removed = 0;
    let entries = std::fs::read_dir(dir).map_err(|e| PersistError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PersistError::io(dir, e))?;
        let name = entry.file_name();
        let Some(row) = name.to_str().and_then(parse_row_file_name) else {
            continue;
        };
        if row >= resume_row {
            let path = entry.path();
            std::fs::remove_file(&path).map_err(|e| PersistError::io(&path, e))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Rewrite a row file sorted by column, dropping lines that do not parse.
/// Returns the number of records kept.
fn seal_row(path: &Path) -> Result<usize, PersistError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(PersistError::io(path, e)),
    };

    let mut lines: Vec<RowLine<serde_json::Value>> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    lines.sort_by_key(|line| line.col);

    let mut body = String::new();
    for line in &lines {
        body.push_str(&serde_json::to_string(line)?);
        body.push('\n');
    }
    write_atomic(path, body.as_bytes())?;
    Ok(lines.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::state::CHECKPOINT_FILE;
    use crate::error::FetchError;
    use crate::fetch::{Fetched, Fetcher};
    use crate::grid::TileCoord;
    use crate::proxy::{ClientSettings, PooledProxy, ProxyEndpoint, ProxyPool};
    use crate::sched::{ErrorLog, RetryPolicy, Scheduler, SchedulerConfig};
    use serde_json::json;
    use std::sync::Arc;

    const DONE: ResultCode = ResultCode::Stored { status: 200 };

    fn open(dir: &Path, space: GridSpace) -> RowShardWriter {
        RowShardWriter::open(
            dir.join("rows"),
            CheckpointFile::new(dir.join(CHECKPOINT_FILE)),
            space,
        )
        .unwrap()
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    async fn complete(writer: &RowShardWriter, coord: TileCoord) {
        Persister::<TileCoord, serde_json::Value>::persist(writer, &coord, json!({ "at": coord.to_string() }))
            .await
            .unwrap();
        Persister::<TileCoord, serde_json::Value>::on_terminal(writer, &coord, &DONE, 0);
    }

    #[tokio::test]
    async fn test_seals_sorted_rows_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let writer = open(dir.path(), GridSpace::new(0, 1, 0, 2));

        // Row 1 finishes first but cannot seal before row 0.
        for col in [2, 0, 1] {
            complete(&writer, TileCoord::new(1, col)).await;
        }
        assert_eq!(writer.last_sealed(), None);

        complete(&writer, TileCoord::new(0, 1)).await;
        complete(&writer, TileCoord::new(0, 2)).await;
        assert_eq!(writer.last_sealed(), None);
        complete(&writer, TileCoord::new(0, 0)).await;
        assert_eq!(writer.last_sealed(), Some(1));

        let cols: Vec<u64> = read_lines(&writer.row_path(1))
            .iter()
            .map(|line| line["col"].as_u64().unwrap())
            .collect();
        assert_eq!(cols, vec![0, 1, 2]);

        let saved = CheckpointFile::new(dir.path().join(CHECKPOINT_FILE))
            .load(GridSpace::new(0, 1, 0, 2));
        assert_eq!(saved.last_sealed_row_index, Some(1));
    }

    #[tokio::test]
    async fn test_failed_items_still_complete_rows() {
        let dir = tempfile::tempdir().unwrap();
        let writer = open(dir.path(), GridSpace::new(0, 0, 0, 1));

        complete(&writer, TileCoord::new(0, 0)).await;
        Persister::<TileCoord, serde_json::Value>::on_terminal(
            &writer,
            &TileCoord::new(0, 1),
            &ResultCode::ServerError { status: 500 },
            2,
        );

        assert_eq!(writer.last_sealed(), Some(0));
        assert_eq!(read_lines(&writer.row_path(0)).len(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_index_covers_dispatched_items() {
        let dir = tempfile::tempdir().unwrap();
        let space = GridSpace::new(0, 3, 0, 2);
        let checkpoint = CheckpointFile::new(dir.path().join(CHECKPOINT_FILE));
        let writer = open(dir.path(), space).with_checkpoint_interval(Duration::ZERO);

        // Six items handed out, only one of them finished.
        let coord = TileCoord::new(0, 0);
        Persister::<TileCoord, serde_json::Value>::persist(&writer, &coord, json!(1))
            .await
            .unwrap();
        Persister::<TileCoord, serde_json::Value>::on_terminal(&writer, &coord, &DONE, 6);
        Persister::<TileCoord, serde_json::Value>::on_tick(&writer, 6);
        let saved = checkpoint.load(space);
        assert_eq!(saved.last_sealed_row_index, None);
        assert!(saved.next_unprocessed_index >= 6);

        // Sealing row 0 with the frontier at 9 records 9, not the row boundary.
        for col in [1, 2] {
            let coord = TileCoord::new(0, col);
            Persister::<TileCoord, serde_json::Value>::on_terminal(&writer, &coord, &DONE, 9);
        }
        let saved = checkpoint.load(space);
        assert_eq!(saved.last_sealed_row_index, Some(0));
        assert_eq!(saved.next_unprocessed_index, 9);

        // A stale frontier never moves the index back.
        Persister::<TileCoord, serde_json::Value>::on_tick(&writer, 4);
        assert_eq!(checkpoint.load(space).next_unprocessed_index, 9);
    }

    #[test]
    fn test_seal_drops_unparseable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("row-0.ndjson");
        std::fs::write(
            &path,
            "{\"col\":5,\"record\":\"e\"}\nnot json\n{\"col\":1,\"record\":\"a\"}\n{\"col\":1,\"record\":\"b\"}\n",
        )
        .unwrap();

        assert_eq!(seal_row(&path).unwrap(), 3);
        let records: Vec<String> = read_lines(&path)
            .iter()
            .map(|line| line["record"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(records, vec!["a", "b", "e"]);
    }

    #[test]
    fn test_open_discards_unsealed_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let rows = dir.path().join("rows");
        std::fs::create_dir_all(&rows).unwrap();
        std::fs::write(rows.join("row-0.ndjson"), "{\"col\":0,\"record\":1}\n").unwrap();
        std::fs::write(rows.join("row-1.ndjson"), "{\"col\":3,\"record\":1}\n").unwrap();
        std::fs::write(rows.join("row-2.ndjson"), "{\"col\":0,\"record\":1}\n").unwrap();
        std::fs::write(rows.join("notes.txt"), "keep").unwrap();
        CheckpointFile::new(dir.path().join(CHECKPOINT_FILE))
            .save(&Checkpoint {
                last_sealed_row_index: Some(0),
                next_unprocessed_index: 7,
            })
            .unwrap();

        let writer = open(dir.path(), GridSpace::new(0, 3, 0, 3));

        assert_eq!(writer.resume_row(), 1);
        assert!(rows.join("row-0.ndjson").exists());
        assert!(!rows.join("row-1.ndjson").exists());
        assert!(!rows.join("row-2.ndjson").exists());
        assert!(rows.join("notes.txt").exists());

        let first = writer.source::<TileCoord>().next();
        assert_eq!(first, Some(TileCoord::new(1, 0)));
    }

    #[test]
    fn test_parse_row_file_name() {
        assert_eq!(parse_row_file_name("row-12.ndjson"), Some(12));
        assert_eq!(parse_row_file_name("row-12.ndjson.tmp"), None);
        assert_eq!(parse_row_file_name("tileY-3.jsonl"), None);
    }

    /// Records every row it is asked for; never fails
    #[derive(Default)]
    struct RowRecordingFetcher {
        rows: std::sync::Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl Fetcher<TileCoord> for RowRecordingFetcher {
        type Payload = u32;

        async fn fetch(
            &self,
            coord: &TileCoord,
            _proxy: &PooledProxy,
        ) -> Result<Fetched<u32>, FetchError> {
            self.rows.lock().unwrap().push(coord.x);
            Ok(Fetched::Payload {
                status: 200,
                payload: coord.x * 100 + coord.y,
            })
        }
    }

    #[tokio::test]
    async fn test_resumed_sweep_skips_sealed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let space = GridSpace::new(0, 3, 0, 2);
        let pool = Arc::new(
            ProxyPool::from_endpoints(
                vec![ProxyEndpoint::new("127.0.0.1", 9)],
                ClientSettings::default(),
            )
            .unwrap(),
        );
        let config = SchedulerConfig::new()
            .with_concurrency(2)
            .with_poll_interval(Duration::from_millis(5))
            .with_retry(RetryPolicy::new().with_jitter(Duration::ZERO));

        // A previous run sealed rows 0 and 1 and left half of row 2 behind.
        let checkpoint = CheckpointFile::new(dir.path().join(CHECKPOINT_FILE));
        checkpoint
            .save(&Checkpoint {
                last_sealed_row_index: Some(1),
                next_unprocessed_index: 7,
            })
            .unwrap();
        let rows = dir.path().join("rows");
        std::fs::create_dir_all(&rows).unwrap();
        std::fs::write(rows.join("row-2.ndjson"), "{\"col\":1,\"record\":201}\n").unwrap();

        let writer = Arc::new(open(dir.path(), space));
        let fetcher = Arc::new(RowRecordingFetcher::default());
        let stats = Scheduler::new(
            config,
            writer.source::<TileCoord>(),
            pool,
            Arc::clone(&fetcher),
            Arc::clone(&writer),
            ErrorLog::discard(),
        )
        .run()
        .await;

        assert_eq!(stats.done, 6);
        let requested = fetcher.rows.lock().unwrap().clone();
        assert!(requested.iter().all(|row| *row >= 2));
        assert_eq!(requested.len(), 6);

        // Row 2 was redone from scratch, so no duplicate of the stale line.
        let row2: Vec<u64> = read_lines(&writer.row_path(2))
            .iter()
            .map(|line| line["col"].as_u64().unwrap())
            .collect();
        assert_eq!(row2, vec![0, 1, 2]);
        assert_eq!(checkpoint.load(space).last_sealed_row_index, Some(3));
        assert_eq!(checkpoint.load(space).next_unprocessed_index, 12);
    }
}
