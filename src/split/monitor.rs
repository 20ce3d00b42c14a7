//! Aggregation of worker output lines

use crate::sched::progress::{format_duration, FinalLine, ProgressLine};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// One line or lifecycle change from a worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Stdout { worker: usize, line: String },
    Stderr { worker: usize, line: String },
    Exited { worker: usize, code: Option<i32> },
}

/// Sum of all running workers' latest progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CombinedLine {
    pub per_second: u64,
    pub active: u64,
    pub remaining: u64,
    pub files: u64,
    pub fails: u64,
    /// Average of the workers' estimates
    pub eta: Duration,
}

impl fmt::Display for CombinedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "COMBINED: {} per second, {} active, {} remaining, {} files, {} fails, est {}",
            self.per_second,
            self.active,
            self.remaining,
            self.files,
            self.fails,
            format_duration(self.eta)
        )
    }
}

/// How one worker ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerExit {
    pub worker: usize,
    pub min_x: u32,
    pub max_x: u32,
    pub exit_code: Option<i32>,
    pub done: Option<u64>,
    pub failed: Option<u64>,
    pub files: Option<u64>,
}

/// Exact totals once every worker has exited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitTotals {
    pub checked: u64,
    pub files: u64,
}

#[derive(Debug)]
struct WorkerState {
    range: (u32, u32),
    progress: Option<ProgressLine>,
    final_line: Option<FinalLine>,
    exit: Option<Option<i32>>,
}

/// Per-worker state keyed by worker index; fed only by parsed text lines
#[derive(Debug, Default)]
pub struct SplitMonitor {
    workers: BTreeMap<usize, WorkerState>,
}

impl SplitMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_worker(&mut self, worker: usize, range: (u32, u32)) {
        self.workers.insert(
            worker,
            WorkerState {
                range,
                progress: None,
                final_line: None,
                exit: None,
            },
        );
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Feed one stdout line. Progress lines are absorbed; anything else comes
    /// back prefixed with the worker index for pass-through.
    pub fn observe_stdout(&mut self, worker: usize, line: &str) -> Option<String> {
        let state = self.workers.get_mut(&worker)?;

        if let Ok(progress) = line.parse::<ProgressLine>() {
            state.progress = Some(progress);
            return None;
        }
        if let Ok(final_line) = line.parse::<FinalLine>() {
            state.final_line = Some(final_line);
        }
        Some(format!("Child {}: {}", worker, line))
    }

    pub fn record_exit(&mut self, worker: usize, code: Option<i32>) {
        if let Some(state) = self.workers.get_mut(&worker) {
            state.exit = Some(code);
        }
    }

    pub fn all_exited(&self) -> bool {
        self.workers.values().all(|state| state.exit.is_some())
    }

    /// Combined line over workers still running, `None` before any progress
    pub fn combined(&self) -> Option<CombinedLine> {
        let live: Vec<&ProgressLine> = self
            .workers
            .values()
            .filter(|state| state.exit.is_none())
            .filter_map(|state| state.progress.as_ref())
            .collect();
        if live.is_empty() {
            return None;
        }

        let eta_ms: u128 = live.iter().map(|p| p.eta.as_millis()).sum::<u128>() / live.len() as u128;
        Some(CombinedLine {
            per_second: live.iter().map(|p| p.per_second).sum(),
            active: live.iter().map(|p| p.active).sum(),
            remaining: live.iter().map(|p| p.remaining).sum(),
            files: live.iter().map(|p| p.files).sum(),
            fails: live.iter().map(|p| p.failed).sum(),
            eta: Duration::from_millis(eta_ms as u64),
        })
    }

    /// Workers without a final line fall back to their last progress line
    pub fn totals(&self) -> SplitTotals {
        self.workers
            .values()
            .fold(SplitTotals::default(), |mut totals, state| {
                match (&state.final_line, &state.progress) {
                    (Some(done), _) => {
                        totals.checked += done.done + done.failed;
                        totals.files += done.files;
                    }
                    (None, Some(progress)) => totals.files += progress.files,
                    (None, None) => {}
                }
                totals
            })
    }

    pub fn exits(&self) -> Vec<WorkerExit> {
        self.workers
            .iter()
            .map(|(worker, state)| WorkerExit {
                worker: *worker,
                min_x: state.range.0,
                max_x: state.range.1,
                exit_code: state.exit.flatten(),
                done: state.final_line.map(|line| line.done),
                failed: state.final_line.map(|line| line.failed),
                files: state.final_line.map(|line| line.files),
            })
            .collect()
    }
}

/// Label a worker stderr line for the parent's stderr.
///
/// Workers log through tracing on stderr, so only lines at WARN or ERROR (and
/// anything that is not a log line, such as a panic message) count as errors.
pub fn label_stderr(worker: usize, line: &str) -> String {
    let level = line
        .split_whitespace()
        .take(2)
        .find(|token| matches!(*token, "TRACE" | "DEBUG" | "INFO" | "WARN" | "ERROR"));

    match level {
        Some("TRACE" | "DEBUG" | "INFO") => format!("Child {}: {}", worker, line),
        _ => format!("Child {} Error: {}", worker, line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> SplitMonitor {
        let mut monitor = SplitMonitor::new();
        monitor.add_worker(0, (0, 1));
        monitor.add_worker(1, (2, 3));
        monitor
    }

    #[test]
    fn test_combined_sums_and_averages_eta() {
        let mut monitor = monitor();
        assert!(monitor.combined().is_none());

        assert_eq!(
            monitor.observe_stdout(0, "10 per second, 4 active, 100 remaining, 7 files, 1 failed, est 10s"),
            None
        );
        monitor.observe_stdout(1, "5 per second, 2 active, 50 remaining, 3 files, 0 failed, est 20s");

        let combined = monitor.combined().unwrap();
        assert_eq!(combined.per_second, 15);
        assert_eq!(combined.remaining, 150);
        assert_eq!(combined.files, 10);
        assert_eq!(combined.fails, 1);
        assert_eq!(combined.eta, Duration::from_secs(15));
        assert_eq!(
            combined.to_string(),
            "COMBINED: 15 per second, 6 active, 150 remaining, 10 files, 1 fails, est 15s"
        );
    }

    #[test]
    fn test_other_lines_pass_through() {
        let mut monitor = monitor();
        assert_eq!(
            monitor.observe_stdout(1, "Reclaiming stuck task 2/9").as_deref(),
            Some("Child 1: Reclaiming stuck task 2/9")
        );
        assert_eq!(monitor.observe_stdout(7, "unknown worker"), None);
    }

    #[test]
    fn test_exit_totals_use_final_lines() {
        let mut monitor = monitor();
        monitor.observe_stdout(0, "1 per second, 0 active, 0 remaining, 6 files, 0 failed, est 0ms");
        monitor.observe_stdout(0, "All tasks finished. Done=8, Failed=0, Files=6");
        monitor.record_exit(0, Some(0));
        assert!(!monitor.all_exited());

        monitor.observe_stdout(1, "1 per second, 3 active, 5 remaining, 2 files, 0 failed, est 5s");
        let combined = monitor.combined().unwrap();
        assert_eq!(combined.files, 2);

        monitor.record_exit(1, Some(101));
        assert!(monitor.all_exited());
        assert!(monitor.combined().is_none());

        assert_eq!(monitor.totals(), SplitTotals { checked: 8, files: 8 });
        let exits = monitor.exits();
        assert_eq!(exits[0].exit_code, Some(0));
        assert_eq!(exits[0].done, Some(8));
        assert_eq!(exits[1].exit_code, Some(101));
        assert_eq!(exits[1].done, None);
    }

    #[test]
    fn test_label_stderr_by_level() {
        assert_eq!(
            label_stderr(2, "2026-10-18T09:00:00.000000Z  INFO sweep finished done=4"),
            "Child 2: 2026-10-18T09:00:00.000000Z  INFO sweep finished done=4"
        );
        assert_eq!(
            label_stderr(0, "2026-10-18T09:00:00.000000Z DEBUG dispatch"),
            "Child 0: 2026-10-18T09:00:00.000000Z DEBUG dispatch"
        );
        assert_eq!(
            label_stderr(1, "2026-10-18T09:00:00.000000Z  WARN could not write checkpoint"),
            "Child 1 Error: 2026-10-18T09:00:00.000000Z  WARN could not write checkpoint"
        );
        assert_eq!(
            label_stderr(1, "ERROR no proxies available"),
            "Child 1 Error: ERROR no proxies available"
        );
        assert_eq!(
            label_stderr(3, "thread 'main' panicked at src/main.rs:10:5: INFO"),
            "Child 3 Error: thread 'main' panicked at src/main.rs:10:5: INFO"
        );
    }
}
