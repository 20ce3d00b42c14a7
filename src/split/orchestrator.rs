//! Launch one tile worker process per primary-axis range and watch them

use crate::sched::scheduler::REPORT_INTERVAL;
use crate::split::monitor::{label_stderr, SplitMonitor, WorkerEvent};
use crate::split::ranges::split_ranges;
use crate::split::summary::{next_archive_index, RunSummary};
use crate::{Config, Result, TileBounds};
use anyhow::Context;
use chrono::Utc;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// How to start a worker: a program plus leading arguments, to which the
/// `pull` subcommand and the worker's bounds are appended
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// This executable, configured through the environment the same way the
    /// orchestrator was
    pub fn current_exe(config: &Config) -> Result<Self> {
        let program = std::env::current_exe().context("could not locate own executable")?;
        let mut command = Self::new(program)
            .with_env("WP_WPLACE_PATH", config.base_path.display().to_string())
            .with_env("WP_CONCURRENT", config.concurrency.to_string());
        if let Some(source) = &config.proxy_source {
            command = command.with_env("PROXY_LIST_URL", source.clone());
        }
        Ok(command)
    }

    pub fn with_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn command_for(&self, min_x: u32, max_x: u32, bounds: TileBounds) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("pull")
            .args(["--min-x", &min_x.to_string()])
            .args(["--max-x", &max_x.to_string()])
            .args(["--min-y", &bounds.min_y.to_string()])
            .args(["--max-y", &bounds.max_y.to_string()])
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// The split sweep: partition, launch, aggregate, summarize
#[derive(Debug, Clone)]
pub struct Orchestrator {
    bounds: TileBounds,
    splits: usize,
    logs_dir: PathBuf,
    archive_dir: PathBuf,
    command: WorkerCommand,
    report_interval: Duration,
}

impl Orchestrator {
    pub fn new(config: &Config, command: WorkerCommand) -> Self {
        Self {
            bounds: config.bounds,
            splits: config.splits,
            logs_dir: config.logs_dir(),
            archive_dir: config.base_path.clone(),
            command,
            report_interval: REPORT_INTERVAL,
        }
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Run every worker to exit and write the run summary
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Utc::now();
        let ranges = split_ranges(self.bounds.min_x, self.bounds.max_x, self.splits);
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerEvent>();
        let mut monitor = SplitMonitor::new();

        for (worker, range) in ranges.iter().enumerate() {
            let Some((min_x, max_x)) = *range else {
                info!(worker, "worker idle");
                continue;
            };

            let mut child = self
                .command
                .command_for(min_x, max_x, self.bounds)
                .spawn()
                .with_context(|| format!("could not start worker {}", worker))?;
            info!(worker, min_x, max_x, pid = ?child.id(), "started worker");
            monitor.add_worker(worker, (min_x, max_x));

            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::join!(
                    forward_lines(worker, stdout, false, &tx),
                    forward_lines(worker, stderr, true, &tx),
                );
                let code = match child.wait().await {
                    Ok(status) => status.code(),
                    Err(e) => {
                        warn!(worker, error = %e, "could not wait for worker");
                        None
                    }
                };
                let _ = tx.send(WorkerEvent::Exited { worker, code });
            });
        }
        drop(tx);

        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + self.report_interval, self.report_interval);
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(WorkerEvent::Stdout { worker, line }) => {
                        if let Some(passthrough) = monitor.observe_stdout(worker, &line) {
                            println!("{}", passthrough);
                        }
                    }
                    Some(WorkerEvent::Stderr { worker, line }) => {
                        eprintln!("{}", label_stderr(worker, &line));
                    }
                    Some(WorkerEvent::Exited { worker, code }) => {
                        info!(worker, code = ?code, "worker exited");
                        monitor.record_exit(worker, code);
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if let Some(combined) = monitor.combined() {
                        println!("{}", combined);
                    }
                }
            }
        }

        let totals = monitor.totals();
        let summary = RunSummary::new(
            started,
            Utc::now(),
            self.splits,
            self.bounds,
            totals.checked,
            totals.files,
            next_archive_index(&self.archive_dir),
            monitor.exits(),
        );
        let path = summary.write(&self.logs_dir)?;
        info!(
            path = %path.display(),
            elapsed = %summary.elapsed_formatted,
            files = summary.total_files_made,
            "all workers finished"
        );
        Ok(summary)
    }
}

async fn forward_lines<R>(
    worker: usize,
    stream: Option<R>,
    is_stderr: bool,
    tx: &mpsc::UnboundedSender<WorkerEvent>,
) where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return;
    };

    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                let event = if is_stderr {
                    WorkerEvent::Stderr { worker, line }
                } else {
                    WorkerEvent::Stdout { worker, line }
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!(worker, error = %e, "worker output unreadable");
                return;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const FAKE_WORKER: &str = r#"
echo "3 per second, 1 active, 2 remaining, 1 files, 0 failed, est 1s"
echo "warming up" >&2
echo "note from $2 $3"
echo "All tasks finished. Done=4, Failed=1, Files=2"
[ "$3" = "0" ] && exit 0
exit 3
"#;

    fn config(dir: &std::path::Path, splits: usize) -> Config {
        Config {
            base_path: dir.to_path_buf(),
            splits,
            bounds: TileBounds {
                min_x: 0,
                max_x: 3,
                min_y: 0,
                max_y: 7,
            },
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_runs_workers_and_writes_summary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tiles-2.7z"), b"").unwrap();
        let config = config(dir.path(), 3);

        let command = WorkerCommand::new("sh")
            .with_arg("-c")
            .with_arg(FAKE_WORKER)
            .with_arg("fake-worker");
        let summary = Orchestrator::new(&config, command)
            .with_report_interval(Duration::from_millis(10))
            .run()
            .await
            .unwrap();

        assert_eq!(summary.workers.len(), 3);
        assert_eq!(summary.total_files_checked, 15);
        assert_eq!(summary.total_files_made, 6);
        assert_eq!(summary.archive_index, 3);

        let ranges: Vec<(u32, u32)> = summary.workers.iter().map(|w| (w.min_x, w.max_x)).collect();
        assert_eq!(ranges, vec![(0, 1), (2, 2), (3, 3)]);
        let codes: Vec<Option<i32>> = summary.workers.iter().map(|w| w.exit_code).collect();
        assert_eq!(codes, vec![Some(0), Some(3), Some(3)]);

        let logs: Vec<_> = std::fs::read_dir(dir.path().join("logs")).unwrap().collect();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_idle_splits_start_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), 6);

        let command = WorkerCommand::new("sh").with_arg("-c").with_arg("exit 0").with_arg("w");
        let summary = Orchestrator::new(&config, command).run().await.unwrap();

        assert_eq!(summary.workers.len(), 4);
        assert_eq!(summary.splits, 6);
        assert_eq!(summary.total_files_made, 0);
    }
}
