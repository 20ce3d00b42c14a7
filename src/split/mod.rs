//! Split orchestration across worker processes
//!
//! Workers talk to the orchestrator only through their stdout and stderr
//! lines; nothing is shared in memory.

pub mod monitor;
pub mod orchestrator;
pub mod ranges;
pub mod summary;

pub use monitor::{label_stderr, CombinedLine, SplitMonitor, SplitTotals, WorkerEvent, WorkerExit};
pub use orchestrator::{Orchestrator, WorkerCommand};
pub use ranges::split_ranges;
pub use summary::{next_archive_index, RunSummary};
