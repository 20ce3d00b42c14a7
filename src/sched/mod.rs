//! Acquisition scheduling
//!
//! This module provides:
//! - Work item state and outcome classification
//! - Retry backoff and the global rate controller
//! - The control loop with lease reclaim
//! - Windowed telemetry, the durable error log and the progress line protocol

pub mod error_log;
pub mod limiter;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod task;
pub mod telemetry;

pub use error_log::{ErrorEntry, ErrorLog};
pub use limiter::RateLimiter;
pub use progress::{format_duration, parse_duration, FinalLine, ProgressLine};
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, SchedulerConfig, SweepStats};
pub use task::{classify_status, Attempt, ResultCode, RetryDecision, TaskStatus, WorkItem};
pub use telemetry::{LatencyBand, ProxyTally, TelemetrySnapshot, TelemetryWindow};
