//! Work item records and their state transitions

use crate::sched::retry::RetryPolicy;
use futures::future::AbortHandle;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Done,
    Failed,
}

/// How an attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResultCode {
    /// 2xx with a payload that was persisted
    Stored { status: u16 },
    /// 2xx without usable data
    Empty { status: u16 },
    /// 404, no data at this coordinate
    NotFound,
    ClientError { status: u16 },
    ServerError { status: u16 },
    OtherStatus { status: u16 },
    NetworkError,
    PersistFailed,
    LeaseExpired,
}

impl ResultCode {
    /// Terminal successes: the item is Done
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ResultCode::Stored { .. } | ResultCode::Empty { .. } | ResultCode::NotFound
        )
    }

    /// A payload was written
    pub fn produced_file(&self) -> bool {
        matches!(self, ResultCode::Stored { .. })
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Stored { status } => write!(f, "stored ({})", status),
            ResultCode::Empty { status } => write!(f, "empty ({})", status),
            ResultCode::NotFound => write!(f, "not found"),
            ResultCode::ClientError { status } => write!(f, "client error ({})", status),
            ResultCode::ServerError { status } => write!(f, "server error ({})", status),
            ResultCode::OtherStatus { status } => write!(f, "unexpected status ({})", status),
            ResultCode::NetworkError => write!(f, "network error"),
            ResultCode::PersistFailed => write!(f, "persist failed"),
            ResultCode::LeaseExpired => write!(f, "lease expired"),
        }
    }
}

/// Classification of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Terminal(ResultCode),
    Retryable { code: ResultCode, error: String },
}

impl Attempt {
    pub fn retryable(code: ResultCode, error: impl Into<String>) -> Self {
        Attempt::Retryable {
            code,
            error: error.into(),
        }
    }
}

/// The one place HTTP statuses are classified.
///
/// 2xx and 404 end the item; everything else is retried. 404 means the grid
/// has nothing at that coordinate.
pub fn classify_status(status: u16) -> Attempt {
    match status {
        200..=299 => Attempt::Terminal(ResultCode::Empty { status }),
        404 => Attempt::Terminal(ResultCode::NotFound),
        400..=499 => Attempt::retryable(ResultCode::ClientError { status }, format!("HTTP {}", status)),
        500..=599 => Attempt::retryable(ResultCode::ServerError { status }, format!("HTTP {}", status)),
        _ => Attempt::retryable(ResultCode::OtherStatus { status }, format!("HTTP {}", status)),
    }
}

/// What happened to an item after a retryable outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Failed,
}

/// Mutable scheduling record for one coordinate
#[derive(Debug)]
pub struct WorkItem<C> {
    pub coord: C,
    pub status: TaskStatus,
    /// Attempts started so far
    pub attempts: u32,
    pub next_eligible_at: Instant,
    /// Set only while Running
    pub lease_expires_at: Option<Instant>,
    pub result: Option<ResultCode>,
    pub last_error: Option<String>,
    /// Bumped on every dispatch; completions from older dispatches are stale
    generation: u64,
    abort: Option<AbortHandle>,
}

impl<C> WorkItem<C> {
    pub fn new(coord: C, now: Instant) -> Self {
        Self {
            coord,
            status: TaskStatus::Pending,
            attempts: 0,
            next_eligible_at: now,
            lease_expires_at: None,
            result: None,
            last_error: None,
            generation: 0,
            abort: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_eligible(&self, now: Instant) -> bool {
        self.status == TaskStatus::Pending && now >= self.next_eligible_at
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.status, TaskStatus::Queued | TaskStatus::Running)
    }

    /// Pending -> Queued. Returns the generation the dispatched attempt carries.
    pub fn mark_queued(&mut self, abort: AbortHandle) -> u64 {
        debug_assert_eq!(self.status, TaskStatus::Pending);
        self.status = TaskStatus::Queued;
        self.attempts += 1;
        self.generation += 1;
        self.abort = Some(abort);
        self.generation
    }

    /// Queued -> Running once the rate controller grants a slot
    pub fn mark_running(&mut self, generation: u64, now: Instant, lease: Duration) -> bool {
        if self.generation != generation || self.status != TaskStatus::Queued {
            return false;
        }
        self.status = TaskStatus::Running;
        self.lease_expires_at = Some(now + lease);
        true
    }

    /// Running -> Done
    pub fn complete(&mut self, code: ResultCode) {
        self.status = TaskStatus::Done;
        self.result = Some(code);
        self.lease_expires_at = None;
        self.abort = None;
    }

    /// A retryable outcome (including a reclaimed lease). Cancels whatever is
    /// still in flight for this item, then goes back to Pending with backoff or
    /// to Failed once the attempt ceiling is reached.
    pub fn fail_attempt(
        &mut self,
        code: ResultCode,
        error: String,
        policy: &RetryPolicy,
        now: Instant,
    ) -> RetryDecision {
        if let Some(handle) = self.abort.take() {
            handle.abort();
        }
        self.lease_expires_at = None;
        self.result = Some(code);
        self.last_error = Some(error);

        if self.attempts >= policy.max_attempts {
            self.status = TaskStatus::Failed;
            return RetryDecision::Failed;
        }

        let delay = policy.backoff(self.attempts);
        self.status = TaskStatus::Pending;
        self.next_eligible_at = now + delay;
        RetryDecision::Retry { delay }
    }

    /// Running or Queued past its lease
    pub fn lease_expired(&self, now: Instant) -> bool {
        self.is_in_flight() && self.lease_expires_at.is_some_and(|until| now > until)
    }
}
