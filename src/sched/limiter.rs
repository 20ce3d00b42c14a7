//! Global concurrency and pacing controller

use crate::error::LimiterClosed;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Admits operations under two global constraints: at most `max_concurrent`
/// running at once, and successive starts at least `min_interval` apart.
///
/// Pacing is applied to every start, first attempts and retries alike, so a
/// burst of retries is spread out like any other work.
#[derive(Debug)]
pub struct RateLimiter {
    permits: Semaphore,
    max_concurrent: usize,
    min_interval: Duration,
    next_start: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Semaphore::new(max_concurrent),
            max_concurrent,
            min_interval,
            next_start: Mutex::new(Instant::now()),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Operations currently holding a slot
    pub fn in_use(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Wait for a slot and a start time, then run `operation` while holding the slot
    pub async fn admit<F>(&self, operation: F) -> Result<F::Output, LimiterClosed>
    where
        F: Future,
    {
        let _permit = self.permits.acquire().await.map_err(|_| LimiterClosed)?;
        self.pace().await;
        Ok(operation.await)
    }

    /// Stop admitting; waiting operations get `LimiterClosed`
    pub fn close(&self) {
        self.permits.close();
    }

    async fn pace(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let start = {
            let mut next_start = self.next_start.lock().await;
            let start = (*next_start).max(Instant::now());
            *next_start = start + self.min_interval;
            start
        };
        tokio::time::sleep_until(start).await;
    }
}
