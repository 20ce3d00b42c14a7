//! Progress line protocol between sweep workers and the split orchestrator
//!
//! Workers print one [`ProgressLine`] per report period and a [`FinalLine`]
//! when they finish; any other stdout line is a plain log line.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const SECOND_MS: u128 = 1000;
const MINUTE_MS: u128 = 60 * SECOND_MS;
const HOUR_MS: u128 = 60 * MINUTE_MS;

static PROGRESS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(\d+) per second, (\d+) active, (\d+) remaining, (\d+) files, (\d+) failed, est (.+)",
    )
    .expect("Invalid progress line regex")
});

static FINAL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"All tasks finished\. Done=(\d+), Failed=(\d+), Files=(\d+)")
        .expect("Invalid final line regex")
});

/// Periodic worker status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressLine {
    pub per_second: u64,
    pub active: u64,
    pub remaining: u64,
    pub files: u64,
    pub failed: u64,
    pub eta: Duration,
}

impl fmt::Display for ProgressLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} per second, {} active, {} remaining, {} files, {} failed, est {}",
            self.per_second,
            self.active,
            self.remaining,
            self.files,
            self.failed,
            format_duration(self.eta)
        )
    }
}

impl FromStr for ProgressLine {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = PROGRESS_LINE.captures(s).ok_or(())?;
        let number = |i: usize| caps[i].parse::<u64>().map_err(|_| ());
        Ok(Self {
            per_second: number(1)?,
            active: number(2)?,
            remaining: number(3)?,
            files: number(4)?,
            failed: number(5)?,
            eta: parse_duration(&caps[6]),
        })
    }
}

/// Last line a worker prints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalLine {
    pub done: u64,
    pub failed: u64,
    pub files: u64,
}

impl fmt::Display for FinalLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "All tasks finished. Done={}, Failed={}, Files={}",
            self.done, self.failed, self.files
        )
    }
}

impl FromStr for FinalLine {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = FINAL_LINE.captures(s).ok_or(())?;
        let number = |i: usize| caps[i].parse::<u64>().map_err(|_| ());
        Ok(Self {
            done: number(1)?,
            failed: number(2)?,
            files: number(3)?,
        })
    }
}

/// `850ms`, `4.5s`, `3m 20s`, `2h 5m`
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();

    if ms < SECOND_MS {
        return format!("{}ms", ms);
    }

    if ms < MINUTE_MS {
        let s = ms / SECOND_MS;
        let tenths = (ms % SECOND_MS) / 100;
        return if tenths > 0 {
            format!("{}.{}s", s, tenths)
        } else {
            format!("{}s", s)
        };
    }

    if ms < HOUR_MS {
        let m = ms / MINUTE_MS;
        let s = (ms % MINUTE_MS) / SECOND_MS;
        return if s > 0 {
            format!("{}m {}s", m, s)
        } else {
            format!("{}m", m)
        };
    }

    let h = ms / HOUR_MS;
    let m = (ms % HOUR_MS) / MINUTE_MS;
    if m > 0 {
        format!("{}h {}m", h, m)
    } else {
        format!("{}h", h)
    }
}

/// Inverse of [`format_duration`]; unknown parts are ignored
pub fn parse_duration(text: &str) -> Duration {
    let mut total_ms = 0.0f64;

    for part in text.split_whitespace() {
        let (number, unit_ms) = if let Some(n) = part.strip_suffix("ms") {
            (n, 1.0)
        } else if let Some(n) = part.strip_suffix('s') {
            (n, 1000.0)
        } else if let Some(n) = part.strip_suffix('m') {
            (n, 60_000.0)
        } else if let Some(n) = part.strip_suffix('h') {
            (n, 3_600_000.0)
        } else {
            continue;
        };

        if let Ok(value) = number.parse::<f64>() {
            if value.is_finite() && value >= 0.0 {
                total_ms += value * unit_ms;
            }
        }
    }

    Duration::from_millis(total_ms.round() as u64)
}
