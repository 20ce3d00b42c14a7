//! Windowed request telemetry
//!
//! Counters cover one reporting window and are cleared when the window is
//! taken, so every snapshot reflects only recent behaviour.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Coarse latency band
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LatencyBand {
    #[serde(rename = "<1s")]
    UnderOneSecond,
    #[serde(rename = "1-3s")]
    OneToThreeSeconds,
    #[serde(rename = "3-7s")]
    ThreeToSevenSeconds,
    #[serde(rename = ">=7s")]
    SevenSecondsOrMore,
}

impl LatencyBand {
    pub fn of(latency: Duration) -> Self {
        match latency.as_millis() {
            0..=999 => LatencyBand::UnderOneSecond,
            1000..=2999 => LatencyBand::OneToThreeSeconds,
            3000..=6999 => LatencyBand::ThreeToSevenSeconds,
            _ => LatencyBand::SevenSecondsOrMore,
        }
    }
}

impl fmt::Display for LatencyBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LatencyBand::UnderOneSecond => "<1s",
            LatencyBand::OneToThreeSeconds => "1-3s",
            LatencyBand::ThreeToSevenSeconds => "3-7s",
            LatencyBand::SevenSecondsOrMore => ">=7s",
        };
        f.write_str(label)
    }
}

/// Outcome tally for one proxy within a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProxyTally {
    pub ok: u64,
    #[serde(rename = "4xx")]
    pub client_errors: u64,
    #[serde(rename = "5xx")]
    pub server_errors: u64,
}

impl ProxyTally {
    fn bump(&mut self, status: u16) {
        match status {
            200..=299 => self.ok += 1,
            400..=499 => self.client_errors += 1,
            500.. => self.server_errors += 1,
            _ => {}
        }
    }
}

/// Everything recorded in one window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub latency: BTreeMap<LatencyBand, u64>,
    pub statuses: BTreeMap<u16, u64>,
    pub per_proxy: BTreeMap<String, ProxyTally>,
    pub errors: u64,
}

impl TelemetrySnapshot {
    pub fn responses(&self) -> u64 {
        self.statuses.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.responses() == 0 && self.errors == 0
    }
}

/// Collector owned by the scheduler's control loop
#[derive(Debug, Default)]
pub struct TelemetryWindow {
    current: TelemetrySnapshot,
}

impl TelemetryWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// A response with an HTTP status arrived through `proxy`
    pub fn record_response(&mut self, proxy: &str, status: u16, latency: Duration) {
        *self
            .current
            .latency
            .entry(LatencyBand::of(latency))
            .or_default() += 1;
        *self.current.statuses.entry(status).or_default() += 1;
        self.current
            .per_proxy
            .entry(proxy.to_string())
            .or_default()
            .bump(status);
    }

    /// The request failed before any status arrived
    pub fn record_error(&mut self) {
        self.current.errors += 1;
    }

    pub fn peek(&self) -> &TelemetrySnapshot {
        &self.current
    }

    /// Close the window: return its counters and start an empty one
    pub fn take(&mut self) -> TelemetrySnapshot {
        std::mem::take(&mut self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_bands() {
        assert_eq!(LatencyBand::of(Duration::from_millis(999)), LatencyBand::UnderOneSecond);
        assert_eq!(LatencyBand::of(Duration::from_millis(1000)), LatencyBand::OneToThreeSeconds);
        assert_eq!(LatencyBand::of(Duration::from_millis(6999)), LatencyBand::ThreeToSevenSeconds);
        assert_eq!(LatencyBand::of(Duration::from_secs(7)), LatencyBand::SevenSecondsOrMore);
    }

    #[test]
    fn test_records_histograms_and_proxy_tallies() {
        let mut window = TelemetryWindow::new();
        window.record_response("a:1", 200, Duration::from_millis(100));
        window.record_response("a:1", 429, Duration::from_millis(1500));
        window.record_response("b:2", 503, Duration::from_secs(8));
        window.record_response("b:2", 200, Duration::from_millis(50));
        window.record_error();

        let snapshot = window.peek();
        assert_eq!(snapshot.responses(), 4);
        assert_eq!(snapshot.statuses[&200], 2);
        assert_eq!(snapshot.latency[&LatencyBand::UnderOneSecond], 2);
        assert_eq!(
            snapshot.per_proxy["a:1"],
            ProxyTally {
                ok: 1,
                client_errors: 1,
                server_errors: 0
            }
        );
        assert_eq!(snapshot.per_proxy["b:2"].server_errors, 1);
        assert_eq!(snapshot.errors, 1);
    }

    #[test]
    fn test_take_resets_window() {
        let mut window = TelemetryWindow::new();
        window.record_response("a:1", 200, Duration::from_millis(10));
        window.record_error();

        let first = window.take();
        assert_eq!(first.responses(), 1);
        assert!(window.peek().is_empty());
        assert!(window.take().is_empty());
    }

    #[test]
    fn test_snapshot_serializes_band_labels() {
        let mut window = TelemetryWindow::new();
        window.record_response("a:1", 404, Duration::from_millis(10));
        let json = serde_json::to_value(window.take()).unwrap();
        assert_eq!(json["latency"]["<1s"], 1);
        assert_eq!(json["per_proxy"]["a:1"]["4xx"], 1);
    }
}
