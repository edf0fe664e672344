//! Capture metrics
//!
//! Process-wide counters for capture sessions, bands and throttling,
//! exportable in the Prometheus text format.
//!
//! ```rust,no_run
//! use fullshot_web::metrics::global_metrics;
//!
//! global_metrics().record_band();
//! let output = global_metrics().to_prometheus_format();
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock};
use std::time::Duration;

/// Session durations kept for percentiles
const MAX_DURATION_SAMPLES: usize = 256;

/// Capture metrics
#[derive(Debug)]
pub struct Metrics {
    /// Sessions started (full page and visible)
    pub sessions_started: AtomicU64,
    /// Sessions that stored a composite
    pub sessions_completed: AtomicU64,
    /// Sessions that aborted
    pub sessions_failed: AtomicU64,
    /// Viewport captures that produced a band
    pub bands_captured: AtomicU64,
    /// Capture attempts retried because of throttling
    pub rate_limit_retries: AtomicU64,

    failures_by_kind: RwLock<HashMap<&'static str, u64>>,
    session_durations: RwLock<DurationWindow>,
}

/// Bounded window of recent session durations
#[derive(Debug, Default)]
struct DurationWindow {
    samples: Vec<Duration>,
    next: usize,
}

impl DurationWindow {
    fn push(&mut self, sample: Duration) {
        if self.samples.len() < MAX_DURATION_SAMPLES {
            self.samples.push(sample);
        } else {
            self.samples[self.next] = sample;
        }
        self.next = (self.next + 1) % MAX_DURATION_SAMPLES;
    }

    fn percentile(&self, p: f64) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort();
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted.get(idx).copied()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a zeroed metrics instance
    pub fn new() -> Self {
        Self {
            sessions_started: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            bands_captured: AtomicU64::new(0),
            rate_limit_retries: AtomicU64::new(0),
            failures_by_kind: RwLock::new(HashMap::new()),
            session_durations: RwLock::new(DurationWindow::default()),
        }
    }

    /// Record a session start
    pub fn record_session_start(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed session and its duration
    pub fn record_session_complete(&self, duration: Duration) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut durations) = self.session_durations.write() {
            durations.push(duration);
        }
    }

    /// Record an aborted session
    pub fn record_session_failure(&self, kind: &'static str) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut breakdown) = self.failures_by_kind.write() {
            *breakdown.entry(kind).or_insert(0) += 1;
        }
    }

    /// Record a captured band
    pub fn record_band(&self) {
        self.bands_captured.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a throttled attempt that will be retried
    pub fn record_rate_limit_retry(&self) {
        self.rate_limit_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Failures recorded for one error kind
    pub fn failures_of(&self, kind: &str) -> u64 {
        self.failures_by_kind
            .read()
            .ok()
            .and_then(|breakdown| breakdown.get(kind).copied())
            .unwrap_or(0)
    }

    /// Convert metrics to Prometheus text format
    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();

        for (name, counter) in [
            ("sessions_started_total", &self.sessions_started),
            ("sessions_completed_total", &self.sessions_completed),
            ("sessions_failed_total", &self.sessions_failed),
            ("bands_captured_total", &self.bands_captured),
            ("rate_limit_retries_total", &self.rate_limit_retries),
        ] {
            output.push_str(&format!(
                "fullshot_{} {}\n",
                name,
                counter.load(Ordering::Relaxed)
            ));
        }

        if let Ok(breakdown) = self.failures_by_kind.read() {
            let mut kinds: Vec<_> = breakdown.iter().collect();
            kinds.sort();
            for (kind, count) in kinds {
                output.push_str(&format!(
                    "fullshot_session_failures{{kind=\"{}\"}} {}\n",
                    kind, count
                ));
            }
        }

        if let Ok(durations) = self.session_durations.read() {
            for (label, p) in [("p50", 0.5), ("p95", 0.95)] {
                if let Some(value) = durations.percentile(p) {
                    output.push_str(&format!(
                        "fullshot_session_duration_{}_ms {}\n",
                        label,
                        value.as_millis()
                    ));
                }
            }
        }

        output
    }
}

/// Global metrics instance
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get or initialize the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_session_start();
        metrics.record_band();
        metrics.record_band();
        metrics.record_rate_limit_retry();
        metrics.record_session_complete(Duration::from_millis(120));

        assert_eq!(metrics.sessions_started.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.bands_captured.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.rate_limit_retries.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.sessions_completed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_failure_breakdown() {
        let metrics = Metrics::new();
        metrics.record_session_failure("mutation");
        metrics.record_session_failure("mutation");
        metrics.record_session_failure("rate_limit");

        assert_eq!(metrics.failures_of("mutation"), 2);
        assert_eq!(metrics.failures_of("rate_limit"), 1);
        assert_eq!(metrics.failures_of("stitch"), 0);
        assert_eq!(metrics.sessions_failed.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_session_start();
        metrics.record_session_failure("restricted_surface");
        metrics.record_session_complete(Duration::from_millis(40));

        let output = metrics.to_prometheus_format();
        assert!(output.contains("fullshot_sessions_started_total 1\n"));
        assert!(output.contains("fullshot_session_failures{kind=\"restricted_surface\"} 1\n"));
        assert!(output.contains("fullshot_session_duration_p50_ms 40\n"));
    }

    #[test]
    fn test_duration_window_wraps() {
        let mut window = DurationWindow::default();
        for ms in 0..(MAX_DURATION_SAMPLES as u64 + 10) {
            window.push(Duration::from_millis(ms));
        }
        assert_eq!(window.samples.len(), MAX_DURATION_SAMPLES);
        assert_eq!(window.percentile(0.0), Some(Duration::from_millis(10)));
    }
}
