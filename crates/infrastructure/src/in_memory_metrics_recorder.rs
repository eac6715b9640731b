use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use permita_application::{ActivitySample, MetricsRecorder};
use tracing::debug;

/// Counters and durations of one activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityMetrics {
    /// Completed runs.
    pub count: u64,
    /// Failed runs.
    pub errors: u64,
    /// Summed wall time.
    pub total_duration: Duration,
    /// Slowest run.
    pub max_duration: Duration,
}

impl ActivityMetrics {
    fn record(&mut self, duration: Duration, failed: bool) {
        self.count += 1;
        if failed {
            self.errors += 1;
        }
        self.total_duration = self.total_duration.saturating_add(duration);
        self.max_duration = self.max_duration.max(duration);
    }
}

fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Default)]
struct Recorded {
    activities: BTreeMap<&'static str, ActivityMetrics>,
    aggregate: ActivityMetrics,
}

/// Process-local metrics sink keyed by activity name.
#[derive(Debug, Default)]
pub struct InMemoryMetricsRecorder {
    recorded: Mutex<Recorded>,
}

impl InMemoryMetricsRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the metrics of one activity.
    #[must_use]
    pub fn activity(&self, name: &str) -> Option<ActivityMetrics> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .activities
            .get(name)
            .copied()
    }

    /// Returns the untagged totals.
    #[must_use]
    pub fn aggregate(&self) -> ActivityMetrics {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .aggregate
    }
}

impl MetricsRecorder for InMemoryMetricsRecorder {
    fn record_activity(&self, sample: &ActivitySample) {
        debug!(
            activity = sample.name,
            kind = sample.kind.as_str(),
            duration_ms = whole_millis(sample.duration),
            failure_status = sample.failure_status,
            "activity measured"
        );
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .activities
            .entry(sample.name)
            .or_default()
            .record(sample.duration, sample.failure_status.is_some());
    }

    fn record_aggregate(&self, duration: Duration, failed: bool) {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .aggregate
            .record(duration, failed);
    }
}
