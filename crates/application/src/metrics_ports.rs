use std::time::Duration;

use permita_domain::ActivityKind;

/// One completed pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySample {
    /// Activity name.
    pub name: &'static str,
    /// Activity category.
    pub kind: ActivityKind,
    /// Wall time spent in the pipeline.
    pub duration: Duration,
    /// Status code of the failure, `None` on success.
    pub failure_status: Option<u16>,
}

/// Metrics sink used by the pipeline.
pub trait MetricsRecorder: Send + Sync {
    /// Records duration, count and error count tagged by activity.
    fn record_activity(&self, sample: &ActivitySample);

    /// Records untagged totals used as autoscaling signals.
    fn record_aggregate(&self, duration: Duration, failed: bool);
}
