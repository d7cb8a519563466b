//! Telemetry handle.
//!
//! The transport and reconcilers receive an explicit `Arc<dyn Telemetry>`
//! instead of writing to process-wide metric registries. Label schema:
//!
//! - requests: `(method, path, status)` → count + duration histogram
//! - operations: `(resource, operation)` → count
//! - operation errors: `(resource, operation, error_kind)` → count

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Sink for request and operation measurements.
pub trait Telemetry: Send + Sync {
    /// One logical API call. `status` is `0` when no HTTP response arrived.
    fn record_request(&self, method: &str, path: &str, status: u16, duration: Duration);

    /// One resource-level operation; `error_kind` is set when it failed.
    fn record_operation(&self, resource: &str, operation: &str, error_kind: Option<&str>);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record_request(&self, _: &str, _: &str, _: u16, _: Duration) {}
    fn record_operation(&self, _: &str, _: &str, _: Option<&str>) {}
}

/// Upper bounds (seconds) of the duration histogram buckets.
pub const DURATION_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RequestLabels {
    pub method: String,
    pub path: String,
    pub status: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestStats {
    pub count: u64,
    pub total_seconds: f64,
    /// Cumulative counts per [`DURATION_BUCKETS`] bound; the `+Inf` bucket
    /// equals `count`.
    pub buckets: Vec<u64>,
}

impl Default for RequestStats {
    fn default() -> Self {
        Self {
            count: 0,
            total_seconds: 0.0,
            buckets: vec![0; DURATION_BUCKETS.len()],
        }
    }
}

impl RequestStats {
    fn observe(&mut self, duration: Duration) {
        let seconds = duration.as_secs_f64();
        self.count += 1;
        self.total_seconds += seconds;
        for (bucket, bound) in self.buckets.iter_mut().zip(DURATION_BUCKETS) {
            if seconds <= bound {
                *bucket += 1;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct OperationLabels {
    pub resource: String,
    pub operation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct OperationErrorLabels {
    pub resource: String,
    pub operation: String,
    pub error_kind: String,
}

/// Point-in-time copy of everything a [`MetricsRecorder`] has seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: Vec<(RequestLabels, RequestStats)>,
    pub operations: Vec<(OperationLabels, u64)>,
    pub operation_errors: Vec<(OperationErrorLabels, u64)>,
}

impl MetricsSnapshot {
    pub fn request_count(&self, method: &str, path: &str) -> u64 {
        self.requests
            .iter()
            .filter(|(labels, _)| labels.method == method && labels.path == path)
            .map(|(_, stats)| stats.count)
            .sum()
    }

    pub fn operation_count(&self, resource: &str, operation: &str) -> u64 {
        self.operations
            .iter()
            .find(|(labels, _)| labels.resource == resource && labels.operation == operation)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    pub fn error_count(&self, resource: &str, operation: &str) -> u64 {
        self.operation_errors
            .iter()
            .filter(|(labels, _)| labels.resource == resource && labels.operation == operation)
            .map(|(_, count)| *count)
            .sum()
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    requests: BTreeMap<RequestLabels, RequestStats>,
    operations: BTreeMap<OperationLabels, u64>,
    operation_errors: BTreeMap<OperationErrorLabels, u64>,
}

/// In-memory [`Telemetry`] keeping counters and histograms per label set.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    state: Mutex<MetricsState>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        MetricsSnapshot {
            requests: state
                .requests
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            operations: state
                .operations
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            operation_errors: state
                .operation_errors
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    fn with_state(&self, f: impl FnOnce(&mut MetricsState)) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state);
    }
}

impl Telemetry for MetricsRecorder {
    fn record_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        let labels = RequestLabels {
            method: method.to_string(),
            path: path.to_string(),
            status,
        };
        self.with_state(|state| state.requests.entry(labels).or_default().observe(duration));
    }

    fn record_operation(&self, resource: &str, operation: &str, error_kind: Option<&str>) {
        self.with_state(|state| {
            *state
                .operations
                .entry(OperationLabels {
                    resource: resource.to_string(),
                    operation: operation.to_string(),
                })
                .or_default() += 1;
            if let Some(kind) = error_kind {
                *state
                    .operation_errors
                    .entry(OperationErrorLabels {
                        resource: resource.to_string(),
                        operation: operation.to_string(),
                        error_kind: kind.to_string(),
                    })
                    .or_default() += 1;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_histogram_is_cumulative() {
        let recorder = MetricsRecorder::new();
        recorder.record_request("GET", "projects/search", 200, Duration::from_millis(3));
        recorder.record_request("GET", "projects/search", 200, Duration::from_millis(300));
        recorder.record_request("GET", "projects/search", 500, Duration::from_secs(20));

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.request_count("GET", "projects/search"), 3);

        let (_, ok) = snapshot
            .requests
            .iter()
            .find(|(labels, _)| labels.status == 200)
            .expect("200 series");
        assert_eq!(ok.count, 2);
        assert_eq!(ok.buckets[0], 1, "3ms lands in the 5ms bucket");
        assert_eq!(ok.buckets[6], 2, "both observations are <= 0.5s");

        let (_, failed) = snapshot
            .requests
            .iter()
            .find(|(labels, _)| labels.status == 500)
            .expect("500 series");
        assert!(failed.buckets.iter().all(|b| *b == 0), "20s exceeds every bound");
    }

    #[test]
    fn operation_errors_are_counted_separately() {
        let recorder = MetricsRecorder::new();
        recorder.record_operation("project", "create", None);
        recorder.record_operation("project", "create", Some("remote"));

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.operation_count("project", "create"), 2);
        assert_eq!(snapshot.error_count("project", "create"), 1);
        assert_eq!(snapshot.error_count("project", "delete"), 0);
    }
}
