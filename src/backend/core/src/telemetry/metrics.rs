//! Prometheus metrics for the event-sourcing kernel.
//!
//! Metrics are emitted through the `metrics` facade, so recording is a no-op
//! until [`init_metrics`] installs the Prometheus recorder.
//!
//! # Example
//!
//! ```rust,no_run
//! use blueprint_core::telemetry::metrics::{KernelMetrics, ProjectionOutcome};
//!
//! KernelMetrics::events_appended("Workspace", 2);
//! KernelMetrics::projection_event("workspaces", ProjectionOutcome::Applied);
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for append latency (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
}

/// Handle to the installed Prometheus recorder.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// A registry with no recorder behind it.
    pub fn disabled() -> Self {
        Self {
            prometheus_handle: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Initialize the metrics subsystem.
///
/// # Errors
///
/// Returns an error if the bucket layout is invalid or a global recorder is
/// already installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let mut builder = PrometheusBuilder::new();
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;
    register_metric_descriptions();

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    describe_counter!(
        "blueprint_events_appended_total",
        "Events durably appended, by aggregate type"
    );
    describe_histogram!(
        "blueprint_append_duration_seconds",
        "Event store append latency in seconds"
    );
    describe_counter!(
        "blueprint_concurrency_conflicts_total",
        "Appends rejected by the expected-version check"
    );
    describe_counter!(
        "blueprint_replay_events_total",
        "Events applied while reconstructing aggregates"
    );
    describe_counter!(
        "blueprint_projection_events_total",
        "Events seen by projection builders, by outcome"
    );
    describe_counter!(
        "blueprint_command_retries_total",
        "Repository command retries after retryable failures"
    );
    describe_counter!("blueprint_errors_total", "Kernel errors by code");
}

// =============================================================================
// Kernel Metrics
// =============================================================================

/// What a projection builder did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionOutcome {
    /// Document written.
    Applied,
    /// Already reflected in the document (redelivery or stale).
    Skipped,
    /// Event type not consumed by this builder.
    Ignored,
    /// Payload failed validation; nothing written.
    Rejected,
    /// An earlier version of the stream has not been projected yet; nothing
    /// written. The caller must deliver the missing events first.
    OutOfOrder,
}

impl ProjectionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectionOutcome::Applied => "applied",
            ProjectionOutcome::Skipped => "skipped",
            ProjectionOutcome::Ignored => "ignored",
            ProjectionOutcome::Rejected => "rejected",
            ProjectionOutcome::OutOfOrder => "out_of_order",
        }
    }
}

/// Recording helpers for the kernel's counters and histograms.
pub struct KernelMetrics;

impl KernelMetrics {
    pub fn events_appended(aggregate_type: &str, count: u64) {
        counter!(
            "blueprint_events_appended_total",
            "aggregate_type" => aggregate_type.to_string(),
        )
        .increment(count);
    }

    pub fn append_latency(aggregate_type: &str, elapsed: Duration) {
        histogram!(
            "blueprint_append_duration_seconds",
            "aggregate_type" => aggregate_type.to_string(),
        )
        .record(elapsed.as_secs_f64());
    }

    pub fn concurrency_conflict(aggregate_type: &str) {
        counter!(
            "blueprint_concurrency_conflicts_total",
            "aggregate_type" => aggregate_type.to_string(),
        )
        .increment(1);
    }

    pub fn events_replayed(aggregate_type: &str, count: u64) {
        counter!(
            "blueprint_replay_events_total",
            "aggregate_type" => aggregate_type.to_string(),
        )
        .increment(count);
    }

    pub fn projection_event(builder: &str, outcome: ProjectionOutcome) {
        counter!(
            "blueprint_projection_events_total",
            "builder" => builder.to_string(),
            "outcome" => outcome.as_str(),
        )
        .increment(1);
    }

    pub fn command_retry(aggregate_type: &str) {
        counter!(
            "blueprint_command_retries_total",
            "aggregate_type" => aggregate_type.to_string(),
        )
        .increment(1);
    }

    /// Start an append timer; call [`AppendTimer::finish`] when done.
    pub fn start_append(aggregate_type: &str) -> AppendTimer {
        AppendTimer {
            start: Instant::now(),
            aggregate_type: aggregate_type.to_string(),
        }
    }
}

/// Timer for one append call.
pub struct AppendTimer {
    start: Instant,
    aggregate_type: String,
}

impl AppendTimer {
    pub fn finish(self) {
        KernelMetrics::append_latency(&self.aggregate_type, self.start.elapsed());
    }
}
