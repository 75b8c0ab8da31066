//! Prometheus metrics for datalake-ops.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`
//! and defines the metric names.  There is no scrape endpoint: a run can
//! write its final exposition text to a file for a textfile collector.

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::Path;
use std::sync::OnceLock;

// -- Metric name constants ----------------------------------------------------

/// Entries removed while draining buckets (counter). Labels: bucket, kind.
pub const DRAIN_REMOVED_TOTAL: &str = "datalake_ops_drain_removed_total";

/// Per-item delete failures (counter). Labels: bucket, code.
pub const DRAIN_ITEM_FAILURES_TOTAL: &str = "datalake_ops_drain_item_failures_total";

/// Transient provider errors that were retried (counter). Labels: operation.
pub const PROVIDER_RETRIES_TOTAL: &str = "datalake_ops_provider_retries_total";

/// Verifier check outcomes (counter). Labels: stage, status.
pub const VERIFY_CHECKS_TOTAL: &str = "datalake_ops_verify_checks_total";

/// Partition repair queries started (counter). Labels: outcome.
pub const PARTITION_REPAIRS_TOTAL: &str = "datalake_ops_partition_repairs_total";

/// Partitions observed on the partitioned table after the last check (gauge).
pub const PARTITIONS_OBSERVED: &str = "datalake_ops_partitions_observed";

/// Destroy runs (counter). Labels: outcome.
pub const DESTROY_RUNS_TOTAL: &str = "datalake_ops_destroy_runs_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent.
///
/// If some other recorder is already installed the returned handle renders
/// an empty snapshot.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::debug!("Metrics recorder already installed");
        }
        handle
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(DRAIN_REMOVED_TOTAL, "Object versions, delete markers and objects removed by drain");
    describe_counter!(DRAIN_ITEM_FAILURES_TOTAL, "Keys that could not be deleted during drain");
    describe_counter!(PROVIDER_RETRIES_TOTAL, "Provider calls retried after a transient error");
    describe_counter!(VERIFY_CHECKS_TOTAL, "Verifier check outcomes by stage and status");
    describe_counter!(PARTITION_REPAIRS_TOTAL, "Partition repair queries started by the verifier");
    describe_gauge!(PARTITIONS_OBSERVED, "Partitions registered on the partitioned table");
    describe_counter!(DESTROY_RUNS_TOTAL, "Destroy runs by outcome");
}

/// Render the current snapshot in Prometheus exposition format.
pub fn render() -> String {
    init_metrics().render()
}

/// Write the current snapshot to `path`, replacing the file.
pub fn write_snapshot(path: &Path) -> std::io::Result<()> {
    std::fs::write(path, render())
}

// -- Tests --------------------------------------------------------------------
