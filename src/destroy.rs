//! Destroy orchestrator.
//!
//! Drains every managed bucket concurrently, deletes the stack, then polls
//! until the buckets are gone.  Every step is idempotent: running it
//! against an already-destroyed deployment reports the stack as absent and
//! finishes cleanly.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::counter;
use serde::Serialize;
use std::fmt::Write as _;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cloud::backend::ObjectStore;
use crate::cloud::CloudClients;
use crate::config::{DestroyConfig, DrainConfig};
use crate::drain::{drain, DrainOptions, DrainResult};
use crate::metrics::DESTROY_RUNS_TOTAL;
use crate::naming::{BucketPurpose, DeployContext};

#[derive(Debug, Clone, Copy)]
pub struct DestroyOptions {
    pub drain: DrainOptions,
    pub absence_poll_interval: Duration,
    pub absence_max_wait: Duration,
}

impl DestroyOptions {
    pub fn new(drain: &DrainConfig, destroy: &DestroyConfig) -> Self {
        Self {
            drain: DrainOptions::from(drain),
            absence_poll_interval: Duration::from_secs(destroy.absence_poll_interval_secs.max(1)),
            absence_max_wait: Duration::from_secs(destroy.absence_max_wait_secs),
        }
    }
}

/// What happened to the stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StackOutcome {
    Deleted,
    AlreadyAbsent,
    /// The stack tool's error, verbatim.
    Failed { message: String },
}

/// Teardown state of one bucket.
#[derive(Debug, Clone, Serialize)]
pub struct BucketTeardown {
    pub purpose: BucketPurpose,
    pub bucket: String,
    pub drain: Option<DrainResult>,
    /// Set when the drain aborted (e.g. listing was denied).
    pub drain_error: Option<String>,
    /// Last observed existence; `None` if it could not be determined.
    pub still_exists: Option<bool>,
}

impl BucketTeardown {
    fn is_clean(&self) -> bool {
        self.drain_error.is_none()
            && self.drain.as_ref().map_or(false, DrainResult::is_clean)
            && self.still_exists == Some(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DestroyReport {
    pub generated_at: DateTime<Utc>,
    pub account_id: String,
    pub stack_name: String,
    pub buckets: Vec<BucketTeardown>,
    pub stack: StackOutcome,
    /// Some bucket was not fully drained or is still present.
    pub degraded: bool,
}

impl DestroyReport {
    /// Clean teardown: stack gone and nothing left behind.
    pub fn is_success(&self) -> bool {
        !self.degraded && !matches!(self.stack, StackOutcome::Failed { .. })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Teardown of {} in account {} at {}",
            self.stack_name,
            self.account_id,
            self.generated_at.to_rfc3339()
        );
        for b in &self.buckets {
            let drained = match (&b.drain, &b.drain_error) {
                (_, Some(e)) => format!("drain aborted: {e}"),
                (Some(d), None) if !d.existed => "not present".to_string(),
                (Some(d), None) => format!(
                    "removed {} objects, {} versions, {} delete markers, {} failures{}",
                    d.objects_removed,
                    d.versions_removed,
                    d.markers_removed,
                    d.failures.len(),
                    if d.drained { "" } else { " (not empty)" }
                ),
                (None, None) => "not drained".to_string(),
            };
            let exists = match b.still_exists {
                Some(true) => "still exists",
                Some(false) => "gone",
                None => "unknown",
            };
            let _ = writeln!(out, "  {:<14} {}: {}; {}", b.purpose.to_string(), b.bucket, drained, exists);
        }
        let stack = match &self.stack {
            StackOutcome::Deleted => "deleted".to_string(),
            StackOutcome::AlreadyAbsent => "already absent".to_string(),
            StackOutcome::Failed { message } => format!("FAILED: {message}"),
        };
        let _ = writeln!(out, "  stack          {}: {}", self.stack_name, stack);
        let _ = writeln!(
            out,
            "Result: {}",
            if self.is_success() {
                "OK"
            } else if self.degraded {
                "DEGRADED"
            } else {
                "FAILED"
            }
        );
        out
    }
}

/// Tear down the deployment described by `ctx`.
pub async fn destroy(
    clients: &CloudClients,
    ctx: &DeployContext,
    opts: &DestroyOptions,
) -> DestroyReport {
    let buckets = ctx.names.buckets();
    info!(stack = %ctx.names.stack_name, buckets = buckets.len(), "Draining buckets");

    let objects = clients.objects.as_ref();
    let drains = buckets.iter().map(|(purpose, bucket)| async move {
        let outcome = drain(objects, bucket, &opts.drain).await;
        (*purpose, bucket.clone(), outcome)
    });
    let mut teardown: Vec<BucketTeardown> = join_all(drains)
        .await
        .into_iter()
        .map(|(purpose, bucket, outcome)| match outcome {
            Ok(result) => BucketTeardown {
                purpose,
                bucket,
                drain: Some(result),
                drain_error: None,
                still_exists: None,
            },
            Err(e) => {
                error!(bucket = %bucket, error = %e, "Drain aborted");
                BucketTeardown {
                    purpose,
                    bucket,
                    drain: None,
                    drain_error: Some(e.to_string()),
                    still_exists: None,
                }
            }
        })
        .collect();

    let stack = delete_stack(clients, &ctx.names.stack_name).await;

    let max_wait = if matches!(stack, StackOutcome::Failed { .. }) {
        Duration::ZERO
    } else {
        opts.absence_max_wait
    };
    wait_for_absence(objects, &mut teardown, opts.absence_poll_interval, max_wait).await;

    let degraded = teardown.iter().any(|b| !b.is_clean());
    let report = DestroyReport {
        generated_at: Utc::now(),
        account_id: ctx.account_id().to_string(),
        stack_name: ctx.names.stack_name.clone(),
        buckets: teardown,
        stack,
        degraded,
    };

    let outcome = if report.is_success() {
        "clean"
    } else if matches!(report.stack, StackOutcome::Failed { .. }) {
        "stack_failed"
    } else {
        "degraded"
    };
    counter!(DESTROY_RUNS_TOTAL, "outcome" => outcome).increment(1);
    info!(outcome, "Teardown finished");
    report
}

async fn delete_stack(clients: &CloudClients, stack_name: &str) -> StackOutcome {
    match clients.stack.stack_exists(stack_name).await {
        Ok(false) => {
            info!(stack = stack_name, "Stack already absent");
            return StackOutcome::AlreadyAbsent;
        }
        Ok(true) => {}
        Err(e) => warn!(stack = stack_name, error = %e, "Could not look up stack, destroying anyway"),
    }

    info!(stack = stack_name, "Destroying stack");
    match clients.stack.destroy(stack_name).await {
        Ok(()) => StackOutcome::Deleted,
        Err(e) => {
            error!(stack = stack_name, error = %e, "Stack destroy failed");
            StackOutcome::Failed {
                message: e.to_string(),
            }
        }
    }
}

/// Poll until every bucket is gone or `max_wait` elapsed.  At least one
/// round of probes always runs.
async fn wait_for_absence(
    objects: &dyn ObjectStore,
    teardown: &mut [BucketTeardown],
    interval: Duration,
    max_wait: Duration,
) {
    let started = Instant::now();
    loop {
        for b in teardown.iter_mut().filter(|b| b.still_exists != Some(false)) {
            b.still_exists = match objects.bucket_exists(&b.bucket).await {
                Ok(exists) => Some(exists),
                Err(e) => {
                    debug!(bucket = %b.bucket, error = %e, "Existence probe failed");
                    None
                }
            };
        }
        if teardown.iter().all(|b| b.still_exists == Some(false)) {
            return;
        }
        if started.elapsed() >= max_wait {
            for b in teardown.iter().filter(|b| b.still_exists != Some(false)) {
                warn!(bucket = %b.bucket, "Bucket still present after teardown");
            }
            return;
        }
        tokio::time::sleep(interval).await;
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::backend::StackTool;
    use crate::cloud::memory::{MemoryCloud, StackTemplate};
    use crate::config::NamingConfig;
    use std::sync::Arc;

    const ACCOUNT: &str = "123456789012";

    fn ctx() -> DeployContext {
        DeployContext::new("us-east-1", &NamingConfig::default(), ACCOUNT).unwrap()
    }

    fn fast() -> DestroyOptions {
        DestroyOptions {
            drain: DrainOptions::default(),
            absence_poll_interval: Duration::ZERO,
            absence_max_wait: Duration::from_secs(1),
        }
    }

    async fn loaded(ctx: &DeployContext) -> Arc<MemoryCloud> {
        let cloud = Arc::new(MemoryCloud::new(ACCOUNT));
        cloud.register_stack(StackTemplate::for_names(&ctx.names)).await;
        cloud.deploy(&ctx.names.stack_name).await.unwrap();
        cloud.load_sample_data(&ctx.names).await.unwrap();
        let raw = ctx.names.bucket(BucketPurpose::Raw);
        cloud.put_object(&raw, "csv/readings.csv").await.unwrap();
        cloud.put_object(&raw, "csv/readings.csv").await.unwrap();
        cloud.delete_object(&raw, "csv/readings.csv").await.unwrap();
        let results = ctx.names.bucket(BucketPurpose::QueryResults);
        cloud.put_object(&results, "query-0001.csv").await.unwrap();
        cloud
    }

    #[tokio::test]
    async fn test_destroy_twice_is_clean() {
        let ctx = ctx();
        let cloud = loaded(&ctx).await;
        let clients = CloudClients::from_provider(cloud.clone());

        let first = destroy(&clients, &ctx, &fast()).await;
        assert!(first.is_success(), "{}", first.render_text());
        assert_eq!(first.stack, StackOutcome::Deleted);
        let raw = &first.buckets[0];
        assert_eq!(raw.purpose, BucketPurpose::Raw);
        let raw_drain = raw.drain.as_ref().unwrap();
        assert_eq!(raw_drain.versions_removed, 2);
        assert_eq!(raw_drain.markers_removed, 1);
        assert_eq!(first.buckets[2].drain.as_ref().unwrap().objects_removed, 1);
        for (_, bucket) in ctx.names.buckets() {
            assert!(!cloud.has_bucket(&bucket).await);
        }

        let second = destroy(&clients, &ctx, &fast()).await;
        assert!(second.is_success(), "{}", second.render_text());
        assert_eq!(second.stack, StackOutcome::AlreadyAbsent);
        assert!(second
            .buckets
            .iter()
            .all(|b| !b.drain.as_ref().unwrap().existed));
    }

    #[tokio::test]
    async fn test_partial_drain_degrades_and_surfaces_stack_error() {
        let ctx = ctx();
        let cloud = loaded(&ctx).await;
        let curated = ctx.names.bucket(BucketPurpose::Curated);
        cloud.deny_delete(&curated, "parquet/assets/assets.parquet").await;
        let clients = CloudClients::from_provider(cloud.clone());

        let report = destroy(&clients, &ctx, &fast()).await;
        assert!(report.degraded);
        assert!(!report.is_success());
        match &report.stack {
            StackOutcome::Failed { message } => assert!(message.contains("not empty")),
            other => panic!("unexpected stack outcome {other:?}"),
        }
        let curated_teardown = &report.buckets[1];
        assert_eq!(curated_teardown.drain.as_ref().unwrap().failures.len(), 1);
        assert_eq!(curated_teardown.still_exists, Some(true));
        assert_eq!(report.buckets[0].still_exists, Some(false));
        assert!(report.render_text().contains("DEGRADED"));
    }

    #[tokio::test]
    async fn test_aborted_drain_is_recorded() {
        let ctx = ctx();
        let cloud = loaded(&ctx).await;
        let raw = ctx.names.bucket(BucketPurpose::Raw);
        cloud.deny_list(&raw).await;
        let clients = CloudClients::from_provider(cloud.clone());

        let report = destroy(&clients, &ctx, &fast()).await;
        assert!(report.degraded);
        let raw_teardown = &report.buckets[0];
        assert!(raw_teardown.drain.is_none());
        assert!(raw_teardown.drain_error.as_ref().unwrap().contains("access denied"));
        assert!(report.buckets[1].drain.as_ref().unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_report_json_shape() {
        let ctx = ctx();
        let cloud = Arc::new(MemoryCloud::new(ACCOUNT));
        let clients = CloudClients::from_provider(cloud);

        let report = destroy(&clients, &ctx, &fast()).await;
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["stack"]["status"], "already_absent");
        assert_eq!(json["degraded"], false);
        assert_eq!(json["buckets"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_zero_absence_interval_is_raised() {
        let config = DestroyConfig {
            absence_poll_interval_secs: 0,
            absence_max_wait_secs: 60,
        };
        let opts = DestroyOptions::new(&DrainConfig::default(), &config);
        assert_eq!(opts.absence_poll_interval, Duration::from_secs(1));
        assert_eq!(opts.absence_max_wait, Duration::from_secs(60));
    }
}
