//! Versioned-bucket drain.
//!
//! Empties a bucket so it can be deleted: current objects, every historical
//! version, and every delete marker.  Each phase enumerates all pages first
//! and then deletes in batches, so a phase never lists a page it is
//! simultaneously mutating.
//!
//! On buckets with versioning enabled or suspended the current-object
//! phase is skipped: an unversioned delete there would only mint a fresh
//! delete marker per key, which the version phase makes unnecessary.

use metrics::counter;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use crate::cloud::backend::{
    DeleteTarget, ObjectStore, ObjectVersionRef, VersionCursor, VersioningStatus,
};
use crate::config::DrainConfig;
use crate::errors::OpsError;
use crate::metrics::{DRAIN_ITEM_FAILURES_TOTAL, DRAIN_REMOVED_TOTAL};
use crate::retry::RetryPolicy;

/// Largest batch `DeleteObjects` accepts.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Knobs for one drain.
#[derive(Debug, Clone, Copy)]
pub struct DrainOptions {
    pub retry: RetryPolicy,
    pub batch_size: usize,
}

impl Default for DrainOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::none(),
            batch_size: MAX_DELETE_BATCH,
        }
    }
}

impl From<&DrainConfig> for DrainOptions {
    fn from(config: &DrainConfig) -> Self {
        Self {
            retry: RetryPolicy::from(config),
            batch_size: config.batch_size.clamp(1, MAX_DELETE_BATCH),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPhase {
    CurrentObjects,
    Versions,
    DeleteMarkers,
}

impl DrainPhase {
    fn metric_kind(self) -> &'static str {
        match self {
            DrainPhase::CurrentObjects => "object",
            DrainPhase::Versions => "version",
            DrainPhase::DeleteMarkers => "marker",
        }
    }
}

impl fmt::Display for DrainPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DrainPhase::CurrentObjects => "current-object purge",
            DrainPhase::Versions => "version purge",
            DrainPhase::DeleteMarkers => "delete-marker purge",
        };
        f.write_str(name)
    }
}

/// A key (or key version) that could not be removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub phase: DrainPhase,
    pub key: String,
    pub version_id: Option<String>,
    pub code: String,
    pub message: String,
}

/// Outcome of draining one bucket.
#[derive(Debug, Clone, Serialize)]
pub struct DrainResult {
    pub bucket: String,
    pub existed: bool,
    pub versioning: Option<VersioningStatus>,
    pub objects_removed: usize,
    pub versions_removed: usize,
    pub markers_removed: usize,
    pub failures: Vec<ItemFailure>,
    /// A final listing found no objects, versions or markers.
    pub drained: bool,
}

impl DrainResult {
    fn absent(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            existed: false,
            versioning: None,
            objects_removed: 0,
            versions_removed: 0,
            markers_removed: 0,
            failures: Vec::new(),
            drained: true,
        }
    }

    pub fn total_removed(&self) -> usize {
        self.objects_removed + self.versions_removed + self.markers_removed
    }

    /// Drained with no per-item failures.
    pub fn is_clean(&self) -> bool {
        self.drained && self.failures.is_empty()
    }

    pub fn render_text(&self) -> String {
        if !self.existed {
            return format!("{}: bucket does not exist, nothing to drain\n", self.bucket);
        }
        let mut out = format!(
            "{}: removed {} objects, {} versions, {} delete markers -> {}\n",
            self.bucket,
            self.objects_removed,
            self.versions_removed,
            self.markers_removed,
            if self.is_clean() { "empty" } else { "NOT EMPTY" }
        );
        for f in &self.failures {
            out.push_str(&format!(
                "  failed ({}) {}{}: {} {}\n",
                f.phase,
                f.key,
                f.version_id
                    .as_deref()
                    .map(|v| format!("@{v}"))
                    .unwrap_or_default(),
                f.code,
                f.message
            ));
        }
        out
    }

    fn record_removed(&mut self, phase: DrainPhase, count: usize) {
        match phase {
            DrainPhase::CurrentObjects => self.objects_removed += count,
            DrainPhase::Versions => self.versions_removed += count,
            DrainPhase::DeleteMarkers => self.markers_removed += count,
        }
    }
}

/// Remove every object, version and delete marker from `bucket`.
///
/// A missing bucket is a success with `existed == false`.  Permission
/// errors while listing abort the drain; per-key delete errors are
/// collected in [`DrainResult::failures`] and the drain carries on.
pub async fn drain(
    store: &dyn ObjectStore,
    bucket: &str,
    opts: &DrainOptions,
) -> Result<DrainResult, OpsError> {
    let exists = opts
        .retry
        .run("head_bucket", || store.bucket_exists(bucket))
        .await?;
    if !exists {
        info!(bucket, "Bucket does not exist, nothing to drain");
        return Ok(DrainResult::absent(bucket));
    }

    let versioning = match opts
        .retry
        .run("get_bucket_versioning", || store.versioning(bucket))
        .await
    {
        Ok(v) => v,
        Err(e) if e.is_absent() => return Ok(DrainResult::absent(bucket)),
        Err(e) => return Err(e),
    };

    let mut result = DrainResult {
        existed: true,
        versioning: Some(versioning),
        drained: false,
        ..DrainResult::absent(bucket)
    };

    info!(bucket, versioning = ?versioning, "Draining bucket");

    if versioning.keeps_history() {
        let versions = list_all_versions(store, bucket, opts).await?;
        let targets: Vec<DeleteTarget> = versions
            .into_iter()
            .filter(|v| !v.is_delete_marker)
            .map(|v| DeleteTarget::version(v.key, v.version_id))
            .collect();
        delete_in_batches(store, bucket, DrainPhase::Versions, targets, opts, &mut result).await;

        let markers = list_all_versions(store, bucket, opts).await?;
        let targets: Vec<DeleteTarget> = markers
            .into_iter()
            .filter(|v| v.is_delete_marker)
            .map(|v| DeleteTarget::version(v.key, v.version_id))
            .collect();
        delete_in_batches(store, bucket, DrainPhase::DeleteMarkers, targets, opts, &mut result)
            .await;
    } else {
        // Never-versioned buckets hold only `null` versions and no markers.
        let keys = list_all_keys(store, bucket, opts).await?;
        let targets: Vec<DeleteTarget> = keys.into_iter().map(DeleteTarget::current).collect();
        delete_in_batches(store, bucket, DrainPhase::CurrentObjects, targets, opts, &mut result)
            .await;
    }

    result.drained = confirm_empty(store, bucket, opts).await?;

    if result.drained {
        info!(
            bucket,
            objects = result.objects_removed,
            versions = result.versions_removed,
            markers = result.markers_removed,
            "Bucket drained"
        );
    } else {
        warn!(
            bucket,
            failures = result.failures.len(),
            "Bucket still holds objects after drain"
        );
    }
    Ok(result)
}

/// Every current key, all pages.
async fn list_all_keys(
    store: &dyn ObjectStore,
    bucket: &str,
    opts: &DrainOptions,
) -> Result<Vec<String>, OpsError> {
    let mut keys = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = match opts
            .retry
            .run("list_objects_v2", || {
                store.list_objects(bucket, None, token.as_deref())
            })
            .await
        {
            Ok(page) => page,
            Err(e) if e.is_absent() => break,
            Err(e) => return Err(e),
        };
        debug!(bucket, count = page.keys.len(), "Listed object page");
        keys.extend(page.keys);
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    Ok(keys)
}

/// Every version and delete marker, all pages.
async fn list_all_versions(
    store: &dyn ObjectStore,
    bucket: &str,
    opts: &DrainOptions,
) -> Result<Vec<ObjectVersionRef>, OpsError> {
    let mut entries = Vec::new();
    let mut cursor: Option<VersionCursor> = None;
    loop {
        let page = match opts
            .retry
            .run("list_object_versions", || {
                store.list_versions(bucket, cursor.as_ref())
            })
            .await
        {
            Ok(page) => page,
            Err(e) if e.is_absent() => break,
            Err(e) => return Err(e),
        };
        debug!(bucket, count = page.entries.len(), "Listed version page");
        entries.extend(page.entries);
        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(entries)
}

async fn delete_in_batches(
    store: &dyn ObjectStore,
    bucket: &str,
    phase: DrainPhase,
    targets: Vec<DeleteTarget>,
    opts: &DrainOptions,
    result: &mut DrainResult,
) {
    if targets.is_empty() {
        debug!(bucket, %phase, "Nothing to delete");
        return;
    }
    info!(bucket, %phase, count = targets.len(), "Deleting");

    let batch_size = opts.batch_size.clamp(1, MAX_DELETE_BATCH);
    for batch in targets.chunks(batch_size) {
        match opts
            .retry
            .run("delete_objects", || store.delete_batch(bucket, batch))
            .await
        {
            Ok(outcome) => {
                result.record_removed(phase, outcome.deleted);
                counter!(DRAIN_REMOVED_TOTAL, "bucket" => bucket.to_string(), "kind" => phase.metric_kind())
                    .increment(outcome.deleted as u64);
                for failure in outcome.failed {
                    warn!(
                        bucket,
                        key = %failure.key,
                        version_id = ?failure.version_id,
                        code = %failure.code,
                        "Delete failed"
                    );
                    counter!(DRAIN_ITEM_FAILURES_TOTAL, "bucket" => bucket.to_string(), "code" => failure.code.clone())
                        .increment(1);
                    result.failures.push(ItemFailure {
                        phase,
                        key: failure.key,
                        version_id: failure.version_id,
                        code: failure.code,
                        message: failure.message,
                    });
                }
            }
            Err(e) if e.is_absent() => {
                debug!(bucket, "Bucket disappeared while draining");
                return;
            }
            Err(e) => {
                warn!(bucket, %phase, size = batch.len(), error = %e, "Delete batch failed");
                counter!(DRAIN_ITEM_FAILURES_TOTAL, "bucket" => bucket.to_string(), "code" => e.code().to_string())
                    .increment(batch.len() as u64);
                result
                    .failures
                    .extend(batch.iter().map(|target| ItemFailure {
                        phase,
                        key: target.key.clone(),
                        version_id: target.version_id.clone(),
                        code: e.code().to_string(),
                        message: e.to_string(),
                    }));
            }
        }
    }
}

/// First page of both listings is empty.
async fn confirm_empty(
    store: &dyn ObjectStore,
    bucket: &str,
    opts: &DrainOptions,
) -> Result<bool, OpsError> {
    let versions = match opts
        .retry
        .run("list_object_versions", || store.list_versions(bucket, None))
        .await
    {
        Ok(page) => page,
        Err(e) if e.is_absent() => return Ok(true),
        Err(e) => return Err(e),
    };
    if !versions.entries.is_empty() {
        return Ok(false);
    }
    let objects = match opts
        .retry
        .run("list_objects_v2", || store.list_objects(bucket, None, None))
        .await
    {
        Ok(page) => page,
        Err(e) if e.is_absent() => return Ok(true),
        Err(e) => return Err(e),
    };
    Ok(objects.keys.is_empty())
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::MemoryCloud;
    use std::time::Duration;

    const ACCOUNT: &str = "123456789012";

    async fn versioned_bucket(cloud: &MemoryCloud, bucket: &str) {
        cloud.create_bucket(bucket, VersioningStatus::Enabled).await;
    }

    fn retrying() -> DrainOptions {
        DrainOptions {
            retry: RetryPolicy::new(3, Duration::ZERO),
            batch_size: MAX_DELETE_BATCH,
        }
    }

    #[tokio::test]
    async fn test_drain_versions_and_markers() {
        let cloud = MemoryCloud::new(ACCOUNT);
        versioned_bucket(&cloud, "raw").await;
        for key in ["a.txt", "a.txt", "b.txt", "b.txt"] {
            cloud.put_object("raw", key).await.unwrap();
        }
        cloud.delete_object("raw", "a.txt").await.unwrap();

        let result = drain(&cloud, "raw", &DrainOptions::default()).await.unwrap();
        assert!(result.existed);
        assert_eq!(result.objects_removed, 0);
        assert_eq!(result.versions_removed, 4);
        assert_eq!(result.markers_removed, 1);
        assert_eq!(result.total_removed(), 5);
        assert!(result.is_clean());

        let log = cloud.delete_log().await;
        assert_eq!(log.len(), 5);
        assert!(log.iter().all(|(_, t)| t.version_id.is_some()));
        assert!(cloud.versions("raw").await.is_empty());
    }

    #[tokio::test]
    async fn test_second_drain_removes_nothing() {
        let cloud = MemoryCloud::new(ACCOUNT);
        versioned_bucket(&cloud, "curated").await;
        cloud.put_object("curated", "parquet/assets/assets.parquet").await.unwrap();

        let first = drain(&cloud, "curated", &DrainOptions::default()).await.unwrap();
        assert_eq!(first.total_removed(), 1);

        let second = drain(&cloud, "curated", &DrainOptions::default()).await.unwrap();
        assert!(second.existed);
        assert_eq!(second.total_removed(), 0);
        assert!(second.drained);
    }

    #[tokio::test]
    async fn test_drain_missing_bucket() {
        let cloud = MemoryCloud::new(ACCOUNT);
        let result = drain(&cloud, "gone", &DrainOptions::default()).await.unwrap();
        assert!(!result.existed);
        assert!(result.drained);
        assert_eq!(result.total_removed(), 0);
        assert!(cloud.delete_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_drain_unversioned_bucket_uses_object_phase() {
        let cloud = MemoryCloud::new(ACCOUNT);
        cloud.create_bucket("results", VersioningStatus::Unversioned).await;
        for key in ["q1.csv", "q1.csv.metadata", "q2.csv"] {
            cloud.put_object("results", key).await.unwrap();
        }

        let result = drain(&cloud, "results", &DrainOptions::default()).await.unwrap();
        assert_eq!(result.objects_removed, 3);
        assert_eq!(result.versions_removed, 0);
        assert_eq!(result.markers_removed, 0);
        assert!(result.drained);
    }

    #[tokio::test]
    async fn test_unversioned_locked_key_fails_once() {
        let cloud = MemoryCloud::new(ACCOUNT);
        cloud.create_bucket("results", VersioningStatus::Unversioned).await;
        cloud.put_object("results", "locked.csv").await.unwrap();
        cloud.put_object("results", "q1.csv").await.unwrap();
        cloud.deny_delete("results", "locked.csv").await;

        let result = drain(&cloud, "results", &DrainOptions::default()).await.unwrap();
        assert_eq!(result.objects_removed, 1);
        assert_eq!(result.versions_removed, 0);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].phase, DrainPhase::CurrentObjects);
        assert_eq!(result.failures[0].key, "locked.csv");
        assert_eq!(result.failures[0].version_id, None);
        assert!(!result.drained);
    }

    #[tokio::test]
    async fn test_drain_suspended_bucket() {
        let cloud = MemoryCloud::new(ACCOUNT);
        cloud.create_bucket("suspended", VersioningStatus::Suspended).await;
        cloud.put_object("suspended", "a.csv").await.unwrap();
        cloud.put_object("suspended", "b.csv").await.unwrap();
        cloud.delete_object("suspended", "b.csv").await.unwrap();

        let result = drain(&cloud, "suspended", &DrainOptions::default()).await.unwrap();
        assert_eq!(result.versioning, Some(VersioningStatus::Suspended));
        assert_eq!(result.objects_removed, 0);
        assert_eq!(result.versions_removed, 1);
        assert_eq!(result.markers_removed, 1);
        assert!(result.is_clean());
        assert!(cloud.versions("suspended").await.is_empty());
        let log = cloud.delete_log().await;
        assert!(log.iter().all(|(_, t)| t.version_id.as_deref() == Some("null")));
    }

    #[tokio::test]
    async fn test_drain_paginates_and_batches() {
        let cloud = MemoryCloud::new(ACCOUNT).with_page_size(3);
        versioned_bucket(&cloud, "paged").await;
        for i in 0..7 {
            let key = format!("k{i}");
            cloud.put_object("paged", &key).await.unwrap();
            cloud.put_object("paged", &key).await.unwrap();
        }

        let opts = DrainOptions {
            retry: RetryPolicy::none(),
            batch_size: 4,
        };
        let result = drain(&cloud, "paged", &opts).await.unwrap();
        assert_eq!(result.versions_removed, 14);
        assert!(result.drained);
    }

    #[tokio::test]
    async fn test_per_item_failure_does_not_abort() {
        let cloud = MemoryCloud::new(ACCOUNT);
        versioned_bucket(&cloud, "raw").await;
        cloud.put_object("raw", "locked.csv").await.unwrap();
        cloud.put_object("raw", "open.csv").await.unwrap();
        cloud.deny_delete("raw", "locked.csv").await;

        let result = drain(&cloud, "raw", &DrainOptions::default()).await.unwrap();
        assert_eq!(result.versions_removed, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].key, "locked.csv");
        assert_eq!(result.failures[0].code, "AccessDenied");
        assert_eq!(result.failures[0].phase, DrainPhase::Versions);
        assert!(!result.drained);
        assert!(!result.is_clean());
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let cloud = MemoryCloud::new(ACCOUNT);
        versioned_bucket(&cloud, "raw").await;
        cloud.put_object("raw", "a.csv").await.unwrap();
        cloud.fail_next_calls(2).await;

        let result = drain(&cloud, "raw", &retrying()).await.unwrap();
        assert_eq!(result.versions_removed, 1);
        assert!(result.is_clean());
    }

    #[tokio::test]
    async fn test_list_permission_denied_is_fatal() {
        let cloud = MemoryCloud::new(ACCOUNT);
        versioned_bucket(&cloud, "raw").await;
        cloud.put_object("raw", "a.csv").await.unwrap();
        cloud.deny_list("raw").await;

        let err = drain(&cloud, "raw", &DrainOptions::default()).await.unwrap_err();
        assert!(err.is_permission_denied());
        assert!(err.to_string().contains("raw"));
    }

    #[test]
    fn test_options_clamp_batch_size() {
        let config = DrainConfig {
            max_attempts: 3,
            retry_delay_ms: 10,
            batch_size: 5000,
        };
        let opts = DrainOptions::from(&config);
        assert_eq!(opts.batch_size, MAX_DELETE_BATCH);
        assert_eq!(opts.retry.max_attempts, 3);
    }
}
