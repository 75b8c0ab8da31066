//! Abstract cloud boundary.
//!
//! The workflows only talk to the provider through these traits.  Each
//! method returns a pinned boxed future so the traits stay object-safe
//! and can be held as `Arc<dyn ...>`.

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

use crate::errors::OpsError;

/// Boxed future returned by every boundary call.
pub type CloudFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, OpsError>> + Send + 'a>>;

/// Bucket versioning state as reported by `GetBucketVersioning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VersioningStatus {
    /// Versioning was never enabled.
    Unversioned,
    Enabled,
    Suspended,
}

impl VersioningStatus {
    /// Whether unversioned deletes leave delete markers behind.
    pub fn keeps_history(self) -> bool {
        !matches!(self, VersioningStatus::Unversioned)
    }
}

/// One page of current object keys.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub keys: Vec<String>,
    /// Continuation token for the next page, if truncated.
    pub next_token: Option<String>,
}

/// One object version or delete marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectVersionRef {
    pub key: String,
    pub version_id: String,
    pub is_delete_marker: bool,
}

/// Resume position inside a version listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionCursor {
    pub key_marker: Option<String>,
    pub version_id_marker: Option<String>,
}

/// One page of `ListObjectVersions` (versions and markers merged).
#[derive(Debug, Clone, Default)]
pub struct VersionPage {
    pub entries: Vec<ObjectVersionRef>,
    pub next: Option<VersionCursor>,
}

/// A key, optionally pinned to one version, to delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteTarget {
    pub key: String,
    pub version_id: Option<String>,
}

impl DeleteTarget {
    pub fn current(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version_id: None,
        }
    }

    pub fn version(key: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version_id: Some(version_id.into()),
        }
    }
}

/// Per-key error from a batch delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteFailure {
    pub key: String,
    pub version_id: Option<String>,
    pub code: String,
    pub message: String,
}

/// Result of one batch delete call.
#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    pub deleted: usize,
    pub failed: Vec<DeleteFailure>,
}

/// Execution state of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed(String),
    Cancelled,
}

impl QueryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueryState::Queued | QueryState::Running)
    }
}

/// Object storage (S3).
pub trait ObjectStore: Send + Sync + 'static {
    /// Whether `bucket` exists and is reachable.
    fn bucket_exists(&self, bucket: &str) -> CloudFuture<'_, bool>;

    /// Versioning status; `ResourceAbsent` if the bucket is missing.
    fn versioning(&self, bucket: &str) -> CloudFuture<'_, VersioningStatus>;

    /// One page of current object keys under `prefix`.
    fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<&str>,
    ) -> CloudFuture<'_, ObjectPage>;

    /// One page of object versions and delete markers.
    fn list_versions(
        &self,
        bucket: &str,
        cursor: Option<&VersionCursor>,
    ) -> CloudFuture<'_, VersionPage>;

    /// Delete up to 1000 targets in one call.
    fn delete_batch(&self, bucket: &str, targets: &[DeleteTarget])
        -> CloudFuture<'_, DeleteOutcome>;
}

/// Metadata catalog (Glue).
pub trait Catalog: Send + Sync + 'static {
    fn database_exists(&self, database: &str) -> CloudFuture<'_, bool>;

    fn table_exists(&self, database: &str, table: &str) -> CloudFuture<'_, bool>;

    /// Number of registered partitions; `ResourceAbsent` if the table is missing.
    fn partition_count(&self, database: &str, table: &str) -> CloudFuture<'_, usize>;

    fn job_exists(&self, job: &str) -> CloudFuture<'_, bool>;
}

/// Query service (Athena).
pub trait QueryService: Send + Sync + 'static {
    fn workgroup_exists(&self, workgroup: &str) -> CloudFuture<'_, bool>;

    /// Start a query and return its execution id.
    fn start_query(&self, sql: &str, database: &str, workgroup: &str) -> CloudFuture<'_, String>;

    fn query_state(&self, execution_id: &str) -> CloudFuture<'_, QueryState>;
}

/// Infrastructure-as-code tool.  Both commands are idempotent.
pub trait StackTool: Send + Sync + 'static {
    fn deploy(&self, stack_name: &str) -> CloudFuture<'_, ()>;

    fn destroy(&self, stack_name: &str) -> CloudFuture<'_, ()>;

    fn stack_exists(&self, stack_name: &str) -> CloudFuture<'_, bool>;
}

/// Caller identity (STS).
pub trait Identity: Send + Sync + 'static {
    fn account_id(&self) -> CloudFuture<'_, String>;
}
