//! In-memory cloud simulation.
//!
//! Models just enough provider behavior for the workflows to be exercised
//! end to end: versioned buckets with delete markers and `null` versions,
//! paginated listings, a Glue-like catalog whose partitions are discovered
//! from the object layout, Athena-like asynchronous queries, and a stack
//! that refuses to delete non-empty buckets.
//!
//! Faults (permission errors, throttling) can be injected for tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tokio::sync::RwLock;

use super::backend::{
    Catalog, CloudFuture, DeleteFailure, DeleteOutcome, DeleteTarget, Identity, ObjectPage,
    ObjectStore, ObjectVersionRef, QueryService, QueryState, StackTool, VersionCursor,
    VersionPage, VersioningStatus,
};
use crate::errors::OpsError;
use crate::naming::{BucketPurpose, ResourceNames, CURATED_DATA_PREFIX, PARTITIONED_TABLE, TABLES};

/// Version id S3 assigns to objects written while versioning is off.
const NULL_VERSION: &str = "null";

/// Resources a simulated stack owns.
#[derive(Debug, Clone)]
pub struct StackTemplate {
    pub stack_name: String,
    pub buckets: Vec<(String, VersioningStatus)>,
    pub database: String,
    pub tables: Vec<TemplateTable>,
    pub workgroup: String,
    pub etl_job: String,
}

/// A catalog table in a [`StackTemplate`].
#[derive(Debug, Clone)]
pub struct TemplateTable {
    pub name: String,
    /// `(bucket, prefix)` the table reads from.
    pub location: (String, String),
    pub partitioned: bool,
}

impl StackTemplate {
    /// The data-lake stack: versioned raw and curated zones, an unversioned
    /// query-results bucket, three curated tables, one workgroup and the
    /// raw-to-curated ETL job.
    pub fn for_names(names: &ResourceNames) -> Self {
        let curated = names.bucket(BucketPurpose::Curated);
        let tables = TABLES
            .iter()
            .map(|t| TemplateTable {
                name: t.to_string(),
                location: (curated.clone(), format!("{CURATED_DATA_PREFIX}{t}/")),
                partitioned: *t == PARTITIONED_TABLE,
            })
            .collect();

        Self {
            stack_name: names.stack_name.clone(),
            buckets: vec![
                (names.bucket(BucketPurpose::Raw), VersioningStatus::Enabled),
                (names.bucket(BucketPurpose::Curated), VersioningStatus::Enabled),
                (
                    names.bucket(BucketPurpose::QueryResults),
                    VersioningStatus::Unversioned,
                ),
            ],
            database: names.database.clone(),
            tables,
            workgroup: names.workgroup.clone(),
            etl_job: names.etl_job.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct MemVersion {
    version_id: String,
    delete_marker: bool,
}

#[derive(Debug)]
struct MemBucket {
    versioning: VersioningStatus,
    /// key -> versions, oldest first.
    keys: BTreeMap<String, Vec<MemVersion>>,
}

impl MemBucket {
    fn current_keys(&self) -> impl Iterator<Item = &String> {
        self.keys
            .iter()
            .filter(|(_, versions)| versions.last().is_some_and(|v| !v.delete_marker))
            .map(|(key, _)| key)
    }

    /// Every version and marker, keys ascending, newest version first.
    fn version_refs(&self) -> Vec<ObjectVersionRef> {
        let mut out = Vec::new();
        for (key, versions) in &self.keys {
            for v in versions.iter().rev() {
                out.push(ObjectVersionRef {
                    key: key.clone(),
                    version_id: v.version_id.clone(),
                    is_delete_marker: v.delete_marker,
                });
            }
        }
        out
    }
}

#[derive(Debug)]
struct MemTable {
    location: (String, String),
    partitioned: bool,
    partitions: usize,
}

#[derive(Debug)]
struct MemQuery {
    sql: String,
    database: String,
    polls_remaining: u32,
    state: QueryState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackState {
    Live,
    DeleteFailed,
}

#[derive(Debug, Default)]
struct Faults {
    denied_lists: HashSet<String>,
    denied_keys: HashSet<(String, String)>,
    transient_failures: u32,
    repair_polls: u32,
}

#[derive(Debug, Default)]
struct MemState {
    buckets: BTreeMap<String, MemBucket>,
    databases: BTreeSet<String>,
    tables: BTreeMap<(String, String), MemTable>,
    workgroups: BTreeSet<String>,
    jobs: BTreeSet<String>,
    templates: BTreeMap<String, StackTemplate>,
    stacks: BTreeMap<String, StackState>,
    queries: HashMap<String, MemQuery>,
    next_version: u64,
    next_query: u64,
    faults: Faults,
    delete_log: Vec<(String, DeleteTarget)>,
}

impl MemState {
    fn new_version_id(&mut self) -> String {
        self.next_version += 1;
        format!("v{:06}", self.next_version)
    }

    /// Consume one injected transient failure, if any are pending.
    fn take_transient(&mut self, operation: &str) -> Result<(), OpsError> {
        if self.faults.transient_failures > 0 {
            self.faults.transient_failures -= 1;
            return Err(OpsError::Transient {
                operation: operation.to_string(),
                message: "SlowDown: Please reduce your request rate.".to_string(),
            });
        }
        Ok(())
    }

    fn bucket(&self, name: &str) -> Result<&MemBucket, OpsError> {
        self.buckets
            .get(name)
            .ok_or_else(|| OpsError::absent("bucket", name))
    }

    fn check_list_allowed(&self, operation: &str, bucket: &str) -> Result<(), OpsError> {
        if self.faults.denied_lists.contains(bucket) {
            return Err(OpsError::PermissionDenied {
                operation: operation.to_string(),
                resource: bucket.to_string(),
                message: "Access Denied".to_string(),
            });
        }
        Ok(())
    }

    fn put_object(&mut self, bucket: &str, key: &str) -> Result<(), OpsError> {
        let version_id = self.new_version_id();
        let b = self
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| OpsError::absent("bucket", bucket))?;
        let versions = b.keys.entry(key.to_string()).or_default();
        match b.versioning {
            VersioningStatus::Unversioned => {
                versions.clear();
                versions.push(MemVersion {
                    version_id: NULL_VERSION.to_string(),
                    delete_marker: false,
                });
            }
            VersioningStatus::Suspended => {
                versions.retain(|v| v.version_id != NULL_VERSION);
                versions.push(MemVersion {
                    version_id: NULL_VERSION.to_string(),
                    delete_marker: false,
                });
            }
            VersioningStatus::Enabled => versions.push(MemVersion {
                version_id,
                delete_marker: false,
            }),
        }
        Ok(())
    }

    fn delete_one(&mut self, bucket: &str, target: &DeleteTarget) -> Result<(), OpsError> {
        let marker_id = self.new_version_id();
        let b = self
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| OpsError::absent("bucket", bucket))?;

        match &target.version_id {
            Some(version_id) => {
                if let Some(versions) = b.keys.get_mut(&target.key) {
                    versions.retain(|v| &v.version_id != version_id);
                    if versions.is_empty() {
                        b.keys.remove(&target.key);
                    }
                }
            }
            None => match b.versioning {
                VersioningStatus::Unversioned => {
                    b.keys.remove(&target.key);
                }
                VersioningStatus::Enabled => {
                    if let Some(versions) = b.keys.get_mut(&target.key) {
                        versions.push(MemVersion {
                            version_id: marker_id,
                            delete_marker: true,
                        });
                    }
                }
                VersioningStatus::Suspended => {
                    if let Some(versions) = b.keys.get_mut(&target.key) {
                        versions.retain(|v| v.version_id != NULL_VERSION);
                        versions.push(MemVersion {
                            version_id: NULL_VERSION.to_string(),
                            delete_marker: true,
                        });
                    }
                }
            },
        }
        Ok(())
    }

    /// Scan a table's location for `name=value/` directories.
    fn discover_partitions(&mut self, database: &str, table: &str) -> Result<usize, OpsError> {
        let resource = format!("{database}.{table}");
        let (bucket, prefix) = self
            .tables
            .get(&(database.to_string(), table.to_string()))
            .map(|t| t.location.clone())
            .ok_or_else(|| OpsError::absent("table", resource.as_str()))?;

        let mut partitions = BTreeSet::new();
        if let Some(b) = self.buckets.get(&bucket) {
            for key in b.current_keys() {
                let Some(rest) = key.strip_prefix(prefix.as_str()) else {
                    continue;
                };
                let segments: Vec<&str> = rest.split('/').collect();
                let dirs = &segments[..segments.len().saturating_sub(1)];
                if !dirs.is_empty() && dirs.iter().all(|s| s.contains('=')) {
                    partitions.insert(dirs.join("/"));
                }
            }
        }

        let count = partitions.len();
        if let Some(t) = self
            .tables
            .get_mut(&(database.to_string(), table.to_string()))
        {
            if t.partitioned {
                t.partitions = count;
            }
        }
        Ok(count)
    }

    fn run_query(&mut self, sql: &str, database: &str) -> QueryState {
        let normalized = sql.trim().trim_end_matches(';');
        let Some(target) = normalized
            .strip_prefix("MSCK REPAIR TABLE ")
            .map(str::trim)
        else {
            return QueryState::Succeeded;
        };
        let (db, table) = target.split_once('.').unwrap_or((database, target));
        match self.discover_partitions(db, table) {
            Ok(_) => QueryState::Succeeded,
            Err(e) => QueryState::Failed(e.to_string()),
        }
    }
}

/// A whole simulated AWS account.
pub struct MemoryCloud {
    account_id: String,
    page_size: usize,
    state: RwLock<MemState>,
}

impl MemoryCloud {
    pub fn new(account_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            page_size: 1000,
            state: RwLock::new(MemState::default()),
        }
    }

    /// Cap listing pages so pagination paths get exercised.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Make `template` deployable under its stack name.
    pub async fn register_stack(&self, template: StackTemplate) {
        let mut state = self.state.write().await;
        state.templates.insert(template.stack_name.clone(), template);
    }

    pub async fn create_bucket(&self, bucket: &str, versioning: VersioningStatus) {
        let mut state = self.state.write().await;
        state.buckets.entry(bucket.to_string()).or_insert(MemBucket {
            versioning,
            keys: BTreeMap::new(),
        });
    }

    pub async fn put_object(&self, bucket: &str, key: &str) -> Result<(), OpsError> {
        self.state.write().await.put_object(bucket, key)
    }

    /// Unversioned delete (mints a delete marker on versioned buckets).
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), OpsError> {
        self.state
            .write()
            .await
            .delete_one(bucket, &DeleteTarget::current(key))
    }

    pub async fn has_bucket(&self, bucket: &str) -> bool {
        self.state.read().await.buckets.contains_key(bucket)
    }

    /// All versions and markers currently in `bucket`.
    pub async fn versions(&self, bucket: &str) -> Vec<ObjectVersionRef> {
        let state = self.state.read().await;
        state
            .buckets
            .get(bucket)
            .map(MemBucket::version_refs)
            .unwrap_or_default()
    }

    /// Every delete call applied so far, in order.
    pub async fn delete_log(&self) -> Vec<(String, DeleteTarget)> {
        self.state.read().await.delete_log.clone()
    }

    pub async fn set_partitions(&self, database: &str, table: &str, count: usize) {
        let mut state = self.state.write().await;
        if let Some(t) = state
            .tables
            .get_mut(&(database.to_string(), table.to_string()))
        {
            t.partitions = count;
        }
    }

    /// Number of queries started so far.
    pub async fn query_count(&self) -> usize {
        self.state.read().await.queries.len()
    }

    pub async fn deny_list(&self, bucket: &str) {
        self.state
            .write()
            .await
            .faults
            .denied_lists
            .insert(bucket.to_string());
    }

    pub async fn deny_delete(&self, bucket: &str, key: &str) {
        self.state
            .write()
            .await
            .faults
            .denied_keys
            .insert((bucket.to_string(), key.to_string()));
    }

    /// Fail the next `count` object-store calls with a throttling error.
    pub async fn fail_next_calls(&self, count: u32) {
        self.state.write().await.faults.transient_failures = count;
    }

    /// Polls a query reports `Running` before it completes.
    pub async fn set_query_latency(&self, polls: u32) {
        self.state.write().await.faults.repair_polls = polls;
    }

    /// Upload the sample data set: one Parquet file each for assets and
    /// sensors, readings split into `year=/month=` partitions.
    pub async fn load_sample_data(&self, names: &ResourceNames) -> Result<(), OpsError> {
        let curated = names.bucket(BucketPurpose::Curated);
        for key in [
            "parquet/assets/assets.parquet",
            "parquet/sensors/sensors.parquet",
            "parquet/readings/year=2024/month=1/readings.parquet",
            "parquet/readings/year=2024/month=2/readings.parquet",
        ] {
            self.put_object(&curated, key).await?;
        }
        Ok(())
    }
}

impl ObjectStore for MemoryCloud {
    fn bucket_exists(&self, bucket: &str) -> CloudFuture<'_, bool> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.take_transient("head_bucket")?;
            Ok(state.buckets.contains_key(&bucket))
        })
    }

    fn versioning(&self, bucket: &str) -> CloudFuture<'_, VersioningStatus> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.take_transient("get_bucket_versioning")?;
            Ok(state.bucket(&bucket)?.versioning)
        })
    }

    fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<&str>,
    ) -> CloudFuture<'_, ObjectPage> {
        let bucket = bucket.to_string();
        let prefix = prefix.unwrap_or("").to_string();
        let token = token.map(str::to_string);
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.take_transient("list_objects_v2")?;
            state.check_list_allowed("list_objects_v2", &bucket)?;

            let matching: Vec<String> = state
                .bucket(&bucket)?
                .current_keys()
                .filter(|k| k.starts_with(&prefix))
                .filter(|k| token.as_ref().map_or(true, |t| k.as_str() > t.as_str()))
                .cloned()
                .collect();

            let truncated = matching.len() > self.page_size;
            let keys: Vec<String> = matching.into_iter().take(self.page_size).collect();
            let next_token = if truncated { keys.last().cloned() } else { None };
            Ok(ObjectPage { keys, next_token })
        })
    }

    fn list_versions(
        &self,
        bucket: &str,
        cursor: Option<&VersionCursor>,
    ) -> CloudFuture<'_, VersionPage> {
        let bucket = bucket.to_string();
        let cursor = cursor.cloned();
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.take_transient("list_object_versions")?;
            state.check_list_allowed("list_object_versions", &bucket)?;

            let all = state.bucket(&bucket)?.version_refs();
            let start = match &cursor {
                None => 0,
                Some(c) => {
                    let key = c.key_marker.clone().unwrap_or_default();
                    let exact = all.iter().position(|e| {
                        e.key == key && Some(&e.version_id) == c.version_id_marker.as_ref()
                    });
                    match exact {
                        Some(idx) => idx + 1,
                        None => all
                            .iter()
                            .position(|e| e.key > key)
                            .unwrap_or(all.len()),
                    }
                }
            };

            let entries: Vec<ObjectVersionRef> =
                all.iter().skip(start).take(self.page_size).cloned().collect();
            let next = if start + entries.len() < all.len() {
                entries.last().map(|last| VersionCursor {
                    key_marker: Some(last.key.clone()),
                    version_id_marker: Some(last.version_id.clone()),
                })
            } else {
                None
            };
            Ok(VersionPage { entries, next })
        })
    }

    fn delete_batch(
        &self,
        bucket: &str,
        targets: &[DeleteTarget],
    ) -> CloudFuture<'_, DeleteOutcome> {
        let bucket = bucket.to_string();
        let targets = targets.to_vec();
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.take_transient("delete_objects")?;
            state.bucket(&bucket)?;

            let mut outcome = DeleteOutcome::default();
            for target in targets {
                if state
                    .faults
                    .denied_keys
                    .contains(&(bucket.clone(), target.key.clone()))
                {
                    outcome.failed.push(DeleteFailure {
                        key: target.key.clone(),
                        version_id: target.version_id.clone(),
                        code: "AccessDenied".to_string(),
                        message: "Access Denied".to_string(),
                    });
                    continue;
                }
                state.delete_one(&bucket, &target)?;
                state.delete_log.push((bucket.clone(), target));
                outcome.deleted += 1;
            }
            Ok(outcome)
        })
    }
}

impl Catalog for MemoryCloud {
    fn database_exists(&self, database: &str) -> CloudFuture<'_, bool> {
        let database = database.to_string();
        Box::pin(async move { Ok(self.state.read().await.databases.contains(&database)) })
    }

    fn table_exists(&self, database: &str, table: &str) -> CloudFuture<'_, bool> {
        let key = (database.to_string(), table.to_string());
        Box::pin(async move { Ok(self.state.read().await.tables.contains_key(&key)) })
    }

    fn partition_count(&self, database: &str, table: &str) -> CloudFuture<'_, usize> {
        let key = (database.to_string(), table.to_string());
        Box::pin(async move {
            let state = self.state.read().await;
            state
                .tables
                .get(&key)
                .map(|t| t.partitions)
                .ok_or_else(|| OpsError::absent("table", format!("{}.{}", key.0, key.1)))
        })
    }

    fn job_exists(&self, job: &str) -> CloudFuture<'_, bool> {
        let job = job.to_string();
        Box::pin(async move { Ok(self.state.read().await.jobs.contains(&job)) })
    }
}

impl QueryService for MemoryCloud {
    fn workgroup_exists(&self, workgroup: &str) -> CloudFuture<'_, bool> {
        let workgroup = workgroup.to_string();
        Box::pin(async move { Ok(self.state.read().await.workgroups.contains(&workgroup)) })
    }

    fn start_query(&self, sql: &str, database: &str, workgroup: &str) -> CloudFuture<'_, String> {
        let sql = sql.to_string();
        let database = database.to_string();
        let workgroup = workgroup.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            if !state.workgroups.contains(&workgroup) {
                return Err(OpsError::absent("workgroup", workgroup));
            }
            state.next_query += 1;
            let id = format!("query-{:04}", state.next_query);
            let polls_remaining = state.faults.repair_polls;
            state.queries.insert(
                id.clone(),
                MemQuery {
                    sql,
                    database,
                    polls_remaining,
                    state: QueryState::Queued,
                },
            );
            Ok(id)
        })
    }

    fn query_state(&self, execution_id: &str) -> CloudFuture<'_, QueryState> {
        let execution_id = execution_id.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let query = state
                .queries
                .get_mut(&execution_id)
                .ok_or_else(|| OpsError::absent("query", execution_id.as_str()))?;

            if query.state.is_terminal() {
                return Ok(query.state.clone());
            }
            if query.polls_remaining > 0 {
                query.polls_remaining -= 1;
                query.state = QueryState::Running;
                return Ok(QueryState::Running);
            }

            let (sql, database) = (query.sql.clone(), query.database.clone());
            let result = state.run_query(&sql, &database);
            if let Some(query) = state.queries.get_mut(&execution_id) {
                query.state = result.clone();
            }
            Ok(result)
        })
    }
}

impl StackTool for MemoryCloud {
    fn deploy(&self, stack_name: &str) -> CloudFuture<'_, ()> {
        let stack_name = stack_name.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let template = state
                .templates
                .get(&stack_name)
                .cloned()
                .ok_or_else(|| OpsError::Provider {
                    operation: "cdk deploy".to_string(),
                    code: None,
                    message: format!("No stack found matching '{stack_name}'"),
                })?;

            for (bucket, versioning) in &template.buckets {
                state.buckets.entry(bucket.clone()).or_insert(MemBucket {
                    versioning: *versioning,
                    keys: BTreeMap::new(),
                });
            }
            state.databases.insert(template.database.clone());
            for table in &template.tables {
                state
                    .tables
                    .entry((template.database.clone(), table.name.clone()))
                    .or_insert(MemTable {
                        location: table.location.clone(),
                        partitioned: table.partitioned,
                        partitions: 0,
                    });
            }
            state.workgroups.insert(template.workgroup.clone());
            state.jobs.insert(template.etl_job.clone());
            state.stacks.insert(stack_name, StackState::Live);
            Ok(())
        })
    }

    fn destroy(&self, stack_name: &str) -> CloudFuture<'_, ()> {
        let stack_name = stack_name.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            if !state.stacks.contains_key(&stack_name) {
                return Ok(());
            }
            let Some(template) = state.templates.get(&stack_name).cloned() else {
                state.stacks.remove(&stack_name);
                return Ok(());
            };

            state.databases.remove(&template.database);
            state.tables.retain(|(db, _), _| db != &template.database);
            state.workgroups.remove(&template.workgroup);
            state.jobs.remove(&template.etl_job);

            let mut not_empty = Vec::new();
            for (bucket, _) in &template.buckets {
                match state.buckets.get(bucket).map(|b| b.keys.is_empty()) {
                    Some(false) => not_empty.push(bucket.clone()),
                    Some(true) => {
                        state.buckets.remove(bucket);
                    }
                    None => {}
                }
            }

            if not_empty.is_empty() {
                state.stacks.remove(&stack_name);
                return Ok(());
            }

            state.stacks.insert(stack_name.clone(), StackState::DeleteFailed);
            Err(OpsError::Provider {
                operation: "cdk destroy".to_string(),
                code: Some("DELETE_FAILED".to_string()),
                message: format!(
                    "{stack_name} failed: The bucket you tried to delete is not empty (Service: S3, Bucket: {})",
                    not_empty.join(", ")
                ),
            })
        })
    }

    fn stack_exists(&self, stack_name: &str) -> CloudFuture<'_, bool> {
        let stack_name = stack_name.to_string();
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(matches!(
                state.stacks.get(&stack_name),
                Some(StackState::Live | StackState::DeleteFailed)
            ))
        })
    }
}

impl Identity for MemoryCloud {
    fn account_id(&self) -> CloudFuture<'_, String> {
        Box::pin(async move { Ok(self.account_id.clone()) })
    }
}

// -- Tests -------------------------------------------------------------------
