//! AWS implementation of the cloud boundary.
//!
//! Object storage goes to S3, the catalog to Glue, queries to Athena and
//! the caller identity to STS.  Deploy and destroy shell out to the CDK
//! CLI; stack existence is read back through CloudFormation.
//!
//! Credentials are resolved via the standard AWS credential chain
//! (env vars, `~/.aws/credentials`, IAM role, etc.).

use aws_sdk_athena::types::{QueryExecutionContext, QueryExecutionState};
use aws_sdk_cloudformation::types::StackStatus;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{BucketVersioningStatus, Delete, ObjectIdentifier};
use tracing::{debug, info};

use super::backend::{
    Catalog, CloudFuture, DeleteFailure, DeleteOutcome, DeleteTarget, Identity, ObjectPage,
    ObjectStore, ObjectVersionRef, QueryService, QueryState, StackTool, VersionCursor,
    VersionPage, VersioningStatus,
};
use crate::config::{AwsConfig, StackConfig};
use crate::errors::OpsError;

/// Clients for every AWS service the workflows touch.
pub struct AwsCloud {
    s3: aws_sdk_s3::Client,
    glue: aws_sdk_glue::Client,
    athena: aws_sdk_athena::Client,
    sts: aws_sdk_sts::Client,
    cloudformation: aws_sdk_cloudformation::Client,
    /// Region passed to the CDK child process.
    region: String,
    /// CDK executable.
    cdk_bin: String,
    /// Directory containing the CDK app (`cdk.json`).
    app_dir: String,
}

impl AwsCloud {
    /// Load shared SDK configuration and build every service client.
    pub async fn new(aws: &AwsConfig, stack: &StackConfig) -> anyhow::Result<Self> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(aws.region.clone()));

        if let Some(ref endpoint) = aws.endpoint_url {
            config_loader = config_loader.endpoint_url(endpoint);
        }
        if let Some(ref profile) = aws.profile {
            config_loader = config_loader.profile_name(profile);
        }

        let sdk_config = config_loader.load().await;

        // Custom endpoints (LocalStack, MinIO) generally need path-style addressing.
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(aws.endpoint_url.is_some())
            .build();

        info!(
            "AWS clients initialized: region={} endpoint={}",
            aws.region,
            aws.endpoint_url.as_deref().unwrap_or("default")
        );

        Ok(Self {
            s3: aws_sdk_s3::Client::from_conf(s3_config),
            glue: aws_sdk_glue::Client::new(&sdk_config),
            athena: aws_sdk_athena::Client::new(&sdk_config),
            sts: aws_sdk_sts::Client::new(&sdk_config),
            cloudformation: aws_sdk_cloudformation::Client::new(&sdk_config),
            region: aws.region.clone(),
            cdk_bin: stack.cdk_bin.clone(),
            app_dir: stack.app_dir.clone(),
        })
    }

    /// Run `cdk <command> <stack> ...` in the app directory.
    ///
    /// A non-zero exit is surfaced with the tool's stderr verbatim.
    async fn run_cdk(&self, command: &str, stack_name: &str) -> Result<(), OpsError> {
        let args = cdk_args(command, stack_name);
        info!("Running {} {}", self.cdk_bin, args.join(" "));

        let output = tokio::process::Command::new(&self.cdk_bin)
            .args(&args)
            .current_dir(&self.app_dir)
            .env("AWS_REGION", &self.region)
            .env("CDK_DEFAULT_REGION", &self.region)
            .output()
            .await
            .map_err(|e| OpsError::Provider {
                operation: format!("cdk {command}"),
                code: None,
                message: format!("failed to launch {}: {e}", self.cdk_bin),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(OpsError::Provider {
            operation: format!("cdk {command}"),
            code: output.status.code().map(|c| format!("exit {c}")),
            message: stderr.trim().to_string(),
        })
    }
}

/// Map an AWS SDK error to an [`OpsError`] using its service error code.
fn classify_sdk_error<E, R>(operation: &str, resource: &str, err: SdkError<E, R>) -> OpsError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    if matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)) {
        return OpsError::Transient {
            operation: operation.to_string(),
            message: DisplayErrorContext(&err).to_string(),
        };
    }
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
    OpsError::classify(operation, resource, err.code(), &message)
}

/// Turn an absence error into `Ok(false)`.
fn absent_as_false(result: Result<(), OpsError>) -> Result<bool, OpsError> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_absent() => Ok(false),
        Err(e) => Err(e),
    }
}

fn cdk_args(command: &str, stack_name: &str) -> Vec<String> {
    let mut args = vec![command.to_string(), stack_name.to_string()];
    match command {
        "deploy" => args.extend(["--require-approval".to_string(), "never".to_string()]),
        "destroy" => args.push("--force".to_string()),
        _ => {}
    }
    args
}

fn map_query_state(state: Option<&QueryExecutionState>, reason: Option<&str>) -> QueryState {
    match state {
        Some(QueryExecutionState::Queued) | None => QueryState::Queued,
        Some(QueryExecutionState::Running) => QueryState::Running,
        Some(QueryExecutionState::Succeeded) => QueryState::Succeeded,
        Some(QueryExecutionState::Cancelled) => QueryState::Cancelled,
        Some(QueryExecutionState::Failed) => {
            QueryState::Failed(reason.unwrap_or("no reason given").to_string())
        }
        Some(other) => QueryState::Failed(format!("unexpected state {}", other.as_str())),
    }
}

fn stack_status_is_live(status: Option<&StackStatus>) -> bool {
    !matches!(status, Some(StackStatus::DeleteComplete))
}

impl ObjectStore for AwsCloud {
    fn bucket_exists(&self, bucket: &str) -> CloudFuture<'_, bool> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!("AWS head_bucket: bucket={}", bucket);
            match self.s3.head_bucket().bucket(&bucket).send().await {
                Ok(_) => Ok(true),
                Err(SdkError::ServiceError(ctx)) if ctx.err().is_not_found() => Ok(false),
                Err(e) => Err(classify_sdk_error("head_bucket", &bucket, e)),
            }
        })
    }

    fn versioning(&self, bucket: &str) -> CloudFuture<'_, VersioningStatus> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!("AWS get_bucket_versioning: bucket={}", bucket);
            let resp = self
                .s3
                .get_bucket_versioning()
                .bucket(&bucket)
                .send()
                .await
                .map_err(|e| classify_sdk_error("get_bucket_versioning", &bucket, e))?;

            Ok(match resp.status() {
                Some(BucketVersioningStatus::Enabled) => VersioningStatus::Enabled,
                Some(BucketVersioningStatus::Suspended) => VersioningStatus::Suspended,
                _ => VersioningStatus::Unversioned,
            })
        })
    }

    fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<&str>,
    ) -> CloudFuture<'_, ObjectPage> {
        let bucket = bucket.to_string();
        let prefix = prefix.map(str::to_string);
        let token = token.map(str::to_string);
        Box::pin(async move {
            debug!("AWS list_objects_v2: bucket={} prefix={:?}", bucket, prefix);
            let resp = self
                .s3
                .list_objects_v2()
                .bucket(&bucket)
                .set_prefix(prefix)
                .set_continuation_token(token)
                .send()
                .await
                .map_err(|e| classify_sdk_error("list_objects_v2", &bucket, e))?;

            let keys = resp
                .contents()
                .iter()
                .filter_map(|obj| obj.key().map(str::to_string))
                .collect();
            let next_token = if resp.is_truncated() == Some(true) {
                resp.next_continuation_token().map(str::to_string)
            } else {
                None
            };
            Ok(ObjectPage { keys, next_token })
        })
    }

    fn list_versions(
        &self,
        bucket: &str,
        cursor: Option<&VersionCursor>,
    ) -> CloudFuture<'_, VersionPage> {
        let bucket = bucket.to_string();
        let cursor = cursor.cloned().unwrap_or_default();
        Box::pin(async move {
            debug!("AWS list_object_versions: bucket={} cursor={:?}", bucket, cursor);
            let resp = self
                .s3
                .list_object_versions()
                .bucket(&bucket)
                .set_key_marker(cursor.key_marker)
                .set_version_id_marker(cursor.version_id_marker)
                .send()
                .await
                .map_err(|e| classify_sdk_error("list_object_versions", &bucket, e))?;

            let mut entries = Vec::new();
            for v in resp.versions() {
                if let Some(key) = v.key() {
                    entries.push(ObjectVersionRef {
                        key: key.to_string(),
                        version_id: v.version_id().unwrap_or("null").to_string(),
                        is_delete_marker: false,
                    });
                }
            }
            for m in resp.delete_markers() {
                if let Some(key) = m.key() {
                    entries.push(ObjectVersionRef {
                        key: key.to_string(),
                        version_id: m.version_id().unwrap_or("null").to_string(),
                        is_delete_marker: true,
                    });
                }
            }

            let next = if resp.is_truncated() == Some(true) {
                Some(VersionCursor {
                    key_marker: resp.next_key_marker().map(str::to_string),
                    version_id_marker: resp.next_version_id_marker().map(str::to_string),
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
            if targets.is_empty() {
                return Ok(DeleteOutcome::default());
            }
            debug!(
                "AWS delete_objects: bucket={} count={}",
                bucket,
                targets.len()
            );

            let build_err = |e: aws_sdk_s3::error::BuildError| OpsError::Provider {
                operation: "delete_objects".to_string(),
                code: None,
                message: e.to_string(),
            };

            let objects = targets
                .iter()
                .map(|t| {
                    ObjectIdentifier::builder()
                        .key(&t.key)
                        .set_version_id(t.version_id.clone())
                        .build()
                        .map_err(build_err)
                })
                .collect::<Result<Vec<_>, _>>()?;

            // Quiet mode: the response only lists keys that failed.
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(build_err)?;

            let resp = self
                .s3
                .delete_objects()
                .bucket(&bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| classify_sdk_error("delete_objects", &bucket, e))?;

            let failed: Vec<DeleteFailure> = resp
                .errors()
                .iter()
                .map(|e| DeleteFailure {
                    key: e.key().unwrap_or_default().to_string(),
                    version_id: e.version_id().map(str::to_string),
                    code: e.code().unwrap_or("Unknown").to_string(),
                    message: e.message().unwrap_or_default().to_string(),
                })
                .collect();

            Ok(DeleteOutcome {
                deleted: targets.len().saturating_sub(failed.len()),
                failed,
            })
        })
    }
}

impl Catalog for AwsCloud {
    fn database_exists(&self, database: &str) -> CloudFuture<'_, bool> {
        let database = database.to_string();
        Box::pin(async move {
            debug!("Glue get_database: name={}", database);
            let result = self
                .glue
                .get_database()
                .name(&database)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify_sdk_error("get_database", &database, e));
            absent_as_false(result)
        })
    }

    fn table_exists(&self, database: &str, table: &str) -> CloudFuture<'_, bool> {
        let database = database.to_string();
        let table = table.to_string();
        Box::pin(async move {
            debug!("Glue get_table: {}.{}", database, table);
            let result = self
                .glue
                .get_table()
                .database_name(&database)
                .name(&table)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify_sdk_error("get_table", &format!("{database}.{table}"), e));
            absent_as_false(result)
        })
    }

    fn partition_count(&self, database: &str, table: &str) -> CloudFuture<'_, usize> {
        let database = database.to_string();
        let table = table.to_string();
        Box::pin(async move {
            let resource = format!("{database}.{table}");
            let mut count = 0usize;
            let mut next_token: Option<String> = None;
            loop {
                debug!("Glue get_partitions: {} token={:?}", resource, next_token);
                let resp = self
                    .glue
                    .get_partitions()
                    .database_name(&database)
                    .table_name(&table)
                    .set_next_token(next_token.take())
                    .send()
                    .await
                    .map_err(|e| classify_sdk_error("get_partitions", &resource, e))?;

                count += resp.partitions().len();
                match resp.next_token() {
                    Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                    _ => break,
                }
            }
            Ok(count)
        })
    }

    fn job_exists(&self, job: &str) -> CloudFuture<'_, bool> {
        let job = job.to_string();
        Box::pin(async move {
            debug!("Glue get_job: name={}", job);
            let result = self
                .glue
                .get_job()
                .job_name(&job)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify_sdk_error("get_job", &job, e));
            absent_as_false(result)
        })
    }
}

impl QueryService for AwsCloud {
    fn workgroup_exists(&self, workgroup: &str) -> CloudFuture<'_, bool> {
        let workgroup = workgroup.to_string();
        Box::pin(async move {
            debug!("Athena get_work_group: name={}", workgroup);
            let result = self
                .athena
                .get_work_group()
                .work_group(&workgroup)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify_sdk_error("get_work_group", &workgroup, e));
            absent_as_false(result)
        })
    }

    fn start_query(&self, sql: &str, database: &str, workgroup: &str) -> CloudFuture<'_, String> {
        let sql = sql.to_string();
        let database = database.to_string();
        let workgroup = workgroup.to_string();
        Box::pin(async move {
            debug!("Athena start_query_execution: workgroup={} sql={}", workgroup, sql);
            let resp = self
                .athena
                .start_query_execution()
                .query_string(&sql)
                .query_execution_context(QueryExecutionContext::builder().database(&database).build())
                .work_group(&workgroup)
                .send()
                .await
                .map_err(|e| classify_sdk_error("start_query_execution", &workgroup, e))?;

            resp.query_execution_id()
                .map(str::to_string)
                .ok_or_else(|| OpsError::Provider {
                    operation: "start_query_execution".to_string(),
                    code: None,
                    message: "Athena did not return a query execution id".to_string(),
                })
        })
    }

    fn query_state(&self, execution_id: &str) -> CloudFuture<'_, QueryState> {
        let execution_id = execution_id.to_string();
        Box::pin(async move {
            let resp = self
                .athena
                .get_query_execution()
                .query_execution_id(&execution_id)
                .send()
                .await
                .map_err(|e| classify_sdk_error("get_query_execution", &execution_id, e))?;

            let status = resp.query_execution().and_then(|q| q.status());
            Ok(map_query_state(
                status.and_then(|s| s.state()),
                status.and_then(|s| s.state_change_reason()),
            ))
        })
    }
}

impl StackTool for AwsCloud {
    fn deploy(&self, stack_name: &str) -> CloudFuture<'_, ()> {
        let stack_name = stack_name.to_string();
        Box::pin(async move { self.run_cdk("deploy", &stack_name).await })
    }

    fn destroy(&self, stack_name: &str) -> CloudFuture<'_, ()> {
        let stack_name = stack_name.to_string();
        Box::pin(async move { self.run_cdk("destroy", &stack_name).await })
    }

    fn stack_exists(&self, stack_name: &str) -> CloudFuture<'_, bool> {
        let stack_name = stack_name.to_string();
        Box::pin(async move {
            debug!("CloudFormation describe_stacks: name={}", stack_name);
            match self
                .cloudformation
                .describe_stacks()
                .stack_name(&stack_name)
                .send()
                .await
            {
                Ok(resp) => Ok(stack_status_is_live(
                    resp.stacks().first().and_then(|s| s.stack_status()),
                )),
                // CloudFormation reports a missing stack as a ValidationError.
                Err(e)
                    if e.code() == Some("ValidationError")
                        && e.message().is_some_and(|m| m.contains("does not exist")) =>
                {
                    Ok(false)
                }
                Err(e) => Err(classify_sdk_error("describe_stacks", &stack_name, e)),
            }
        })
    }
}

impl Identity for AwsCloud {
    fn account_id(&self) -> CloudFuture<'_, String> {
        Box::pin(async move {
            let resp = self
                .sts
                .get_caller_identity()
                .send()
                .await
                .map_err(|e| classify_sdk_error("get_caller_identity", "caller", e))?;

            resp.account()
                .map(str::to_string)
                .ok_or_else(|| OpsError::Provider {
                    operation: "get_caller_identity".to_string(),
                    code: None,
                    message: "STS did not return an account id".to_string(),
                })
        })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cdk_args_deploy_skips_approval() {
        assert_eq!(
            cdk_args("deploy", "MobiltexDataLakeStack"),
            vec!["deploy", "MobiltexDataLakeStack", "--require-approval", "never"]
        );
    }

    #[test]
    fn test_cdk_args_destroy_is_forced() {
        assert_eq!(
            cdk_args("destroy", "MobiltexDataLakeStack"),
            vec!["destroy", "MobiltexDataLakeStack", "--force"]
        );
    }

    #[test]
    fn test_map_query_state() {
        assert_eq!(map_query_state(None, None), QueryState::Queued);
        assert_eq!(
            map_query_state(Some(&QueryExecutionState::Running), None),
            QueryState::Running
        );
        assert_eq!(
            map_query_state(Some(&QueryExecutionState::Succeeded), None),
            QueryState::Succeeded
        );
        assert_eq!(
            map_query_state(Some(&QueryExecutionState::Failed), Some("FAILED: no such table")),
            QueryState::Failed("FAILED: no such table".to_string())
        );
    }

    #[test]
    fn test_deleted_stack_is_not_live() {
        assert!(!stack_status_is_live(Some(&StackStatus::DeleteComplete)));
        assert!(stack_status_is_live(Some(&StackStatus::CreateComplete)));
        assert!(stack_status_is_live(Some(&StackStatus::DeleteFailed)));
    }

    #[test]
    fn test_absent_as_false() {
        assert!(absent_as_false(Ok(())).unwrap());
        assert!(!absent_as_false(Err(OpsError::absent("table", "db.t"))).unwrap());
        assert!(absent_as_false(Err(OpsError::Config("x".into()))).is_err());
    }
}
