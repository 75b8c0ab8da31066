//! Deployment verifier.
//!
//! Runs six ordered stages against a deployed stack and collects one
//! [`CheckOutcome`] per probed resource:
//!
//! 1. the raw, curated and query-results buckets exist
//! 2. the catalog database and the raw-to-curated ETL job exist
//! 3. each curated table exists
//! 4. the curated zone holds enough Parquet files (warning only)
//! 5. the query workgroup exists
//! 6. the partitioned table has partitions, repairing them once if not
//!    (warning only)
//!
//! Every stage runs even when an earlier one failed.  The run succeeds when
//! no check failed.  Transient provider errors are retried per
//! [`VerifyOptions::retry`] before a check is recorded.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use std::fmt;
use std::fmt::Write as _;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cloud::backend::QueryState;
use crate::cloud::CloudClients;
use crate::config::VerifyConfig;
use crate::errors::OpsError;
use crate::metrics::{PARTITIONS_OBSERVED, PARTITION_REPAIRS_TOTAL, VERIFY_CHECKS_TOTAL};
use crate::naming::{BucketPurpose, DeployContext, CURATED_DATA_PREFIX, PARTITIONED_TABLE, TABLES};
use crate::retry::RetryPolicy;

// -- Report types -------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Buckets,
    Database,
    Tables,
    DataFiles,
    Workgroup,
    Partitions,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Buckets,
        Stage::Database,
        Stage::Tables,
        Stage::DataFiles,
        Stage::Workgroup,
        Stage::Partitions,
    ];

    /// 1-based position in the run.
    pub fn number(self) -> usize {
        Stage::ALL.iter().position(|s| *s == self).map_or(0, |i| i + 1)
    }

    /// Stages whose problems are reported as warnings, never failures.
    pub fn is_advisory(self) -> bool {
        matches!(self, Stage::DataFiles | Stage::Partitions)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Buckets => "storage buckets",
            Stage::Database => "catalog database and ETL job",
            Stage::Tables => "catalog tables",
            Stage::DataFiles => "curated data files",
            Stage::Workgroup => "query workgroup",
            Stage::Partitions => "partition health",
        };
        f.write_str(label)
    }
}

/// One probed resource.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub stage: Stage,
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

/// Aggregate outcome of one verifier run.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub generated_at: DateTime<Utc>,
    pub account_id: String,
    pub region: String,
    pub checks: Vec<CheckOutcome>,
    pub repair_attempted: bool,
}

impl VerificationReport {
    /// No check failed.  Warnings do not count against the run.
    pub fn is_success(&self) -> bool {
        self.checks.iter().all(|c| c.status != CheckStatus::Fail)
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    pub fn stage(&self, stage: Stage) -> impl Iterator<Item = &CheckOutcome> {
        self.checks.iter().filter(move |c| c.stage == stage)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Deployment verification for account {} ({}) at {}",
            self.account_id,
            self.region,
            self.generated_at.to_rfc3339()
        );
        for stage in Stage::ALL {
            let _ = writeln!(out, "[{}/{}] {}", stage.number(), Stage::ALL.len(), stage);
            for check in self.stage(stage) {
                let _ = writeln!(
                    out,
                    "  {:<4}  {}: {}",
                    check.status.as_str(),
                    check.name,
                    check.detail
                );
            }
        }
        let _ = writeln!(
            out,
            "Summary: {} passed, {} warnings, {} failed -> {}",
            self.count(CheckStatus::Pass),
            self.count(CheckStatus::Warn),
            self.count(CheckStatus::Fail),
            if self.is_success() { "OK" } else { "FAILED" }
        );
        out
    }
}

// -- Options ------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    pub min_data_files: usize,
    pub repair_poll_interval: Duration,
    pub repair_max_wait: Duration,
    pub retry: RetryPolicy,
}

impl From<&VerifyConfig> for VerifyOptions {
    fn from(config: &VerifyConfig) -> Self {
        Self {
            min_data_files: config.min_data_files,
            repair_poll_interval: config.repair_poll_interval(),
            repair_max_wait: config.repair_max_wait(),
            retry: RetryPolicy::from(config),
        }
    }
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self::from(&VerifyConfig::default())
    }
}

// -- Verifier -----------------------------------------------------------------

/// Run every stage against the deployment described by `ctx`.
pub async fn verify(
    clients: &CloudClients,
    ctx: &DeployContext,
    opts: &VerifyOptions,
) -> VerificationReport {
    let mut run = Run {
        clients,
        ctx,
        opts,
        checks: Vec::new(),
        repair_attempted: false,
    };

    info!(account = ctx.account_id(), "Verifying deployment");
    run.check_buckets().await;
    run.check_database().await;
    run.check_tables().await;
    run.check_data_files().await;
    run.check_workgroup().await;
    run.check_partitions().await;

    let report = VerificationReport {
        generated_at: Utc::now(),
        account_id: ctx.account_id().to_string(),
        region: ctx.region.clone(),
        checks: run.checks,
        repair_attempted: run.repair_attempted,
    };
    info!(
        passed = report.count(CheckStatus::Pass),
        warnings = report.count(CheckStatus::Warn),
        failed = report.count(CheckStatus::Fail),
        "Verification finished"
    );
    report
}

struct Run<'a> {
    clients: &'a CloudClients,
    ctx: &'a DeployContext,
    opts: &'a VerifyOptions,
    checks: Vec<CheckOutcome>,
    repair_attempted: bool,
}

impl Run<'_> {
    fn record(&mut self, stage: Stage, name: String, status: CheckStatus, detail: String) {
        let status = if stage.is_advisory() && status == CheckStatus::Fail {
            CheckStatus::Warn
        } else {
            status
        };
        match status {
            CheckStatus::Pass => debug!(%stage, %name, %detail, "Check passed"),
            CheckStatus::Warn => warn!(%stage, %name, %detail, "Check warning"),
            CheckStatus::Fail => warn!(%stage, %name, %detail, "Check failed"),
        }
        counter!(
            VERIFY_CHECKS_TOTAL,
            "stage" => format!("{stage:?}").to_lowercase(),
            "status" => status.as_str().to_lowercase()
        )
        .increment(1);
        self.checks.push(CheckOutcome {
            stage,
            name,
            status,
            detail,
        });
    }

    /// Record an existence probe.
    fn record_exists(&mut self, stage: Stage, name: String, probe: Result<bool, OpsError>) {
        let (status, detail) = match probe {
            Ok(true) => (CheckStatus::Pass, "exists".to_string()),
            Ok(false) => (CheckStatus::Fail, "not found".to_string()),
            Err(e) if e.is_absent() => (CheckStatus::Fail, "not found".to_string()),
            Err(e) => (CheckStatus::Fail, e.to_string()),
        };
        self.record(stage, name, status, detail);
    }

    async fn check_buckets(&mut self) {
        let (clients, retry) = (self.clients, self.opts.retry);
        for (_, bucket) in self.ctx.names.buckets() {
            let probe = retry
                .run("head_bucket", || clients.objects.bucket_exists(&bucket))
                .await;
            self.record_exists(Stage::Buckets, format!("bucket {bucket}"), probe);
        }
    }

    async fn check_database(&mut self) {
        let (ctx, clients, retry) = (self.ctx, self.clients, self.opts.retry);
        let db = &ctx.names.database;
        let probe = retry
            .run("get_database", || clients.catalog.database_exists(db))
            .await;
        self.record_exists(Stage::Database, format!("database {db}"), probe);

        let job = &ctx.names.etl_job;
        let probe = retry
            .run("get_job", || clients.catalog.job_exists(job))
            .await;
        self.record_exists(Stage::Database, format!("job {job}"), probe);
    }

    async fn check_tables(&mut self) {
        let (ctx, clients, retry) = (self.ctx, self.clients, self.opts.retry);
        let db = &ctx.names.database;
        for table in TABLES {
            let probe = retry
                .run("get_table", || clients.catalog.table_exists(db, table))
                .await;
            self.record_exists(Stage::Tables, format!("table {db}.{table}"), probe);
        }
    }

    async fn check_data_files(&mut self) {
        let curated = self.ctx.names.bucket(BucketPurpose::Curated);
        let name = format!("data files s3://{curated}/{CURATED_DATA_PREFIX}");
        let (status, detail) = match self.count_data_files(&curated).await {
            Ok(n) if n >= self.opts.min_data_files => {
                (CheckStatus::Pass, format!("{n} Parquet files"))
            }
            Ok(n) => (
                CheckStatus::Warn,
                format!(
                    "{n} Parquet files, expected at least {}; sample data may not be loaded",
                    self.opts.min_data_files
                ),
            ),
            Err(e) if e.is_absent() => {
                (CheckStatus::Warn, "curated bucket not found".to_string())
            }
            Err(e) => (CheckStatus::Warn, e.to_string()),
        };
        self.record(Stage::DataFiles, name, status, detail);
    }

    async fn count_data_files(&self, bucket: &str) -> Result<usize, OpsError> {
        let mut count = 0;
        let mut token: Option<String> = None;
        loop {
            let page = self
                .opts
                .retry
                .run("list_objects_v2", || {
                    self.clients
                        .objects
                        .list_objects(bucket, Some(CURATED_DATA_PREFIX), token.as_deref())
                })
                .await?;
            count += page.keys.iter().filter(|k| k.ends_with(".parquet")).count();
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(count),
            }
        }
    }

    async fn check_workgroup(&mut self) {
        let (ctx, clients, retry) = (self.ctx, self.clients, self.opts.retry);
        let wg = &ctx.names.workgroup;
        let probe = retry
            .run("get_work_group", || clients.queries.workgroup_exists(wg))
            .await;
        self.record_exists(Stage::Workgroup, format!("workgroup {wg}"), probe);
    }

    async fn partition_count(&self, db: &str) -> Result<usize, OpsError> {
        self.opts
            .retry
            .run("get_partitions", || {
                self.clients.catalog.partition_count(db, PARTITIONED_TABLE)
            })
            .await
    }

    async fn check_partitions(&mut self) {
        let db = self.ctx.names.database.clone();
        let name = format!("partitions {db}.{PARTITIONED_TABLE}");

        let before = match self.partition_count(&db).await {
            Ok(n) => n,
            Err(e) => {
                self.record(Stage::Partitions, name, CheckStatus::Warn, e.to_string());
                return;
            }
        };
        if before > 0 {
            gauge!(PARTITIONS_OBSERVED).set(before as f64);
            self.record(
                Stage::Partitions,
                name,
                CheckStatus::Pass,
                format!("{before} partitions"),
            );
            return;
        }
        if self.repair_attempted {
            self.record(
                Stage::Partitions,
                name,
                CheckStatus::Warn,
                "no partitions; repair already attempted in this run".to_string(),
            );
            return;
        }

        let repair = self.repair_partitions(&db).await;
        let (status, detail) = match self.partition_count(&db).await {
            Ok(n) if n > 0 => {
                gauge!(PARTITIONS_OBSERVED).set(n as f64);
                (CheckStatus::Pass, format!("{n} partitions after repair"))
            }
            Ok(_) => {
                gauge!(PARTITIONS_OBSERVED).set(0.0);
                (CheckStatus::Warn, format!("no partitions after repair ({repair})"))
            }
            Err(e) => (CheckStatus::Warn, format!("{e} ({repair})")),
        };
        self.record(Stage::Partitions, name, status, detail);
    }

    /// Start one partition-discovery query and poll it until it finishes or
    /// the wait budget runs out.
    async fn repair_partitions(&mut self, db: &str) -> RepairOutcome {
        self.repair_attempted = true;
        let sql = format!("MSCK REPAIR TABLE {db}.{PARTITIONED_TABLE}");
        info!(%sql, "No partitions registered, starting repair");

        let (ctx, clients, retry) = (self.ctx, self.clients, self.opts.retry);
        let wg = &ctx.names.workgroup;
        let execution_id = match retry
            .run("start_query_execution", || clients.queries.start_query(&sql, db, wg))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                counter!(PARTITION_REPAIRS_TOTAL, "outcome" => "not_started").increment(1);
                return RepairOutcome::NotStarted(e.to_string());
            }
        };

        let outcome = poll_query(clients, &execution_id, self.opts).await;
        counter!(PARTITION_REPAIRS_TOTAL, "outcome" => outcome.metric_label()).increment(1);
        outcome
    }
}

/// Final disposition of a repair query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    NotStarted(String),
    Finished(QueryState),
    TimedOut,
    PollFailed(String),
}

impl RepairOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            RepairOutcome::NotStarted(_) => "not_started",
            RepairOutcome::Finished(QueryState::Succeeded) => "succeeded",
            RepairOutcome::Finished(_) => "failed",
            RepairOutcome::TimedOut => "timed_out",
            RepairOutcome::PollFailed(_) => "poll_failed",
        }
    }
}

impl fmt::Display for RepairOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairOutcome::NotStarted(e) => write!(f, "repair query not started: {e}"),
            RepairOutcome::Finished(QueryState::Succeeded) => f.write_str("repair query succeeded"),
            RepairOutcome::Finished(QueryState::Failed(reason)) => {
                write!(f, "repair query failed: {reason}")
            }
            RepairOutcome::Finished(state) => write!(f, "repair query ended {state:?}"),
            RepairOutcome::TimedOut => f.write_str("repair query did not finish in time"),
            RepairOutcome::PollFailed(e) => write!(f, "repair query status unavailable: {e}"),
        }
    }
}

/// Poll every `repair_poll_interval` until the query is terminal or
/// `repair_max_wait` elapsed.
async fn poll_query(
    clients: &CloudClients,
    execution_id: &str,
    opts: &VerifyOptions,
) -> RepairOutcome {
    let started = Instant::now();
    loop {
        let state = opts
            .retry
            .run("get_query_execution", || clients.queries.query_state(execution_id))
            .await;
        match state {
            Ok(state) if state.is_terminal() => {
                debug!(execution_id, ?state, "Repair query finished");
                return RepairOutcome::Finished(state);
            }
            Ok(state) => debug!(execution_id, ?state, "Repair query still running"),
            Err(e) => return RepairOutcome::PollFailed(e.to_string()),
        }
        if started.elapsed() >= opts.repair_max_wait {
            return RepairOutcome::TimedOut;
        }
        tokio::time::sleep(opts.repair_poll_interval).await;
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

    fn fast() -> VerifyOptions {
        VerifyOptions {
            min_data_files: 3,
            repair_poll_interval: Duration::ZERO,
            repair_max_wait: Duration::from_secs(5),
            retry: RetryPolicy::new(3, Duration::ZERO),
        }
    }

    async fn deployed(ctx: &DeployContext) -> Arc<MemoryCloud> {
        let cloud = Arc::new(MemoryCloud::new(ACCOUNT));
        cloud.register_stack(StackTemplate::for_names(&ctx.names)).await;
        cloud.deploy(&ctx.names.stack_name).await.unwrap();
        cloud
    }

    fn statuses(report: &VerificationReport, stage: Stage) -> Vec<CheckStatus> {
        report.stage(stage).map(|c| c.status).collect()
    }

    #[tokio::test]
    async fn test_unloaded_deployment_warns_on_data() {
        let ctx = ctx();
        let cloud = deployed(&ctx).await;
        let clients = CloudClients::from_provider(cloud.clone());

        let report = verify(&clients, &ctx, &fast()).await;
        assert!(report.is_success());
        assert_eq!(statuses(&report, Stage::Buckets), vec![CheckStatus::Pass; 3]);
        assert_eq!(statuses(&report, Stage::Database), vec![CheckStatus::Pass; 2]);
        assert_eq!(statuses(&report, Stage::Tables), vec![CheckStatus::Pass; 3]);
        assert_eq!(statuses(&report, Stage::DataFiles), vec![CheckStatus::Warn]);
        assert_eq!(statuses(&report, Stage::Workgroup), vec![CheckStatus::Pass]);
        assert_eq!(statuses(&report, Stage::Partitions), vec![CheckStatus::Warn]);
        assert_eq!(report.checks.len(), 11);
    }

    #[tokio::test]
    async fn test_loaded_deployment_passes_every_stage() {
        let ctx = ctx();
        let cloud = deployed(&ctx).await;
        cloud.load_sample_data(&ctx.names).await.unwrap();
        cloud.set_partitions(&ctx.names.database, "readings", 2).await;
        let clients = CloudClients::from_provider(cloud.clone());

        let report = verify(&clients, &ctx, &fast()).await;
        assert!(report.is_success());
        assert_eq!(report.count(CheckStatus::Pass), report.checks.len());
        assert!(!report.repair_attempted);
        assert_eq!(cloud.query_count().await, 0);
    }

    #[tokio::test]
    async fn test_partitions_self_heal() {
        let ctx = ctx();
        let cloud = deployed(&ctx).await;
        cloud.load_sample_data(&ctx.names).await.unwrap();
        cloud.set_query_latency(2).await;
        let clients = CloudClients::from_provider(cloud.clone());

        let report = verify(&clients, &ctx, &fast()).await;
        let partitions: Vec<_> = report.stage(Stage::Partitions).collect();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].status, CheckStatus::Pass);
        assert!(partitions[0].detail.contains("2 partitions after repair"));
        assert!(report.repair_attempted);
        assert_eq!(cloud.query_count().await, 1);
    }

    #[tokio::test]
    async fn test_repair_timeout_is_a_warning() {
        let ctx = ctx();
        let cloud = deployed(&ctx).await;
        cloud.load_sample_data(&ctx.names).await.unwrap();
        cloud.set_query_latency(1000).await;
        let clients = CloudClients::from_provider(cloud.clone());

        let opts = VerifyOptions {
            repair_max_wait: Duration::ZERO,
            ..fast()
        };
        let report = verify(&clients, &ctx, &opts).await;
        let check = report.stage(Stage::Partitions).next().unwrap();
        assert_eq!(check.status, CheckStatus::Warn);
        assert!(check.detail.contains("did not finish"));
        assert!(report.is_success());
        assert_eq!(cloud.query_count().await, 1);
    }

    #[tokio::test]
    async fn test_missing_stack_fails_structural_stages() {
        let ctx = ctx();
        let cloud = Arc::new(MemoryCloud::new(ACCOUNT));
        let clients = CloudClients::from_provider(cloud.clone());

        let report = verify(&clients, &ctx, &fast()).await;
        assert!(!report.is_success());
        assert_eq!(statuses(&report, Stage::Buckets), vec![CheckStatus::Fail; 3]);
        assert_eq!(statuses(&report, Stage::Database), vec![CheckStatus::Fail; 2]);
        assert_eq!(statuses(&report, Stage::Tables), vec![CheckStatus::Fail; 3]);
        assert_eq!(statuses(&report, Stage::DataFiles), vec![CheckStatus::Warn]);
        assert_eq!(statuses(&report, Stage::Workgroup), vec![CheckStatus::Fail]);
        assert_eq!(statuses(&report, Stage::Partitions), vec![CheckStatus::Warn]);
        assert_eq!(cloud.query_count().await, 0);
    }

    #[tokio::test]
    async fn test_throttled_bucket_check_is_retried() {
        let ctx = ctx();
        let cloud = deployed(&ctx).await;
        cloud.load_sample_data(&ctx.names).await.unwrap();
        cloud.fail_next_calls(1).await;
        let clients = CloudClients::from_provider(cloud.clone());

        let report = verify(&clients, &ctx, &fast()).await;
        assert_eq!(statuses(&report, Stage::Buckets), vec![CheckStatus::Pass; 3]);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_persistent_throttling_fails_the_check() {
        let ctx = ctx();
        let cloud = deployed(&ctx).await;
        cloud.fail_next_calls(5).await;
        let clients = CloudClients::from_provider(cloud.clone());

        let report = verify(&clients, &ctx, &fast()).await;
        let buckets: Vec<_> = report.stage(Stage::Buckets).collect();
        assert_eq!(buckets[0].status, CheckStatus::Fail);
        assert!(buckets[0].detail.contains("transient"));
        assert!(buckets[0].detail.contains("head_bucket"));
        assert_eq!(buckets[1].status, CheckStatus::Pass);
        assert_eq!(buckets[2].status, CheckStatus::Pass);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_denied_data_listing_is_a_warning() {
        let ctx = ctx();
        let cloud = deployed(&ctx).await;
        cloud.load_sample_data(&ctx.names).await.unwrap();
        cloud.set_partitions(&ctx.names.database, "readings", 2).await;
        cloud.deny_list(&ctx.names.bucket(BucketPurpose::Curated)).await;
        let clients = CloudClients::from_provider(cloud.clone());

        let report = verify(&clients, &ctx, &fast()).await;
        let check = report.stage(Stage::DataFiles).next().unwrap();
        assert_eq!(check.status, CheckStatus::Warn);
        assert!(check.detail.contains("access denied"));
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_missing_etl_job_fails() {
        let ctx = ctx();
        let cloud = Arc::new(MemoryCloud::new(ACCOUNT));
        let mut template = StackTemplate::for_names(&ctx.names);
        template.etl_job = "some-other-job".to_string();
        cloud.register_stack(template).await;
        cloud.deploy(&ctx.names.stack_name).await.unwrap();
        let clients = CloudClients::from_provider(cloud.clone());

        let report = verify(&clients, &ctx, &fast()).await;
        let db: Vec<_> = report.stage(Stage::Database).collect();
        assert_eq!(db[0].status, CheckStatus::Pass);
        assert_eq!(db[1].name, "job mobiltex-raw-to-curated");
        assert_eq!(db[1].status, CheckStatus::Fail);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_report_renders_text_and_json() {
        let ctx = ctx();
        let cloud = deployed(&ctx).await;
        let clients = CloudClients::from_provider(cloud);

        let report = verify(&clients, &ctx, &fast()).await;
        let text = report.render_text();
        assert!(text.contains("[1/6] storage buckets"));
        assert!(text.contains("PASS  bucket mobiltex-datalake-raw-123456789012: exists"));
        assert!(text.contains("-> OK"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["account_id"], "123456789012");
        assert_eq!(json["checks"][0]["stage"], "buckets");
        assert_eq!(json["checks"][0]["status"], "pass");
    }

    #[test]
    fn test_stage_numbers() {
        assert_eq!(Stage::Buckets.number(), 1);
        assert_eq!(Stage::Partitions.number(), 6);
        assert!(Stage::DataFiles.is_advisory());
        assert!(!Stage::Workgroup.is_advisory());
    }
}
