//! Resource naming and the per-run deployment context.
//!
//! Every workflow receives a [`DeployContext`] explicitly instead of
//! reading process-wide state, so tests can run against different
//! simulated accounts in parallel.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::cloud::backend::Identity;
use crate::config::NamingConfig;
use crate::errors::OpsError;

/// Catalog tables the stack creates, in verification order.
pub const TABLES: [&str; 3] = ["assets", "sensors", "readings"];

/// The table partitioned by `year`/`month`.
pub const PARTITIONED_TABLE: &str = "readings";

/// Prefix under which curated Parquet files live.
pub const CURATED_DATA_PREFIX: &str = "parquet/";

/// Role of a managed bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketPurpose {
    Raw,
    Curated,
    QueryResults,
}

impl BucketPurpose {
    pub const ALL: [BucketPurpose; 3] = [
        BucketPurpose::Raw,
        BucketPurpose::Curated,
        BucketPurpose::QueryResults,
    ];

    /// Middle segment of the bucket name.
    pub fn suffix(self) -> &'static str {
        match self {
            BucketPurpose::Raw => "datalake-raw",
            BucketPurpose::Curated => "datalake-curated",
            BucketPurpose::QueryResults => "athena-results",
        }
    }
}

impl fmt::Display for BucketPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BucketPurpose::Raw => "raw",
            BucketPurpose::Curated => "curated",
            BucketPurpose::QueryResults => "query-results",
        };
        f.write_str(label)
    }
}

impl FromStr for BucketPurpose {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(BucketPurpose::Raw),
            "curated" => Ok(BucketPurpose::Curated),
            "results" | "query-results" | "athena-results" => Ok(BucketPurpose::QueryResults),
            other => Err(OpsError::Config(format!("unknown bucket purpose '{other}'"))),
        }
    }
}

/// Concrete names of every resource in one deployment.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceNames {
    pub prefix: String,
    pub account_id: String,
    pub database: String,
    pub workgroup: String,
    pub etl_job: String,
    pub stack_name: String,
}

impl ResourceNames {
    /// Build and validate names for `account_id`.
    pub fn new(naming: &NamingConfig, account_id: &str) -> Result<Self, OpsError> {
        if account_id.len() != 12 || !account_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(OpsError::Config(format!(
                "account id must be 12 digits, got '{account_id}'"
            )));
        }
        let names = Self {
            prefix: naming.prefix.clone(),
            account_id: account_id.to_string(),
            database: naming.database.clone(),
            workgroup: naming.workgroup.clone(),
            etl_job: naming.etl_job.clone(),
            stack_name: naming.stack_name.clone(),
        };
        for (_, bucket) in names.buckets() {
            validate_bucket_name(&bucket)?;
        }
        Ok(names)
    }

    /// `{prefix}-{purpose}-{account_id}`.
    pub fn bucket(&self, purpose: BucketPurpose) -> String {
        format!("{}-{}-{}", self.prefix, purpose.suffix(), self.account_id)
    }

    /// All managed buckets in verification order.
    pub fn buckets(&self) -> Vec<(BucketPurpose, String)> {
        BucketPurpose::ALL
            .iter()
            .map(|p| (*p, self.bucket(*p)))
            .collect()
    }

    /// Resolve a `--bucket` argument: a purpose alias or a literal name.
    pub fn resolve_bucket(&self, arg: &str) -> Result<String, OpsError> {
        match arg.parse::<BucketPurpose>() {
            Ok(purpose) => Ok(self.bucket(purpose)),
            Err(_) => {
                validate_bucket_name(arg)?;
                Ok(arg.to_string())
            }
        }
    }
}

/// Everything a workflow needs to know about the target deployment.
#[derive(Debug, Clone, Serialize)]
pub struct DeployContext {
    pub region: String,
    pub names: ResourceNames,
}

impl DeployContext {
    pub fn new(region: &str, naming: &NamingConfig, account_id: &str) -> Result<Self, OpsError> {
        Ok(Self {
            region: region.to_string(),
            names: ResourceNames::new(naming, account_id)?,
        })
    }

    /// Resolve the account id (override, then config, then the identity
    /// provider) and build the context.
    pub async fn resolve(
        region: &str,
        naming: &NamingConfig,
        account_override: Option<&str>,
        identity: &dyn Identity,
    ) -> Result<Self, OpsError> {
        let account_id = match account_override.or(naming.account_id.as_deref()) {
            Some(id) => id.to_string(),
            None => identity.account_id().await?,
        };
        Self::new(region, naming, &account_id)
    }

    pub fn account_id(&self) -> &str {
        &self.names.account_id
    }
}

// -- Bucket name validation ---------------------------------------------------

/// Validate that a bucket name conforms to S3 naming rules.
///
/// Rules:
/// - 3-63 characters long
/// - Only lowercase letters, numbers, hyphens, and periods
/// - Must begin and end with a letter or number
/// - Cannot be formatted as an IP address (e.g., 192.168.5.4)
/// - Must not start with `xn--` or end with `-s3alias` or `--ol-s3`
pub fn validate_bucket_name(name: &str) -> Result<(), OpsError> {
    let invalid = |reason: &str| OpsError::Config(format!("invalid bucket name '{name}': {reason}"));

    if !(3..=63).contains(&name.len()) {
        return Err(invalid("must be 3-63 characters"));
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '.')
    {
        return Err(invalid("only lowercase letters, digits, '-' and '.' allowed"));
    }

    let edge_ok = |ch: Option<char>| ch.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return Err(invalid("must begin and end with a letter or digit"));
    }
    if looks_like_ip(name) {
        return Err(invalid("must not look like an IP address"));
    }
    if name.starts_with("xn--") || name.ends_with("-s3alias") || name.ends_with("--ol-s3") {
        return Err(invalid("reserved prefix or suffix"));
    }
    Ok(())
}

/// Check whether a string looks like an IPv4 address (e.g., "192.168.5.4").
fn looks_like_ip(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|p| p.parse::<u8>().is_ok())
}

// -- Tests --------------------------------------------------------------------
