//! Configuration loading and types for datalake-ops.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Every section has defaults matching the deployed
//! `MobiltexDataLakeStack`, so a missing file is not an error.

use garde::Validate;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// AWS client settings.
    #[serde(default)]
    pub aws: AwsConfig,

    /// Resource naming scheme.
    #[serde(default)]
    pub naming: NamingConfig,

    /// Infrastructure-as-code tool settings.
    #[serde(default)]
    pub stack: StackConfig,

    /// Bucket drain tuning.
    #[serde(default)]
    pub drain: DrainConfig,

    /// Deployment verifier tuning.
    #[serde(default)]
    pub verify: VerifyConfig,

    /// Destroy orchestrator tuning.
    #[serde(default)]
    pub destroy: DestroyConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// AWS client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint (e.g. LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Named profile from `~/.aws/config`.
    #[serde(default)]
    pub profile: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            profile: None,
        }
    }
}

/// Resource naming scheme.
///
/// Buckets are named `{prefix}-{purpose}-{account_id}`; the database,
/// workgroup and stack use fixed literal names.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NamingConfig {
    /// Bucket name prefix.
    #[serde(default = "default_prefix")]
    #[garde(length(min = 1, max = 20), pattern(r"^[a-z0-9][a-z0-9\-]*$"))]
    pub prefix: String,

    /// Glue catalog database.
    #[serde(default = "default_database")]
    #[garde(length(min = 1, max = 255), pattern(r"^[a-z0-9_]+$"))]
    pub database: String,

    /// Athena workgroup.
    #[serde(default = "default_workgroup")]
    #[garde(length(min = 1, max = 128), pattern(r"^[a-zA-Z0-9._\-]+$"))]
    pub workgroup: String,

    /// Glue ETL job that converts raw CSV into curated Parquet.
    #[serde(default = "default_etl_job")]
    #[garde(length(min = 1, max = 255), pattern(r"^[a-zA-Z0-9._\-]+$"))]
    pub etl_job: String,

    /// CloudFormation stack name of the CDK app.
    #[serde(default = "default_stack_name")]
    #[garde(length(min = 1, max = 128), pattern(r"^[a-zA-Z][a-zA-Z0-9\-]*$"))]
    pub stack_name: String,

    /// Fixed account id; resolved through STS when absent.
    #[serde(default)]
    #[garde(pattern(r"^[0-9]{12}$"))]
    pub account_id: Option<String>,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            database: default_database(),
            workgroup: default_workgroup(),
            etl_job: default_etl_job(),
            stack_name: default_stack_name(),
            account_id: None,
        }
    }
}

/// CDK CLI settings used for deploy and destroy.
#[derive(Debug, Clone, Deserialize)]
pub struct StackConfig {
    /// Directory containing `cdk.json`.
    #[serde(default = "default_app_dir")]
    pub app_dir: String,

    /// CDK executable.
    #[serde(default = "default_cdk_bin")]
    pub cdk_bin: String,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            app_dir: default_app_dir(),
            cdk_bin: default_cdk_bin(),
        }
    }
}

/// Bucket drain settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DrainConfig {
    /// Attempts per list/delete call before giving up on transient errors.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Identifiers per `DeleteObjects` call (S3 caps this at 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            batch_size: default_batch_size(),
        }
    }
}

/// Deployment verifier settings.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyConfig {
    /// Data files expected under the curated prefix (one per table).
    #[serde(default = "default_min_data_files")]
    pub min_data_files: usize,

    /// Poll interval for the partition repair query, in seconds.
    #[serde(default = "default_repair_poll_interval")]
    pub repair_poll_interval_secs: u64,

    /// Maximum time to wait for the repair query, in seconds.
    #[serde(default = "default_repair_max_wait")]
    pub repair_max_wait_secs: u64,

    /// Attempts per provider call before a transient error is reported.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            min_data_files: default_min_data_files(),
            repair_poll_interval_secs: default_repair_poll_interval(),
            repair_max_wait_secs: default_repair_max_wait(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl VerifyConfig {
    pub fn repair_poll_interval(&self) -> Duration {
        Duration::from_secs(self.repair_poll_interval_secs)
    }

    pub fn repair_max_wait(&self) -> Duration {
        Duration::from_secs(self.repair_max_wait_secs)
    }
}

/// Destroy orchestrator settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DestroyConfig {
    /// Poll interval while waiting for buckets to disappear, in seconds.
    #[serde(default = "default_absence_poll_interval")]
    pub absence_poll_interval_secs: u64,

    /// Maximum time to wait for buckets to disappear, in seconds.
    #[serde(default = "default_absence_max_wait")]
    pub absence_max_wait_secs: u64,
}

impl Default for DestroyConfig {
    fn default() -> Self {
        Self {
            absence_poll_interval_secs: default_absence_poll_interval(),
            absence_max_wait_secs: default_absence_max_wait(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_prefix() -> String {
    "mobiltex".to_string()
}

fn default_database() -> String {
    "mobiltex_datalake".to_string()
}

fn default_workgroup() -> String {
    "mobiltex-analytics".to_string()
}

fn default_etl_job() -> String {
    "mobiltex-raw-to-curated".to_string()
}

fn default_stack_name() -> String {
    "MobiltexDataLakeStack".to_string()
}

fn default_app_dir() -> String {
    ".".to_string()
}

fn default_cdk_bin() -> String {
    "cdk".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_batch_size() -> usize {
    1000
}

fn default_min_data_files() -> usize {
    3
}

fn default_repair_poll_interval() -> u64 {
    2
}

fn default_repair_max_wait() -> u64 {
    30
}

fn default_absence_poll_interval() -> u64 {
    5
}

fn default_absence_max_wait() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
///
/// A missing file yields the defaults.  The naming section is validated
/// and the batch size is clamped to the S3 limit.  Attempt counts and the
/// absence poll interval are raised to at least 1.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let mut config: Config = if path.exists() {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)?
    } else {
        Config::default()
    };

    config
        .naming
        .validate()
        .map_err(|report| anyhow::anyhow!("invalid naming configuration: {report}"))?;

    if config.drain.max_attempts == 0 {
        config.drain.max_attempts = 1;
    }
    config.drain.batch_size = config.drain.batch_size.clamp(1, 1000);
    config.verify.max_attempts = config.verify.max_attempts.max(1);
    config.destroy.absence_poll_interval_secs = config.destroy.absence_poll_interval_secs.max(1);

    Ok(config)
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config("/nonexistent/datalake-ops.yaml").unwrap();
        assert_eq!(config.naming.prefix, "mobiltex");
        assert_eq!(config.naming.database, "mobiltex_datalake");
        assert_eq!(config.naming.workgroup, "mobiltex-analytics");
        assert_eq!(config.naming.stack_name, "MobiltexDataLakeStack");
        assert_eq!(config.naming.etl_job, "mobiltex-raw-to-curated");
        assert_eq!(config.verify.min_data_files, 3);
        assert_eq!(config.verify.max_attempts, 3);
        assert_eq!(config.drain.batch_size, 1000);
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "aws:\n  region: eu-west-1\nnaming:\n  account_id: \"123456789012\"\nverify:\n  repair_max_wait_secs: 90\n"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.aws.region, "eu-west-1");
        assert_eq!(config.naming.account_id.as_deref(), Some("123456789012"));
        assert_eq!(config.naming.prefix, "mobiltex");
        assert_eq!(config.verify.repair_max_wait(), Duration::from_secs(90));
        assert_eq!(config.verify.repair_poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_account_id_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "naming:\n  account_id: \"12345\"\n").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_invalid_prefix_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "naming:\n  prefix: \"Bad_Prefix\"\n").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_batch_size_clamped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "drain:\n  batch_size: 5000\n  max_attempts: 0\n").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.drain.batch_size, 1000);
        assert_eq!(config.drain.max_attempts, 1);
    }

    #[test]
    fn test_zero_intervals_and_attempts_raised() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "verify:\n  max_attempts: 0\ndestroy:\n  absence_poll_interval_secs: 0\n"
        )
        .unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.verify.max_attempts, 1);
        assert_eq!(config.destroy.absence_poll_interval_secs, 1);
    }
}
