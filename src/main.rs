//! datalake-ops -- verification and teardown for the data-lake stack.
//!
//! Reports go to stdout, logs to stderr.  Exit status is non-zero when the
//! verifier records a failure, a teardown is degraded, or a drain leaves
//! objects behind.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use datalake_ops::cloud::aws::AwsCloud;
use datalake_ops::cloud::memory::{MemoryCloud, StackTemplate};
use datalake_ops::cloud::CloudClients;
use datalake_ops::config::{Config, LoggingConfig};
use datalake_ops::destroy::{destroy, DestroyOptions};
use datalake_ops::drain::{drain, DrainOptions};
use datalake_ops::verify::{verify, VerifyOptions};
use datalake_ops::DeployContext;

/// Account used by `--simulate` when none is configured.
const SIMULATED_ACCOUNT: &str = "123456789012";

/// Command-line arguments for datalake-ops.
#[derive(Parser, Debug)]
#[command(
    name = "datalake-ops",
    version,
    about = "Verify and tear down the Mobiltex data-lake stack"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, global = true, default_value = "datalake-ops.yaml")]
    config: PathBuf,

    /// Override the AWS account id instead of asking STS.
    #[arg(long, global = true)]
    account: Option<String>,

    /// Report format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Write Prometheus exposition text here before exiting.
    #[arg(long, global = true)]
    metrics_file: Option<PathBuf>,

    /// Run against an in-process simulation of a deployed, loaded stack.
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that every deployed resource is present and healthy.
    Verify,
    /// Drain all buckets, delete the stack, and confirm the buckets are gone.
    Destroy,
    /// Empty one bucket (objects, versions and delete markers).
    Drain {
        /// Bucket name, or one of: raw, curated, results.
        #[arg(long)]
        bucket: String,
    },
    /// Deploy the stack, then verify it.
    Deploy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = datalake_ops::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config.display());

    datalake_ops::metrics::init_metrics();
    datalake_ops::metrics::describe_metrics();

    let (clients, ctx) = if cli.simulate {
        simulated(&config, cli.account.as_deref()).await?
    } else {
        let aws = AwsCloud::new(&config.aws, &config.stack).await?;
        let clients = CloudClients::from_provider(Arc::new(aws));
        let ctx = DeployContext::resolve(
            &config.aws.region,
            &config.naming,
            cli.account.as_deref(),
            clients.identity.as_ref(),
        )
        .await
        .context("resolving deployment context")?;
        (clients, ctx)
    };
    info!(
        account = ctx.account_id(),
        region = %ctx.region,
        stack = %ctx.names.stack_name,
        "Deployment context resolved"
    );

    let ok = match &cli.command {
        Command::Verify => run_verify(&clients, &ctx, &config, cli.format).await?,
        Command::Deploy => {
            info!(stack = %ctx.names.stack_name, "Deploying stack");
            clients
                .stack
                .deploy(&ctx.names.stack_name)
                .await
                .context("stack deploy failed")?;
            run_verify(&clients, &ctx, &config, cli.format).await?
        }
        Command::Destroy => {
            let opts = DestroyOptions::new(&config.drain, &config.destroy);
            let report = destroy(&clients, &ctx, &opts).await;
            match cli.format {
                OutputFormat::Text => print!("{}", report.render_text()),
                OutputFormat::Json => println!("{}", report.to_json()?),
            }
            report.is_success()
        }
        Command::Drain { bucket } => {
            let bucket = ctx.names.resolve_bucket(bucket)?;
            let result = drain(
                clients.objects.as_ref(),
                &bucket,
                &DrainOptions::from(&config.drain),
            )
            .await
            .with_context(|| format!("draining {bucket}"))?;
            match cli.format {
                OutputFormat::Text => print!("{}", result.render_text()),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
            }
            result.is_clean()
        }
    };

    if let Some(path) = &cli.metrics_file {
        datalake_ops::metrics::write_snapshot(path)
            .with_context(|| format!("writing metrics to {}", path.display()))?;
    }

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn run_verify(
    clients: &CloudClients,
    ctx: &DeployContext,
    config: &Config,
    format: OutputFormat,
) -> anyhow::Result<bool> {
    let report = verify(clients, ctx, &VerifyOptions::from(&config.verify)).await;
    match format {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }
    Ok(report.is_success())
}

/// A simulated account holding the deployed stack with sample data loaded
/// but no partitions registered yet.
async fn simulated(
    config: &Config,
    account: Option<&str>,
) -> anyhow::Result<(CloudClients, DeployContext)> {
    let account = account
        .or(config.naming.account_id.as_deref())
        .unwrap_or(SIMULATED_ACCOUNT);
    let cloud = Arc::new(MemoryCloud::new(account));
    let ctx = DeployContext::resolve(&config.aws.region, &config.naming, Some(account), &*cloud)
        .await?;

    cloud.register_stack(StackTemplate::for_names(&ctx.names)).await;
    let clients = CloudClients::from_provider(cloud.clone());
    clients.stack.deploy(&ctx.names.stack_name).await?;
    cloud.load_sample_data(&ctx.names).await?;
    info!("Running against simulated account {account}");
    Ok((clients, ctx))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
