//! datalake-ops library: verification and teardown for the data-lake stack.
//!
//! This crate provides the operational workflows around a CDK-provisioned
//! data lake (S3 buckets, a Glue catalog, an Athena workgroup): a
//! deployment verifier with partition self-heal, a versioned-bucket drain,
//! and a destroy orchestrator built on top of it.  All provider access goes
//! through the traits in [`cloud::backend`].

pub mod cloud;
pub mod config;
pub mod destroy;
pub mod drain;
pub mod errors;
pub mod metrics;
pub mod naming;
pub mod retry;
pub mod verify;

pub use cloud::CloudClients;
pub use errors::OpsError;
pub use naming::DeployContext;
