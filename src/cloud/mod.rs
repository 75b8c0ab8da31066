//! Cloud provider boundary.
//!
//! The [`backend`] traits abstract over the provider APIs the workflows
//! need.  [`aws`] talks to real AWS services; [`memory`] simulates them
//! in-process (versioned buckets included) for tests and dry runs.

use std::sync::Arc;

pub mod aws;
pub mod backend;
pub mod memory;

use backend::{Catalog, Identity, ObjectStore, QueryService, StackTool};

/// Handles to every provider service, shared by the workflows.
#[derive(Clone)]
pub struct CloudClients {
    pub objects: Arc<dyn ObjectStore>,
    pub catalog: Arc<dyn Catalog>,
    pub queries: Arc<dyn QueryService>,
    pub stack: Arc<dyn StackTool>,
    pub identity: Arc<dyn Identity>,
}

impl CloudClients {
    /// Route every service to one provider implementation.
    pub fn from_provider<P>(provider: Arc<P>) -> Self
    where
        P: ObjectStore + Catalog + QueryService + StackTool + Identity,
    {
        Self {
            objects: provider.clone(),
            catalog: provider.clone(),
            queries: provider.clone(),
            stack: provider.clone(),
            identity: provider,
        }
    }
}
