//! The cluster orchestration API as consumed by podlog.
//!
//! podlog needs very little from Kubernetes: namespace lookup, creation and
//! deletion, pod creation and a count of pods that have not yet terminated.
//! [`Cluster`] is that surface. [`Kubernetes`] speaks to a real API server,
//! [`memory::InMemoryCluster`] models one in-process for tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;

mod kubernetes;
pub mod memory;

pub use kubernetes::Kubernetes;

/// Field selector matching pods in a non-terminal phase.
pub const LIVE_PHASE_SELECTOR: &str = "status.phase!=Succeeded,status.phase!=Failed";

/// Errors produced by [`Cluster`] implementations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error produced by the kube client.
    #[error("Kubernetes client error: {0}")]
    Kube(#[from] kube::Error),
    /// The configured kubeconfig could not be loaded.
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),
    /// No kubeconfig was configured and none could be inferred.
    #[error("Could not infer Kubernetes configuration: {0}")]
    InferConfig(#[from] kube::config::InferConfigError),
    /// The request was refused by the cluster.
    #[error("{operation} of {name} rejected: {reason}")]
    Rejected {
        /// The refused operation
        operation: &'static str,
        /// Name of the object operated on
        name: String,
        /// Why the request was refused
        reason: String,
    },
}

/// Operations podlog performs against the orchestration API.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Whether a namespace called `name` currently exists. A namespace that
    /// is terminating still exists.
    async fn namespace_exists(&self, name: &str) -> Result<bool, Error>;

    /// Create the namespace `name`.
    async fn create_namespace(&self, name: &str) -> Result<(), Error>;

    /// Request deletion of the namespace `name`. Deletion completes
    /// asynchronously; callers observe it through [`Cluster::namespace_exists`].
    async fn delete_namespace(&self, name: &str) -> Result<(), Error>;

    /// Create `pod` in `namespace`.
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), Error>;

    /// Count the pods in `namespace` that are neither succeeded nor failed.
    async fn live_pods(&self, namespace: &str) -> Result<u64, Error>;
}
