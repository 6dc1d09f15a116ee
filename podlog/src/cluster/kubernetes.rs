//! [`Cluster`] backed by a Kubernetes API server.

use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{Namespace, Pod},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::{
    Api,
    api::{DeleteParams, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
};
use tracing::debug;

use super::{Cluster, Error, LIVE_PHASE_SELECTOR};

/// A connection to a Kubernetes API server.
#[derive(Clone)]
pub struct Kubernetes {
    client: kube::Client,
}

impl std::fmt::Debug for Kubernetes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kubernetes")
            .field("default_namespace", &self.client.default_namespace())
            .finish()
    }
}

impl Kubernetes {
    /// Build a client from the kubeconfig at `kubeconfig_path`, or infer the
    /// configuration from the environment when no path is given.
    ///
    /// # Errors
    ///
    /// Function will error if the kubeconfig cannot be read or is invalid, if
    /// no configuration can be inferred, or if the client cannot be built.
    pub async fn connect(kubeconfig_path: Option<&Path>) -> Result<Self, Error> {
        let config = if let Some(path) = kubeconfig_path {
            debug!("Loading kubeconfig from {}", path.display());
            let kubeconfig = Kubeconfig::read_from(path)?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await?
        } else {
            debug!("Inferring Kubernetes configuration");
            kube::Config::infer().await?
        };
        let client = kube::Client::try_from(config)?;
        Ok(Self { client })
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl Cluster for Kubernetes {
    async fn namespace_exists(&self, name: &str) -> Result<bool, Error> {
        Ok(self.namespaces().get_opt(name).await?.is_some())
    }

    async fn create_namespace(&self, name: &str) -> Result<(), Error> {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        self.namespaces()
            .create(&PostParams::default(), &namespace)
            .await?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), Error> {
        self.namespaces()
            .delete(name, &DeleteParams::default())
            .await?
            .map_left(|_| debug!("Deleting namespace {name}"))
            .map_right(|_| debug!("Deleted namespace {name}"));
        Ok(())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), Error> {
        self.pods(namespace)
            .create(&PostParams::default(), pod)
            .await?;
        Ok(())
    }

    async fn live_pods(&self, namespace: &str) -> Result<u64, Error> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default().fields(LIVE_PHASE_SELECTOR))
            .await?;
        let live = pods
            .items
            .iter()
            .filter(|pod| pod.metadata.name.is_some() && pod.metadata.namespace.is_some())
            .count();
        Ok(live as u64)
    }
}
