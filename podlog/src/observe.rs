//! Observation of live pods.
//!
//! A pod is live until it reaches a terminal phase, succeeded or failed.
//! Counts are taken one namespace at a time and are not a consistent snapshot
//! of the cluster.

use metrics::gauge;
use tracing::trace;

use crate::{cluster, cluster::Cluster, provision::Partition, telemetry::MetricsBuilder};

/// Errors produced by [`Observer`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Listing pods failed.
    #[error("Failed to list pods in namespace {namespace}: {source}")]
    List {
        /// Namespace name
        namespace: String,
        /// Underlying cluster error
        #[source]
        source: cluster::Error,
    },
}

/// Reports the live pod count across the run's partitions.
#[derive(Debug)]
pub struct Observer {
    labels: Vec<(String, String)>,
}

impl Default for Observer {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer {
    /// Create a new [`Observer`]
    #[must_use]
    pub fn new() -> Self {
        Self {
            labels: MetricsBuilder::new("observe").build(),
        }
    }

    /// Live pods in a single partition.
    ///
    /// # Errors
    ///
    /// Function will error if the cluster cannot list the partition's pods.
    pub async fn live_in<C>(&self, cluster: &C, partition: &Partition) -> Result<u64, Error>
    where
        C: Cluster + ?Sized,
    {
        cluster
            .live_pods(partition.name())
            .await
            .map_err(|source| Error::List {
                namespace: partition.name().to_string(),
                source,
            })
    }

    /// Live pods summed across `partitions`.
    ///
    /// # Errors
    ///
    /// Function will error on the first partition that cannot be listed.
    pub async fn total_live<C>(&self, cluster: &C, partitions: &[Partition]) -> Result<u64, Error>
    where
        C: Cluster + ?Sized,
    {
        let mut total = 0_u64;
        for partition in partitions {
            let live = self.live_in(cluster, partition).await?;
            trace!("{live} live pods in {partition}");
            total += live;
        }
        gauge!("live_pods", &self.labels).set(total as f64);
        Ok(total)
    }
}
