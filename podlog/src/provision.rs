//! Namespace provisioning.
//!
//! Before the run starts podlog needs a fixed set of empty namespaces. Any
//! namespace left over from a previous run under the same name is deleted and
//! recreated so that its pods cannot inflate the live counts admission
//! control relies on. Namespace deletion in Kubernetes is asynchronous; the
//! provisioner polls until the old namespace is gone, up to a bound.

use std::{fmt, num::NonZeroU32, time::Duration};

use metrics::counter;
use tracing::{debug, info};

use crate::{cluster, cluster::Cluster, telemetry::MetricsBuilder};

/// Interval between existence checks while waiting for a deletion.
pub const DELETION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors produced by [`Provisioner`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Looking up a namespace failed.
    #[error("Failed to look up namespace {namespace}: {source}")]
    Lookup {
        /// Namespace name
        namespace: String,
        /// Underlying cluster error
        #[source]
        source: cluster::Error,
    },
    /// Deleting a pre-existing namespace failed.
    #[error("Failed to delete existing namespace {namespace}: {source}")]
    Delete {
        /// Namespace name
        namespace: String,
        /// Underlying cluster error
        #[source]
        source: cluster::Error,
    },
    /// Creating a namespace failed.
    #[error("Failed to create namespace {namespace}: {source}")]
    Create {
        /// Namespace name
        namespace: String,
        /// Underlying cluster error
        #[source]
        source: cluster::Error,
    },
    /// A deleted namespace did not disappear in time.
    #[error("Provisioning timed out: namespace {namespace} still exists after {attempts} checks")]
    TimedOut {
        /// Namespace name
        namespace: String,
        /// Existence checks made after deletion
        attempts: u32,
    },
}

/// A provisioned namespace that hosts workload pods.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    name: String,
}

impl Partition {
    /// The partition for 1-based `index` under `prefix`.
    #[must_use]
    pub fn new(prefix: &str, index: u32) -> Self {
        Self {
            name: format!("{prefix}-{index}"),
        }
    }

    /// Name of the underlying namespace.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Creates the run's namespaces, replacing any of the same name.
#[derive(Debug, Clone)]
pub struct Provisioner {
    prefix: String,
    count: NonZeroU32,
    max_deletion_polls: NonZeroU32,
    poll_interval: Duration,
    labels: Vec<(String, String)>,
}

impl Provisioner {
    /// Create a new [`Provisioner`] for `count` namespaces named
    /// `{prefix}-1` through `{prefix}-{count}`.
    #[must_use]
    pub fn new(prefix: &str, count: NonZeroU32, max_deletion_polls: NonZeroU32) -> Self {
        Self {
            prefix: prefix.to_string(),
            count,
            max_deletion_polls,
            poll_interval: DELETION_POLL_INTERVAL,
            labels: MetricsBuilder::new("provision").build(),
        }
    }

    /// Ensure every namespace exists and is newly created, in index order.
    ///
    /// # Errors
    ///
    /// Function will error if any lookup, deletion or creation fails, or if a
    /// deleted namespace is still present after the configured number of
    /// checks. No partially provisioned namespaces are cleaned up.
    pub async fn provision<C>(&self, cluster: &C) -> Result<Vec<Partition>, Error>
    where
        C: Cluster + ?Sized,
    {
        let mut partitions = Vec::with_capacity(self.count.get() as usize);
        for index in 1..=self.count.get() {
            let partition = Partition::new(&self.prefix, index);
            self.replace(cluster, partition.name()).await?;
            partitions.push(partition);
        }
        Ok(partitions)
    }

    async fn replace<C>(&self, cluster: &C, namespace: &str) -> Result<(), Error>
    where
        C: Cluster + ?Sized,
    {
        if self.exists(cluster, namespace).await? {
            cluster
                .delete_namespace(namespace)
                .await
                .map_err(|source| Error::Delete {
                    namespace: namespace.to_string(),
                    source,
                })?;
            info!("Deleted existing namespace {namespace}");
            self.wait_for_deletion(cluster, namespace).await?;
        }

        cluster
            .create_namespace(namespace)
            .await
            .map_err(|source| Error::Create {
                namespace: namespace.to_string(),
                source,
            })?;
        counter!("namespaces_created", &self.labels).increment(1);
        info!("Namespace {namespace} created");
        Ok(())
    }

    async fn wait_for_deletion<C>(&self, cluster: &C, namespace: &str) -> Result<(), Error>
    where
        C: Cluster + ?Sized,
    {
        let max = self.max_deletion_polls.get();
        for attempt in 1..=max {
            if !self.exists(cluster, namespace).await? {
                debug!("Namespace {namespace} gone after {attempt} checks");
                return Ok(());
            }
            debug!("Still deleting namespace {namespace}");
            if attempt < max {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        Err(Error::TimedOut {
            namespace: namespace.to_string(),
            attempts: max,
        })
    }

    async fn exists<C>(&self, cluster: &C, namespace: &str) -> Result<bool, Error>
    where
        C: Cluster + ?Sized,
    {
        cluster
            .namespace_exists(namespace)
            .await
            .map_err(|source| Error::Lookup {
                namespace: namespace.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::InMemoryCluster;

    fn nz(v: u32) -> NonZeroU32 {
        NonZeroU32::new(v).expect("non-zero")
    }

    #[test]
    fn partition_names() {
        assert_eq!(Partition::new("logger-ns", 1).name(), "logger-ns-1");
        assert_eq!(Partition::new("load", 12).to_string(), "load-12");
    }

    #[tokio::test]
    async fn fresh_cluster_creates_in_order() {
        let cluster = InMemoryCluster::new();
        let partitions = Provisioner::new("logger-ns", nz(3), nz(10))
            .provision(&cluster)
            .await
            .expect("provisioning succeeds");

        let names: Vec<&str> = partitions.iter().map(Partition::name).collect();
        assert_eq!(names, vec!["logger-ns-1", "logger-ns-2", "logger-ns-3"]);
        assert_eq!(cluster.namespaces_created(), names);
        assert!(cluster.namespaces_deleted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn leftover_namespace_is_replaced_empty() {
        let cluster = InMemoryCluster::new().with_deletion_polls(3);
        cluster.seed_namespace("logger-ns-2", 5);

        let partitions = Provisioner::new("logger-ns", nz(2), nz(10))
            .provision(&cluster)
            .await
            .expect("provisioning succeeds");

        assert_eq!(partitions.len(), 2);
        assert_eq!(cluster.namespaces_deleted(), vec!["logger-ns-2"]);
        assert!(cluster.pods_in("logger-ns-2").is_empty());
        assert_eq!(cluster.live_pods("logger-ns-2").await.expect("live"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn provisioning_twice_leaves_empty_namespaces() {
        let cluster = InMemoryCluster::new().with_deletion_polls(2);
        let provisioner = Provisioner::new("logger-ns", nz(2), nz(10));

        let first = provisioner.provision(&cluster).await.expect("first run");
        for partition in &first {
            cluster.seed_namespace(partition.name(), 4);
            assert_eq!(cluster.live_pods(partition.name()).await.expect("live"), 4);
        }

        let second = provisioner.provision(&cluster).await.expect("second run");
        assert_eq!(first, second);
        for partition in &second {
            assert_eq!(cluster.live_pods(partition.name()).await.expect("live"), 0);
        }
        assert_eq!(cluster.namespaces_deleted(), vec!["logger-ns-1", "logger-ns-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_wait_polls_each_second() {
        let cluster = InMemoryCluster::new().with_deletion_polls(4);
        cluster.seed_namespace("logger-ns-1", 0);

        let start = tokio::time::Instant::now();
        Provisioner::new("logger-ns", nz(1), nz(10))
            .provision(&cluster)
            .await
            .expect("provisioning succeeds");

        // One initial lookup, four checks that still see the namespace and a
        // final one that does not.
        assert_eq!(cluster.existence_checks(), 6);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_deletion_times_out() {
        let cluster = InMemoryCluster::new().with_deletion_polls(u32::MAX);
        cluster.seed_namespace("logger-ns-1", 1);

        let start = tokio::time::Instant::now();
        let err = Provisioner::new("logger-ns", nz(1), nz(5))
            .provision(&cluster)
            .await
            .expect_err("deletion never completes");

        // Five checks one second apart, no sleep after the last.
        assert_eq!(start.elapsed(), Duration::from_secs(4));
        assert_eq!(cluster.existence_checks(), 6);

        match err {
            Error::TimedOut {
                namespace,
                attempts,
            } => {
                assert_eq!(namespace, "logger-ns-1");
                assert_eq!(attempts, 5);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(cluster.namespaces_created().is_empty());
    }
}
