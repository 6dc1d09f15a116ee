//! In-memory cluster for testing
//!
//! Models just enough of a Kubernetes API server for podlog's purposes:
//! namespaces that linger for a configurable number of existence checks after
//! deletion, pods that are live until told otherwise, name conflicts, and
//! injected creation failures. Every request is recorded for assertions.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use rustc_hash::{FxHashMap, FxHashSet};

use super::{Cluster, Error};

/// Phase of a pod held by [`InMemoryCluster`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepted, not yet finished
    Pending,
    /// Ran to completion
    Succeeded,
    /// Ran and failed
    Failed,
}

/// A pod accepted by [`InMemoryCluster`].
#[derive(Debug, Clone)]
pub struct StoredPod {
    /// Namespace the pod was created in
    pub namespace: String,
    /// The pod as submitted
    pub pod: Pod,
    /// Current phase
    pub phase: Phase,
}

impl StoredPod {
    /// Name of the pod, empty if the submission carried none.
    #[must_use]
    pub fn name(&self) -> &str {
        self.pod.metadata.name.as_deref().unwrap_or_default()
    }
}

#[derive(Debug)]
struct NamespaceState {
    /// Existence checks still reporting the namespace after deletion. `None`
    /// while active.
    terminating: Option<u32>,
    pods: Vec<StoredPod>,
}

#[derive(Debug, Default)]
struct State {
    namespaces: FxHashMap<String, NamespaceState>,
    /// Pods in creation order, across all namespaces
    created: Vec<StoredPod>,
    rejected_pods: FxHashSet<String>,
    namespaces_created: Vec<String>,
    namespaces_deleted: Vec<String>,
    existence_checks: u64,
}

/// An in-process stand-in for a Kubernetes API server.
///
/// Clones share state.
#[derive(Clone, Debug)]
pub struct InMemoryCluster {
    state: Arc<Mutex<State>>,
    deletion_polls: u32,
    create_latency: Duration,
    pods_finish_immediately: bool,
    in_flight: Arc<AtomicU64>,
    max_in_flight: Arc<AtomicU64>,
    pod_requests: Arc<AtomicU64>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    /// Create an empty cluster. Deleted namespaces vanish on the next
    /// existence check and pod creation completes without delay.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            deletion_polls: 0,
            create_latency: Duration::ZERO,
            pods_finish_immediately: false,
            in_flight: Arc::new(AtomicU64::new(0)),
            max_in_flight: Arc::new(AtomicU64::new(0)),
            pod_requests: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Deleted namespaces keep existing for `polls` existence checks.
    /// `u32::MAX` models a deletion that never completes.
    #[must_use]
    pub fn with_deletion_polls(mut self, polls: u32) -> Self {
        self.deletion_polls = polls;
        self
    }

    /// Each pod creation request takes `latency` to complete.
    #[must_use]
    pub fn with_create_latency(mut self, latency: Duration) -> Self {
        self.create_latency = latency;
        self
    }

    /// Pods are accepted already succeeded and so are never live.
    #[must_use]
    pub fn with_pods_finishing_immediately(mut self) -> Self {
        self.pods_finish_immediately = true;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("mutex poisoned")
    }

    /// Create `name` directly, bypassing request bookkeeping.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned
    pub fn seed_namespace(&self, name: &str, live_pods: usize) {
        let pods = (0..live_pods)
            .map(|i| {
                let mut pod = Pod::default();
                pod.metadata.name = Some(format!("leftover-{i}"));
                pod.metadata.namespace = Some(name.to_string());
                StoredPod {
                    namespace: name.to_string(),
                    pod,
                    phase: Phase::Pending,
                }
            })
            .collect();
        self.lock().namespaces.insert(
            name.to_string(),
            NamespaceState {
                terminating: None,
                pods,
            },
        );
    }

    /// Refuse any future creation of the pod called `name`.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned
    pub fn reject_pod(&self, name: &str) {
        self.lock().rejected_pods.insert(name.to_string());
    }

    /// Move every pod in `namespace` to `phase`.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned
    pub fn set_phase(&self, namespace: &str, phase: Phase) {
        if let Some(ns) = self.lock().namespaces.get_mut(namespace) {
            for pod in &mut ns.pods {
                pod.phase = phase;
            }
        }
    }

    /// Names of namespaces that currently exist, terminating or not, sorted.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned
    #[must_use]
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().namespaces.keys().cloned().collect();
        names.sort();
        names
    }

    /// Pods currently held in `namespace`.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned
    #[must_use]
    pub fn pods_in(&self, namespace: &str) -> Vec<StoredPod> {
        self.lock()
            .namespaces
            .get(namespace)
            .map(|ns| ns.pods.clone())
            .unwrap_or_default()
    }

    /// Every pod accepted, in acceptance order.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned
    #[must_use]
    pub fn created_pods(&self) -> Vec<StoredPod> {
        self.lock().created.clone()
    }

    /// Namespaces created through [`Cluster::create_namespace`], in order.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned
    #[must_use]
    pub fn namespaces_created(&self) -> Vec<String> {
        self.lock().namespaces_created.clone()
    }

    /// Namespaces deleted through [`Cluster::delete_namespace`], in order.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned
    #[must_use]
    pub fn namespaces_deleted(&self) -> Vec<String> {
        self.lock().namespaces_deleted.clone()
    }

    /// Number of [`Cluster::namespace_exists`] calls served.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned
    #[must_use]
    pub fn existence_checks(&self) -> u64 {
        self.lock().existence_checks
    }

    /// Pod creation requests received, accepted or not.
    #[must_use]
    pub fn pod_requests(&self) -> u64 {
        self.pod_requests.load(Ordering::SeqCst)
    }

    /// Highest number of pod creation requests ever in flight at once.
    #[must_use]
    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn admit_pod(&self, namespace: &str, pod: &Pod) -> Result<(), Error> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let reject = |reason: &str| Error::Rejected {
            operation: "pod creation",
            name: name.clone(),
            reason: reason.to_string(),
        };

        let mut state = self.lock();
        if state.rejected_pods.contains(&name) {
            return Err(reject("injected failure"));
        }
        let phase = if self.pods_finish_immediately {
            Phase::Succeeded
        } else {
            Phase::Pending
        };
        let stored = StoredPod {
            namespace: namespace.to_string(),
            pod: pod.clone(),
            phase,
        };
        let ns = match state.namespaces.get_mut(namespace) {
            Some(ns) if ns.terminating.is_none() => ns,
            Some(_) => return Err(reject("namespace is terminating")),
            None => return Err(reject("namespace not found")),
        };
        if ns.pods.iter().any(|p| p.name() == name) {
            return Err(reject("already exists"));
        }
        ns.pods.push(stored.clone());
        state.created.push(stored);
        Ok(())
    }
}

#[async_trait]
impl Cluster for InMemoryCluster {
    async fn namespace_exists(&self, name: &str) -> Result<bool, Error> {
        let mut state = self.lock();
        state.existence_checks += 1;
        let terminating = match state.namespaces.get(name) {
            None => return Ok(false),
            Some(ns) => ns.terminating,
        };
        match terminating {
            None => Ok(true),
            Some(0) => {
                state.namespaces.remove(name);
                Ok(false)
            }
            Some(remaining) => {
                if let Some(ns) = state.namespaces.get_mut(name) {
                    ns.terminating = Some(remaining - 1);
                }
                Ok(true)
            }
        }
    }

    async fn create_namespace(&self, name: &str) -> Result<(), Error> {
        let mut state = self.lock();
        if state.namespaces.contains_key(name) {
            return Err(Error::Rejected {
                operation: "namespace creation",
                name: name.to_string(),
                reason: "already exists".to_string(),
            });
        }
        state.namespaces.insert(
            name.to_string(),
            NamespaceState {
                terminating: None,
                pods: Vec::new(),
            },
        );
        state.namespaces_created.push(name.to_string());
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), Error> {
        let mut state = self.lock();
        let Some(ns) = state.namespaces.get_mut(name) else {
            return Err(Error::Rejected {
                operation: "namespace deletion",
                name: name.to_string(),
                reason: "not found".to_string(),
            });
        };
        if ns.terminating.is_none() {
            ns.terminating = Some(self.deletion_polls);
        }
        state.namespaces_deleted.push(name.to_string());
        Ok(())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), Error> {
        self.pod_requests.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.create_latency.is_zero() {
            tokio::time::sleep(self.create_latency).await;
        }
        let res = self.admit_pod(namespace, pod);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        res
    }

    async fn live_pods(&self, namespace: &str) -> Result<u64, Error> {
        let state = self.lock();
        let Some(ns) = state.namespaces.get(namespace) else {
            return Err(Error::Rejected {
                operation: "pod listing",
                name: namespace.to_string(),
                reason: "namespace not found".to_string(),
            });
        };
        let live = ns
            .pods
            .iter()
            .filter(|pod| pod.phase == Phase::Pending)
            .count();
        Ok(live as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(name: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod
    }

    #[tokio::test]
    async fn deletion_lingers_for_configured_polls() {
        let cluster = InMemoryCluster::new().with_deletion_polls(2);
        cluster.create_namespace("ns").await.expect("create");
        cluster.delete_namespace("ns").await.expect("delete");

        assert!(cluster.namespace_exists("ns").await.expect("exists"));
        assert!(cluster.namespace_exists("ns").await.expect("exists"));
        assert!(!cluster.namespace_exists("ns").await.expect("exists"));
        assert_eq!(cluster.existence_checks(), 3);
    }

    #[tokio::test]
    async fn terminating_namespace_refuses_pods_and_recreation() {
        let cluster = InMemoryCluster::new().with_deletion_polls(5);
        cluster.create_namespace("ns").await.expect("create");
        cluster.delete_namespace("ns").await.expect("delete");

        assert!(cluster.create_pod("ns", &pod("a")).await.is_err());
        assert!(cluster.create_namespace("ns").await.is_err());
    }

    #[tokio::test]
    async fn live_pods_excludes_terminal_phases() {
        let cluster = InMemoryCluster::new();
        cluster.create_namespace("ns").await.expect("create");
        for name in ["a", "b", "c"] {
            cluster.create_pod("ns", &pod(name)).await.expect("pod");
        }
        assert_eq!(cluster.live_pods("ns").await.expect("live"), 3);

        cluster.set_phase("ns", Phase::Failed);
        assert_eq!(cluster.live_pods("ns").await.expect("live"), 0);
    }

    #[tokio::test]
    async fn duplicate_and_rejected_pods_fail() {
        let cluster = InMemoryCluster::new();
        cluster.create_namespace("ns").await.expect("create");
        cluster.create_pod("ns", &pod("a")).await.expect("pod");
        assert!(cluster.create_pod("ns", &pod("a")).await.is_err());

        cluster.reject_pod("b");
        assert!(cluster.create_pod("ns", &pod("b")).await.is_err());

        assert_eq!(cluster.pod_requests(), 3);
        assert_eq!(cluster.created_pods().len(), 1);
    }
}
