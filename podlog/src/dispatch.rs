//! The pod dispatcher.
//!
//! A batch is exactly `budget` pod creations. The coordinator draws every
//! unit's ordinal, jitter and namespace up front from the injected RNG, so a
//! seed fixes the whole plan regardless of how workers are scheduled. Each
//! unit then runs as its own task: sleep the jitter, take a permit, submit the
//! pod. The batch returns only once every task has finished.

use std::{
    num::NonZeroU32,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use metrics::counter;
use podlog_payload::{Template, template::pod_name};
use rand::{Rng, rngs::StdRng};
use tokio::{
    sync::{AcquireError, Semaphore},
    task::JoinSet,
};
use tracing::{debug, info, warn};

use crate::{cluster, cluster::Cluster, provision::Partition, telemetry::MetricsBuilder};

/// Smallest per-unit submission delay, in seconds.
pub const MIN_JITTER_SECS: u64 = 1;
/// Largest per-unit submission delay, in seconds.
pub const MAX_JITTER_SECS: u64 = 3;

/// Errors produced by [`Dispatcher`] and its units.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A dispatcher was built with no partitions to place pods in.
    #[error("No partitions to place pods in")]
    NoPartitions,
    /// The cluster refused or failed the request.
    #[error(transparent)]
    Cluster(#[from] cluster::Error),
    /// The in-flight limiter was closed before the request could be sent.
    #[error("In-flight limiter closed: {0}")]
    Limiter(#[from] AcquireError),
}

/// A unit the cluster did not accept.
#[derive(thiserror::Error, Debug)]
#[error("Failed to create pod {pod} in namespace {namespace}: {source}")]
pub struct UnitFailure {
    /// Ordinal of the unit
    pub ordinal: u64,
    /// Name of the pod
    pub pod: String,
    /// Namespace the pod was placed in
    pub namespace: String,
    /// Underlying error
    #[source]
    pub source: Error,
}

/// Source of unit ordinals.
///
/// Ordinals start at 1 and every call to [`Cursor::next_ordinal`] yields a value no
/// other call has, from any thread, with no gaps.
#[derive(Debug)]
pub struct Cursor {
    next: AtomicU64,
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}

impl Cursor {
    /// Create a new [`Cursor`]
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Take the next ordinal.
    pub fn next_ordinal(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of ordinals handed out so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - 1
    }
}

/// One unit of a batch, fully decided before any request is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitPlan {
    /// Ordinal of the unit
    pub ordinal: u64,
    /// Delay before submission
    pub delay: Duration,
    /// Index into the partition list
    pub partition: usize,
}

/// Outcome of one batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Units the cluster accepted
    pub created: u64,
    /// Units the cluster did not accept
    pub failures: Vec<UnitFailure>,
}

impl BatchReport {
    /// Units submitted, accepted or not.
    #[must_use]
    pub fn submitted(&self) -> u64 {
        self.created + self.failures.len() as u64
    }
}

/// Sends batches of pods to the cluster.
pub struct Dispatcher {
    cluster: Arc<dyn Cluster>,
    partitions: Arc<[Partition]>,
    template: Arc<Template>,
    budget: NonZeroU32,
    cursor: Cursor,
    permits: Arc<Semaphore>,
    rng: StdRng,
    labels: Vec<(String, String)>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("partitions", &self.partitions)
            .field("template", &self.template)
            .field("budget", &self.budget)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a new [`Dispatcher`]
    ///
    /// # Errors
    ///
    /// Function will error if `partitions` is empty.
    pub fn new(
        cluster: Arc<dyn Cluster>,
        partitions: Vec<Partition>,
        template: Template,
        budget: NonZeroU32,
        rng: StdRng,
    ) -> Result<Self, Error> {
        if partitions.is_empty() {
            return Err(Error::NoPartitions);
        }
        Ok(Self {
            cluster,
            partitions: partitions.into(),
            template: Arc::new(template),
            budget,
            cursor: Cursor::new(),
            permits: Arc::new(Semaphore::new(budget.get() as usize)),
            rng,
            labels: MetricsBuilder::new("dispatch").build(),
        })
    }

    /// Units handed an ordinal so far this run.
    #[must_use]
    pub fn dispatched(&self) -> u64 {
        self.cursor.issued()
    }

    /// Draw the plan for the next batch, consuming ordinals.
    pub fn plan(&mut self) -> Vec<UnitPlan> {
        (0..self.budget.get())
            .map(|_| {
                let ordinal = self.cursor.next_ordinal();
                let delay = Duration::from_secs(
                    self.rng.random_range(MIN_JITTER_SECS..=MAX_JITTER_SECS),
                );
                let partition = self.rng.random_range(0..self.partitions.len());
                UnitPlan {
                    ordinal,
                    delay,
                    partition,
                }
            })
            .collect()
    }

    /// Send one batch and wait for every unit in it to finish.
    pub async fn dispatch_batch(&mut self) -> BatchReport {
        let plans = self.plan();
        let mut set = JoinSet::new();

        for plan in plans {
            let cluster = Arc::clone(&self.cluster);
            let partitions = Arc::clone(&self.partitions);
            let template = Arc::clone(&self.template);
            let permits = Arc::clone(&self.permits);

            set.spawn(async move {
                let namespace = partitions[plan.partition].name();
                tokio::time::sleep(plan.delay).await;

                let pod = template.pod(plan.ordinal, namespace);
                let res = match permits.acquire().await {
                    Ok(_permit) => cluster
                        .create_pod(namespace, &pod)
                        .await
                        .map_err(Error::from),
                    Err(e) => Err(Error::from(e)),
                };

                res.map(|()| {
                    debug!("Pod {} in namespace {namespace} created", pod_name(plan.ordinal));
                })
                .map_err(|source| UnitFailure {
                    ordinal: plan.ordinal,
                    pod: pod_name(plan.ordinal),
                    namespace: namespace.to_string(),
                    source,
                })
            });
        }

        let mut report = BatchReport::default();
        for outcome in set.join_all().await {
            match outcome {
                Ok(()) => report.created += 1,
                Err(failure) => {
                    warn!("{failure}");
                    report.failures.push(failure);
                }
            }
        }

        counter!("batches_dispatched", &self.labels).increment(1);
        counter!("pods_created", &self.labels).increment(report.created);
        counter!("pod_creation_failure", &self.labels).increment(report.failures.len() as u64);
        info!(
            "Batch complete: {created} pods created, {failed} failed, {total} dispatched this run",
            created = report.created,
            failed = report.failures.len(),
            total = self.dispatched(),
        );
        report
    }
}
