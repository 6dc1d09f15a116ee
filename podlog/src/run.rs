//! The run loop.
//!
//! A run provisions its namespaces and then cycles until the run window
//! closes: count live pods, ask admission control whether one more batch fits
//! under the target, and either send that batch and wait for all of it or
//! back off. Reaching the target does not end the run early, the loop idles
//! by polling. The window is only checked between batches so a batch already
//! in flight always completes.
//!
//! The transitions live in [`state_machine::StateMachine`]; this module owns
//! the clock and the cluster.

use std::{num::NonZeroU32, sync::Arc, time::Duration};

use metrics::counter;
use podlog_payload::{Target, Template};
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    admission::{self, Controller},
    cluster::Cluster,
    config::Config,
    dispatch::{self, Dispatcher, UnitFailure},
    observe::{self, Observer},
    provision::{self, Provisioner},
    telemetry::MetricsBuilder,
};

pub mod state_machine;

use state_machine::{Event, Operation, StateMachine};

/// Sleep between cycles when no batch was admitted.
pub const BACKOFF: Duration = Duration::from_secs(5);

/// What to do when pods in a batch fail to be created.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// End the run with an error.
    #[default]
    Abort,
    /// Log the failures and carry on.
    Skip,
}

/// Errors produced by [`Run`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Namespaces could not be provisioned.
    #[error(transparent)]
    Provision(#[from] provision::Error),
    /// Live pods could not be counted.
    #[error(transparent)]
    Observe(#[from] observe::Error),
    /// A batch had failed pods and the failure policy is to abort.
    #[error("Aborting run, {failed} pods in the last batch failed, first: {first}")]
    Dispatch {
        /// Failed pods in the batch
        failed: usize,
        /// The first failure reported by the batch
        #[source]
        first: Box<UnitFailure>,
    },
    /// The dispatcher could not be built.
    #[error("Failed to build dispatcher: {0}")]
    Dispatcher(#[from] dispatch::Error),
    /// The run loop was driven out of order.
    #[error(transparent)]
    StateMachine(#[from] state_machine::Error),
}

/// Tallies of a finished run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Observations made
    pub cycles: u64,
    /// Cycles that backed off instead of dispatching
    pub deferrals: u64,
    /// Batches sent
    pub batches: u64,
    /// Pods the cluster accepted
    pub pods_created: u64,
    /// Pods the cluster refused
    pub pods_failed: u64,
}

/// A single podlog run.
pub struct Run {
    cluster: Arc<dyn Cluster>,
    provisioner: Provisioner,
    target: Target,
    template: Template,
    budget: NonZeroU32,
    duration: Duration,
    admission: admission::Policy,
    on_pod_failure: FailurePolicy,
    rng: StdRng,
}

impl std::fmt::Debug for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("provisioner", &self.provisioner)
            .field("target", &self.target)
            .field("budget", &self.budget)
            .field("duration", &self.duration)
            .field("admission", &self.admission)
            .field("on_pod_failure", &self.on_pod_failure)
            .finish_non_exhaustive()
    }
}

impl Run {
    /// Create a new [`Run`] from `config` against `cluster`.
    #[must_use]
    pub fn new(config: &Config, cluster: Arc<dyn Cluster>) -> Self {
        let target = config.target();
        let rng = config
            .seed
            .map_or_else(|| StdRng::from_rng(&mut rand::rng()), StdRng::from_seed);

        Self {
            cluster,
            provisioner: Provisioner::new(
                &config.namespace_prefix,
                config.num_k8s_namespaces,
                config.max_deletion_polls,
            ),
            target,
            template: Template::new(config.image.clone(), target.payload),
            budget: config.concurrent_requests,
            duration: config.run_duration(),
            admission: config.admission,
            on_pod_failure: config.on_pod_failure,
            rng,
        }
    }

    /// Provision namespaces and run until the run window closes.
    ///
    /// # Errors
    ///
    /// Function will error if provisioning yields no partitions, if
    /// provisioning or observation fails, or if a batch has failures and the
    /// failure policy is [`FailurePolicy::Abort`].
    pub async fn execute(self) -> Result<Summary, Error> {
        let Run {
            cluster,
            provisioner,
            target,
            template,
            budget,
            duration,
            admission,
            on_pod_failure,
            rng,
        } = self;

        info!(
            "Target is {units} pods writing {lines} lines of {bytes} bytes each",
            units = target.units,
            lines = target.payload.lines_per_unit,
            bytes = target.payload.bytes_per_line,
        );

        let partitions = provisioner.provision(cluster.as_ref()).await?;

        let deadline = Instant::now() + duration;
        let observer = Observer::new();
        let mut dispatcher = Dispatcher::new(
            Arc::clone(&cluster),
            partitions.clone(),
            template,
            budget,
            rng,
        )?;
        let mut machine = StateMachine::new(Controller::new(admission, budget.get(), target.units));
        let labels = MetricsBuilder::new("run").build();
        let mut summary = Summary::default();

        let mut event = Event::CycleStarted {
            deadline_passed: Instant::now() >= deadline,
        };
        loop {
            let operation = machine.next(event)?;
            debug!("{event:?} -> {operation:?}");
            event = match operation {
                Operation::Observe => {
                    summary.cycles += 1;
                    let live = observer.total_live(cluster.as_ref(), &partitions).await?;
                    Event::Observed { live }
                }
                Operation::Dispatch => {
                    let report = dispatcher.dispatch_batch().await;
                    summary.batches += 1;
                    summary.pods_created += report.created;
                    summary.pods_failed += report.failures.len() as u64;

                    let submitted = report.submitted();
                    let failed = report.failures.len();
                    if let Some(first) = report.failures.into_iter().next() {
                        match on_pod_failure {
                            FailurePolicy::Abort => {
                                error!("{failed} pods failed, aborting run");
                                return Err(Error::Dispatch {
                                    failed,
                                    first: Box::new(first),
                                });
                            }
                            FailurePolicy::Skip => {
                                warn!("{failed} pods failed, continuing");
                            }
                        }
                    }
                    Event::BatchCompleted { submitted }
                }
                Operation::Backoff => {
                    summary.deferrals += 1;
                    counter!("admission_deferred", &labels).increment(1);
                    info!(
                        "Total running pods reached the target: {units}",
                        units = target.units
                    );
                    tokio::time::sleep(BACKOFF).await;
                    Event::CycleStarted {
                        deadline_passed: Instant::now() >= deadline,
                    }
                }
                Operation::NextCycle => Event::CycleStarted {
                    deadline_passed: Instant::now() >= deadline,
                },
                Operation::Exit => {
                    info!(
                        "Run window closed after {batches} batches, {created} pods created, {failed} failed",
                        batches = summary.batches,
                        created = summary.pods_created,
                        failed = summary.pods_failed,
                    );
                    return Ok(summary);
                }
            };
        }
    }
}
