//! Admission control for pod batches.
//!
//! Every cycle the run loop asks whether one more full batch fits under the
//! target given the pods still live in the cluster. The live count is a stale
//! snapshot: pods from the previous batch may not be visible yet, so the run
//! can overshoot its target by up to one batch. [`Policy::Bounded`] trades
//! that for a hard cap on pods created by the run.

use serde::{Deserialize, Serialize};

/// How batches are admitted.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Admit on the observed live count alone. Pods that finish make room for
    /// more, so the run keeps producing load for its whole window.
    #[default]
    Observed,
    /// As `Observed`, but additionally never let the pods dispatched by this
    /// run exceed the target.
    Bounded,
}

/// Whether a batch of `budget` pods may be sent when `observed` pods are live
/// and the run aims for `target`.
///
/// Admits iff `observed + budget < target`. This is the ceiling of the
/// prospective batch, not its actual size.
#[must_use]
pub fn admit(observed: u64, budget: u32, target: u64) -> bool {
    observed.saturating_add(u64::from(budget)) < target
}

/// Stateless admission predicate configured for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controller {
    policy: Policy,
    budget: u32,
    target: u64,
}

impl Controller {
    /// Create a new [`Controller`]
    #[must_use]
    pub fn new(policy: Policy, budget: u32, target: u64) -> Self {
        Self {
            policy,
            budget,
            target,
        }
    }

    /// Decide whether to send a batch given `observed` live pods and
    /// `dispatched` pods sent so far by this run.
    #[must_use]
    pub fn decide(&self, observed: u64, dispatched: u64) -> bool {
        let live_fits = admit(observed, self.budget, self.target);
        match self.policy {
            Policy::Observed => live_fits,
            Policy::Bounded => {
                live_fits && dispatched.saturating_add(u64::from(self.budget)) <= self.target
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn boundary() {
        assert!(admit(0, 2, 103));
        assert!(admit(100, 2, 103));
        assert!(!admit(101, 2, 103));
        assert!(!admit(0, 2, 2));
        assert!(!admit(0, 1, 0));
    }

    #[test]
    fn saturates() {
        assert!(!admit(u64::MAX, u32::MAX, u64::MAX));
    }

    #[test]
    fn bounded_caps_dispatched() {
        let controller = Controller::new(Policy::Bounded, 2, 10);
        assert!(controller.decide(0, 8));
        assert!(!controller.decide(0, 9));

        let controller = Controller::new(Policy::Observed, 2, 10);
        assert!(controller.decide(0, 1_000));
    }

    proptest! {
        #[test]
        fn never_admits_at_or_over_target(observed: u64, budget: u32, target: u64) {
            let admitted = admit(observed, budget, target);
            let fits = u128::from(observed) + u128::from(budget) < u128::from(target);
            prop_assert_eq!(admitted, fits);
        }

        #[test]
        fn policies_agree_on_refusal(observed: u64, dispatched: u64, budget: u32, target: u64) {
            for policy in [Policy::Observed, Policy::Bounded] {
                let controller = Controller::new(policy, budget, target);
                if u128::from(observed) + u128::from(budget) >= u128::from(target) {
                    prop_assert!(!controller.decide(observed, dispatched));
                }
            }
        }

        #[test]
        fn bounded_is_never_looser(observed: u64, dispatched: u64, budget: u32, target: u64) {
            let bounded = Controller::new(Policy::Bounded, budget, target);
            let observed_only = Controller::new(Policy::Observed, budget, target);
            if bounded.decide(observed, dispatched) {
                prop_assert!(observed_only.decide(observed, dispatched));
            }
        }
    }
}
