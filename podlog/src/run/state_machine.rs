//! Pure state machine for the run loop

use crate::admission::Controller;

/// The state of the run loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Top of a cycle, about to check the deadline
    Polling,
    /// Deadline not reached, waiting on the live pod count
    Observing,
    /// A batch is in flight
    Dispatching,
    /// Terminal state
    Finished,
}

/// Operations the state machine can request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Count live pods across all partitions
    Observe,
    /// Send one batch and wait for all of it
    Dispatch,
    /// Sleep before the next cycle, nothing was admitted
    Backoff,
    /// Start the next cycle immediately
    NextCycle,
    /// Stop the run
    Exit,
}

/// Events that can drive the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A cycle begins; whether the run deadline has passed.
    CycleStarted {
        /// The deadline is at or before now
        deadline_passed: bool,
    },
    /// Live pods were counted.
    Observed {
        /// Live pods across all partitions
        live: u64,
    },
    /// Every unit in the in-flight batch finished.
    BatchCompleted {
        /// Units submitted in the batch, accepted or not
        submitted: u64,
    },
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors produced by [`StateMachine`].
pub enum Error {
    /// Transition is not valid
    #[error("Invalid transition from {from:?} via {via:?}")]
    InvalidTransition {
        /// State the machine was in
        from: State,
        /// Event that was refused
        via: Event,
    },
}

/// State machine for the run loop
///
/// Holds the transition logic of the run _without_ IO encumbrance, neither
/// timing information nor API interactions. The driver in `super` owns the
/// clock and the cluster and follows the output of `next` without
/// consideration.
#[derive(Debug, Clone, Copy)]
pub struct StateMachine {
    state: State,
    admission: Controller,
    dispatched: u64,
}

impl StateMachine {
    /// Create a new state machine
    #[must_use]
    pub fn new(admission: Controller) -> Self {
        Self {
            state: State::Polling,
            admission,
            dispatched: 0,
        }
    }

    /// Get the current state
    #[must_use]
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Units submitted by completed batches so far
    #[must_use]
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Process an event and return the next operation
    ///
    /// # Errors
    ///
    /// Function will error with `InvalidTransition` if the `event` is not valid
    /// for the present state.
    pub fn next(&mut self, event: Event) -> Result<Operation, Error> {
        let (next_state, operation) = match (self.state, event) {
            // The deadline is only consulted here, between batches
            (State::Polling, Event::CycleStarted { deadline_passed: true }) => {
                (State::Finished, Operation::Exit)
            }
            (State::Polling, Event::CycleStarted { deadline_passed: false }) => {
                (State::Observing, Operation::Observe)
            }
            (State::Observing, Event::Observed { live }) => {
                if self.admission.decide(live, self.dispatched) {
                    (State::Dispatching, Operation::Dispatch)
                } else {
                    (State::Polling, Operation::Backoff)
                }
            }
            (State::Dispatching, Event::BatchCompleted { submitted }) => {
                self.dispatched = self.dispatched.saturating_add(submitted);
                (State::Polling, Operation::NextCycle)
            }
            (from, via) => return Err(Error::InvalidTransition { from, via }),
        };

        self.state = next_state;
        Ok(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::Policy;
    use proptest::prelude::*;

    fn new_machine(policy: Policy, budget: u32, target: u64) -> StateMachine {
        StateMachine::new(Controller::new(policy, budget, target))
    }

    #[test]
    fn initial_state() {
        let machine = new_machine(Policy::Observed, 2, 103);
        assert_eq!(machine.state(), &State::Polling);
        assert_eq!(machine.dispatched(), 0);
    }

    #[test]
    fn full_cycle() {
        let mut machine = new_machine(Policy::Observed, 2, 103);

        assert_eq!(
            machine.next(Event::CycleStarted { deadline_passed: false }),
            Ok(Operation::Observe)
        );
        assert_eq!(machine.next(Event::Observed { live: 0 }), Ok(Operation::Dispatch));
        assert_eq!(machine.state(), &State::Dispatching);
        assert_eq!(
            machine.next(Event::BatchCompleted { submitted: 2 }),
            Ok(Operation::NextCycle)
        );
        assert_eq!(machine.dispatched(), 2);

        assert_eq!(
            machine.next(Event::CycleStarted { deadline_passed: false }),
            Ok(Operation::Observe)
        );
        assert_eq!(machine.next(Event::Observed { live: 101 }), Ok(Operation::Backoff));
        assert_eq!(machine.state(), &State::Polling);

        assert_eq!(
            machine.next(Event::CycleStarted { deadline_passed: true }),
            Ok(Operation::Exit)
        );
        assert_eq!(machine.state(), &State::Finished);
    }

    #[test]
    fn bounded_policy_stops_on_dispatched() {
        let mut machine = new_machine(Policy::Bounded, 5, 10);
        for _ in 0..2 {
            machine
                .next(Event::CycleStarted { deadline_passed: false })
                .expect("observe");
            assert_eq!(machine.next(Event::Observed { live: 0 }), Ok(Operation::Dispatch));
            machine
                .next(Event::BatchCompleted { submitted: 5 })
                .expect("next cycle");
        }
        machine
            .next(Event::CycleStarted { deadline_passed: false })
            .expect("observe");
        assert_eq!(machine.next(Event::Observed { live: 0 }), Ok(Operation::Backoff));
    }

    proptest! {
        #[test]
        fn invalid_transitions_rejected(live in 0u64..1_000, submitted in 0u64..100) {
            let cycle = Event::CycleStarted { deadline_passed: false };
            let expired = Event::CycleStarted { deadline_passed: true };
            let observed = Event::Observed { live };
            let completed = Event::BatchCompleted { submitted };

            // Polling accepts only the start of a cycle
            let mut machine = new_machine(Policy::Observed, 1, 10_000);
            prop_assert!(machine.next(observed).is_err());
            prop_assert!(machine.next(completed).is_err());

            // Observing accepts only an observation
            let mut machine = new_machine(Policy::Observed, 1, 10_000);
            machine.next(cycle).unwrap();
            prop_assert!(machine.next(cycle).is_err());
            prop_assert!(machine.next(completed).is_err());
            prop_assert!(machine.next(expired).is_err());

            // Dispatching accepts only batch completion, the deadline is not
            // consulted mid-batch
            let mut machine = new_machine(Policy::Observed, 1, 10_000);
            machine.next(cycle).unwrap();
            machine.next(Event::Observed { live: 0 }).unwrap();
            prop_assert!(machine.next(cycle).is_err());
            prop_assert!(machine.next(expired).is_err());
            prop_assert!(machine.next(observed).is_err());
            prop_assert!(machine.next(completed).is_ok());

            // Finished accepts nothing
            let mut machine = new_machine(Policy::Observed, 1, 10_000);
            machine.next(expired).unwrap();
            prop_assert!(machine.next(cycle).is_err());
            prop_assert!(machine.next(expired).is_err());
            prop_assert!(machine.next(observed).is_err());
            prop_assert!(machine.next(completed).is_err());
        }

        #[test]
        fn refused_transition_keeps_state(live in 0u64..1_000) {
            let mut machine = new_machine(Policy::Observed, 1, 10);
            machine.next(Event::CycleStarted { deadline_passed: false }).unwrap();
            let before = *machine.state();
            let completed = machine.next(Event::BatchCompleted { submitted: 1 });
            prop_assert!(completed.is_err());
            prop_assert_eq!(machine.state(), &before);
            let observed = machine.next(Event::Observed { live });
            prop_assert!(observed.is_ok());
        }

        #[test]
        fn admission_matches_controller(live: u64, budget in 1u32..1_000, target: u64) {
            let mut machine = new_machine(Policy::Observed, budget, target);
            machine.next(Event::CycleStarted { deadline_passed: false }).unwrap();
            let op = machine.next(Event::Observed { live }).unwrap();
            let admitted = crate::admission::admit(live, budget, target);
            prop_assert_eq!(op == Operation::Dispatch, admitted);
        }
    }
}
