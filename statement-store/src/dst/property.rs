//! Property-Based Testing for DST
//!
//! TigerStyle: Random operation sequences with invariant checking.
//!
//! Property tests generate operations from a seeded RNG, apply them to a
//! system under test and check invariants after every step. A failing run
//! reports the seed and the offending operation so it can be replayed.
//!
//! # Example
//!
//! ```rust
//! use statement_store::dst::{DeterministicRng, PropertyTest, PropertyTestable, SimClock};
//!
//! struct Counter { value: i64 }
//!
//! #[derive(Debug, Clone)]
//! enum CounterOp { Increment, Reset }
//!
//! impl PropertyTestable for Counter {
//!     type Operation = CounterOp;
//!
//!     fn generate_operation(&self, rng: &mut DeterministicRng) -> CounterOp {
//!         if rng.next_bool(0.9) { CounterOp::Increment } else { CounterOp::Reset }
//!     }
//!
//!     fn apply_operation(&mut self, op: &CounterOp, _clock: &SimClock) {
//!         match op {
//!             CounterOp::Increment => self.value += 1,
//!             CounterOp::Reset => self.value = 0,
//!         }
//!     }
//!
//!     fn check_invariants(&self) -> Result<(), String> {
//!         if self.value < 0 { Err(format!("negative: {}", self.value)) } else { Ok(()) }
//!     }
//! }
//!
//! PropertyTest::new(42).with_max_operations(500).run_and_assert(Counter { value: 0 });
//! ```

use std::fmt::Debug;

use super::clock::SimClock;
use super::rng::DeterministicRng;
use crate::constants::DST_SIMULATION_STEPS_MAX;

/// Trait for systems that can be property-tested.
pub trait PropertyTestable {
    /// The type of operations that can be performed.
    type Operation: Debug + Clone;

    /// Generate a random operation based on current state.
    fn generate_operation(&self, rng: &mut DeterministicRng) -> Self::Operation;

    /// Apply an operation to the state.
    fn apply_operation(&mut self, op: &Self::Operation, clock: &SimClock);

    /// Check that all invariants hold.
    ///
    /// # Errors
    /// Returns a description of the first violated invariant.
    fn check_invariants(&self) -> Result<(), String>;

    /// Describe the current state for failure reports.
    fn describe_state(&self) -> String {
        String::from("(state description not implemented)")
    }
}

/// Result of a property test run.
#[derive(Debug)]
pub struct PropertyTestResult {
    /// Number of operations executed
    pub operations_executed: u64,
    /// Seed used for reproduction
    pub seed: u64,
    /// Failure details, if any
    pub failure: Option<PropertyTestFailure>,
}

impl PropertyTestResult {
    /// Check if the test passed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Unwrap the result, panicking with details if failed.
    ///
    /// # Panics
    /// Panics if the test failed, with reproduction info.
    pub fn unwrap(self) {
        if let Some(failure) = self.failure {
            panic!(
                "Property test failed!\n\
                 Seed: {} (use this to reproduce)\n\
                 Operation #{}: {}\n\
                 Invariant violation: {}\n\
                 State: {}",
                self.seed,
                failure.operation_index,
                failure.operation,
                failure.message,
                failure.state_description
            );
        }
    }
}

/// Details of a property test failure.
#[derive(Debug)]
pub struct PropertyTestFailure {
    /// Index of the failing operation (0-based)
    pub operation_index: u64,
    /// The operation that caused the failure
    pub operation: String,
    /// The invariant violation message
    pub message: String,
    /// Description of the state at failure
    pub state_description: String,
}

/// Configuration for time advancement during property tests.
#[derive(Debug, Clone)]
pub struct TimeAdvanceConfig {
    /// Minimum time to advance per operation (ms)
    pub min_ms: u64,
    /// Maximum time to advance per operation (ms)
    pub max_ms: u64,
    /// Probability of advancing time (0.0 to 1.0)
    pub probability: f64,
}

impl Default for TimeAdvanceConfig {
    fn default() -> Self {
        Self {
            min_ms: 0,
            max_ms: 1000,
            probability: 0.5,
        }
    }
}

impl TimeAdvanceConfig {
    /// No time advancement.
    #[must_use]
    pub fn none() -> Self {
        Self {
            min_ms: 0,
            max_ms: 0,
            probability: 0.0,
        }
    }

    /// Always advance by a fixed amount.
    #[must_use]
    pub fn fixed(ms: u64) -> Self {
        Self {
            min_ms: ms,
            max_ms: ms,
            probability: 1.0,
        }
    }
}

/// Property-based test runner.
#[derive(Debug)]
pub struct PropertyTest {
    seed: u64,
    max_operations: u64,
    time_config: TimeAdvanceConfig,
}

impl PropertyTest {
    /// Create a new property test with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_operations: 100,
            time_config: TimeAdvanceConfig::default(),
        }
    }

    /// Set the maximum number of operations to run.
    ///
    /// # Panics
    /// Panics if max exceeds `DST_SIMULATION_STEPS_MAX`.
    #[must_use]
    pub fn with_max_operations(mut self, max: u64) -> Self {
        assert!(
            max <= DST_SIMULATION_STEPS_MAX,
            "max_operations {max} exceeds DST_SIMULATION_STEPS_MAX {DST_SIMULATION_STEPS_MAX}"
        );
        self.max_operations = max;
        self
    }

    /// Configure time advancement between operations.
    #[must_use]
    pub fn with_time_advance(mut self, config: TimeAdvanceConfig) -> Self {
        self.time_config = config;
        self
    }

    /// Run the property test.
    #[must_use]
    pub fn run<T: PropertyTestable>(self, mut state: T) -> PropertyTestResult {
        let mut rng = DeterministicRng::new(self.seed);
        let clock = SimClock::new();

        if let Err(msg) = state.check_invariants() {
            return self.failed(0, 0, "(initial state)".to_string(), msg, &state);
        }

        for i in 0..self.max_operations {
            if self.time_config.probability > 0.0 && rng.next_bool(self.time_config.probability) {
                let advance = if self.time_config.min_ms == self.time_config.max_ms {
                    self.time_config.min_ms
                } else {
                    rng.next_u64() % (self.time_config.max_ms - self.time_config.min_ms + 1)
                        + self.time_config.min_ms
                };
                clock.advance_ms(advance);
            }

            let op = state.generate_operation(&mut rng);
            state.apply_operation(&op, &clock);

            if let Err(msg) = state.check_invariants() {
                return self.failed(i + 1, i, format!("{op:?}"), msg, &state);
            }
        }

        PropertyTestResult {
            operations_executed: self.max_operations,
            seed: self.seed,
            failure: None,
        }
    }

    /// Run the property test, panicking on failure.
    ///
    /// # Panics
    /// Panics if any invariant is violated.
    pub fn run_and_assert<T: PropertyTestable>(self, state: T) {
        self.run(state).unwrap();
    }

    fn failed<T: PropertyTestable>(
        &self,
        executed: u64,
        index: u64,
        operation: String,
        message: String,
        state: &T,
    ) -> PropertyTestResult {
        PropertyTestResult {
            operations_executed: executed,
            seed: self.seed,
            failure: Some(PropertyTestFailure {
                operation_index: index,
                operation,
                message,
                state_description: state.describe_state(),
            }),
        }
    }
}
