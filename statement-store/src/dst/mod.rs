//! DST - Deterministic Simulation Testing
//!
//! TigerBeetle/FoundationDB-style deterministic simulation testing support
//! for the in-memory statement store.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use statement_store::dst::{DeterministicRng, FaultConfig, FaultInjectorBuilder, FaultType, SimConfig};
//! use statement_store::storage::SimStatementAdapter;
//!
//! let config = SimConfig::with_seed(42);
//! let faults = FaultInjectorBuilder::new(DeterministicRng::new(config.seed()))
//!     .with_fault(FaultConfig::new(FaultType::StorageWriteFail, 0.1).with_filter("upsert"))
//!     .build();
//! let adapter = SimStatementAdapter::with_fault_injector(config, Arc::new(faults));
//! # let _ = adapter;
//! ```
//!
//! Run with explicit seed for reproducibility:
//! ```bash
//! DST_SEED=12345 cargo test
//! ```

mod clock;
mod config;
mod fault;
mod property;
mod rng;

pub use clock::SimClock;
pub use config::{SimConfig, DST_SEED_ENV};
pub use fault::{FaultConfig, FaultInjector, FaultInjectorBuilder, FaultType};
pub use property::{
    PropertyTest, PropertyTestFailure, PropertyTestResult, PropertyTestable, TimeAdvanceConfig,
};
pub use rng::DeterministicRng;
