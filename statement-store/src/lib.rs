//! # Statement Store
//!
//! Backend-agnostic storage for the statements of a conversational agent,
//! with deterministic simulation testing.
//!
//! ## Features
//!
//! - **Upsert by text**: at most one stored statement per text when written through `update`
//! - **Composable queries**: immutable [`Query`](storage::Query) values, safe to share as a base scope
//! - **Response derivation**: statements known to be replies, computed by every backend
//! - **Uniform sampling**: `get_random` draws from the whole store
//! - **Deterministic Testing**: seeded in-memory backend with fault injection
//! - **Production Backends**: PostgreSQL (sqlx) and MongoDB
//!
//! ## Quick Start
//!
//! ```rust
//! use statement_store::storage::{OrderBy, Query, SimStatementAdapter, Statement, StatementAdapter};
//! use statement_store::dst::SimConfig;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SimStatementAdapter::new(SimConfig::with_seed(42));
//!
//! store.update(&Statement::new("Hi")).await?;
//! store.update(&Statement::builder("Hello").in_response_to("Hi").build()).await?;
//!
//! let replies = store.get_response_statements().await?;
//! assert_eq!(replies[0].text, "Hi");
//!
//! let newest = store.filter(&Query::new(), &OrderBy::parse(["created_at"])?).await?;
//! assert_eq!(newest.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │          StorageConfig::connect() -> Box<dyn ...>        │
//! ├─────────────────────────────────────────────────────────┤
//! │                  StatementAdapter trait                  │
//! ├──────────────────┬──────────────────┬───────────────────┤
//! │ SimStatement     │ PostgresStatement│ MongoStatement    │
//! │ (memory, DST)    │ (sqlx)           │ (mongodb driver)  │
//! ├──────────────────┴──────────────────┴───────────────────┤
//! │  Query / OrderBy          │ translated per backend      │
//! │  DST Framework            │ Fault injection + property  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL backend
//! - `mongodb` - MongoDB backend
//! - `all-backends` - Both

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod dst;
pub mod storage;
pub mod telemetry;

// Re-export common types
pub use config::{BackendKind, StorageConfig};
pub use dst::{
    DeterministicRng, FaultConfig, FaultInjector, FaultType, PropertyTest, PropertyTestable,
    SimClock, SimConfig,
};
pub use storage::{
    BatchReport, FieldValue, ItemFailure, OrderBy, Query, SimStatementAdapter, Statement,
    StatementAdapter, StatementId, StorageError, StorageResult,
};

#[cfg(feature = "postgres")]
pub use storage::PostgresStatementAdapter;

#[cfg(feature = "mongodb")]
pub use storage::MongoStatementAdapter;

pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryError};
