//! Storage - Statement Adapter Trait and Implementations
//!
//! `TigerStyle`: Abstract storage with simulation-first testing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  StatementAdapter Trait                      │
//! │   count · create · update · filter · get_random · remove    │
//! │          get_response_statements · drop_all                 │
//! └─────────────────────────────────────────────────────────────┘
//!          ↑                    ↑                    ↑
//!          │                    │                    │
//! ┌────────┴────────┐  ┌────────┴────────┐  ┌───────┴────────┐
//! │SimStatement     │  │PostgresStatement│  │MongoStatement  │
//! │Adapter (memory) │  │Adapter (sqlx)   │  │Adapter (driver)│
//! └─────────────────┘  └─────────────────┘  └────────────────┘
//! ```
//!
//! Callers build a [`Query`] and an [`OrderBy`]; each backend translates them
//! into its own query language. Statements come back with `confidence` reset.

mod adapter;
mod error;
mod query;
mod sim;
mod statement;

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "mongodb")]
mod mongo;

pub use adapter::{BatchReport, ItemFailure, StatementAdapter};
pub use error::{StorageError, StorageResult};
pub use query::{Direction, FieldConstraint, OrderBy, Query, SortKey};
pub use sim::SimStatementAdapter;
pub use statement::{
    FieldValue, Statement, StatementBuilder, StatementId, StatementRecord, FIELD_CREATED_AT,
    FIELD_IN_RESPONSE_TO, FIELD_TEXT,
};

#[cfg(feature = "postgres")]
pub use postgres::{validate_table_name, PostgresStatementAdapter};

#[cfg(feature = "mongodb")]
pub use mongo::MongoStatementAdapter;
