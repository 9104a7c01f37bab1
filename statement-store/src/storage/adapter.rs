//! Statement Adapter Trait
//!
//! `TigerStyle`: Abstract interface for statement storage.
//!
//! # Simulation-First
//!
//! The contract is exercised against `SimStatementAdapter` first. Postgres and
//! MongoDB bindings must satisfy the same trait contract without changing
//! caller-visible semantics.

use async_trait::async_trait;

use super::error::StorageResult;
use super::query::{OrderBy, Query};
use super::statement::Statement;

// =============================================================================
// Batch Reporting
// =============================================================================

/// One statement a batch write could not store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Text of the failed statement
    pub text: String,
    /// Engine error message
    pub message: String,
}

/// Outcome of a best-effort batch upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Statements stored (inserted or replaced)
    pub written: usize,
    /// Statements that failed, in input order
    pub failures: Vec<ItemFailure>,
}

impl BatchReport {
    /// Whether every item was written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Record a failed item and log it.
    pub fn record_failure(&mut self, text: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(text = %text, error = %message, "statement upsert failed");
        self.failures.push(ItemFailure {
            text: text.to_string(),
            message,
        });
    }
}

// =============================================================================
// StatementAdapter
// =============================================================================

/// Abstract storage adapter for statements.
///
/// `TigerStyle`: All operations are async and return explicit errors. An
/// adapter is ready for use once constructed; construction performs the
/// backend's idempotent initialization.
#[async_trait]
pub trait StatementAdapter: Send + Sync {
    /// Short backend name for logs ("memory", "postgres", "mongodb").
    fn backend_name(&self) -> &'static str;

    /// Total number of stored statements (ignores the base query).
    async fn count(&self) -> StorageResult<usize>;

    /// Insert unconditionally, without deduplication.
    ///
    /// Returns the statement with its backend id set and confidence zero.
    async fn create(&self, statement: &Statement) -> StorageResult<Statement>;

    /// Upsert a batch keyed by `text`.
    ///
    /// Best effort per item: failures are logged and listed in the report.
    /// Only backend-level failures (connectivity, malformed query) are
    /// returned as errors.
    async fn update_many(&self, statements: &[Statement]) -> StorageResult<BatchReport>;

    /// Upsert one statement keyed by `text`.
    ///
    /// A record with the same text has its fields replaced; otherwise a new
    /// record is inserted. An item failure is logged, not raised.
    async fn update(&self, statement: &Statement) -> StorageResult<Statement> {
        let report = self.update_many(std::slice::from_ref(statement)).await?;

        // Postcondition
        debug_assert_eq!(
            report.written + report.failures.len(),
            1,
            "one item in, one outcome out"
        );

        let mut stored = statement.clone();
        stored.confidence = 0.0;
        Ok(stored)
    }

    /// Statements matching the base query merged with `query`, sorted by `order_by`.
    async fn filter(&self, query: &Query, order_by: &OrderBy) -> StorageResult<Vec<Statement>>;

    /// Uniformly selected statement from the whole store.
    ///
    /// # Errors
    /// `StorageError::EmptyStorage` when nothing is stored.
    async fn get_random(&self) -> StorageResult<Statement>;

    /// Delete every statement whose text equals `text`. No-op when none do.
    async fn remove(&self, text: &str) -> StorageResult<()>;

    /// Statements known to be replies.
    ///
    /// Collects the distinct non-null `in_response_to` values, then returns
    /// the stored statements whose text is among them, within the base query.
    async fn get_response_statements(&self) -> StorageResult<Vec<Statement>>;

    /// Destroy every stored statement and reset backend state.
    ///
    /// The adapter remains usable afterwards.
    async fn drop_all(&self) -> StorageResult<()>;
}
