//! `SimStatementAdapter` - In-Memory Statement Storage
//!
//! `TigerStyle`: Deterministic testing with fault injection.
//!
//! # Simulation-First
//!
//! This adapter is the reference implementation of the `StatementAdapter`
//! contract:
//! 1. Contract tests run against it first
//! 2. Real bindings must match its observable behavior
//! 3. DST integration enables fault injection
//!
//! Fault injector operation names: `count`, `create`, `update` (whole batch),
//! `upsert_item` (one batch item), `filter`, `random`, `remove`, `responses`,
//! `drop`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::dst::{DeterministicRng, FaultConfig, FaultInjector, SimClock, SimConfig};

use super::adapter::{BatchReport, StatementAdapter};
use super::error::{StorageError, StorageResult};
use super::query::{OrderBy, Query};
use super::statement::{Statement, StatementId, StatementRecord};

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone)]
struct StoredRecord {
    id: u64,
    record: StatementRecord,
}

impl StoredRecord {
    fn to_statement(&self) -> Statement {
        Statement::from_record(
            Some(StatementId::new(self.id.to_string())),
            self.record.clone(),
        )
    }
}

#[derive(Debug, Default)]
struct SimState {
    /// Records in insertion order
    records: Vec<StoredRecord>,
    /// Last assigned id (ids start at 1)
    last_id: u64,
}

impl SimState {
    fn insert(&mut self, record: StatementRecord) -> u64 {
        self.last_id += 1;
        let id = self.last_id;
        self.records.push(StoredRecord { id, record });
        id
    }

    /// Replace the first record with the same text, or insert.
    fn upsert(&mut self, record: StatementRecord) -> u64 {
        match self.records.iter_mut().find(|r| r.record.text == record.text) {
            Some(existing) => {
                existing.record = record;
                existing.id
            }
            None => self.insert(record),
        }
    }
}

// =============================================================================
// SimStatementAdapter
// =============================================================================

/// In-memory statement adapter for testing.
///
/// `TigerStyle`:
/// - Deterministic via `SimClock` and `DeterministicRng`
/// - Fault injection via `FaultInjector`
/// - Thread-safe with `RwLock`
#[derive(Debug, Clone)]
pub struct SimStatementAdapter {
    state: Arc<RwLock<SimState>>,
    fault_injector: Arc<FaultInjector>,
    clock: SimClock,
    /// Drives `get_random`
    rng: Arc<Mutex<DeterministicRng>>,
    /// Scope merged into every filter and response query
    base_query: Query,
}

impl SimStatementAdapter {
    /// Create a new adapter with the given config.
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        let mut rng = DeterministicRng::new(config.seed());
        let fault_rng = rng.fork();

        Self::build(rng, Arc::new(FaultInjector::new(fault_rng)))
    }

    /// Create a new adapter sharing an external fault injector.
    ///
    /// Several adapters (or a test harness) can then draw faults from one
    /// deterministic source and inspect one set of statistics.
    #[must_use]
    pub fn with_fault_injector(config: SimConfig, fault_injector: Arc<FaultInjector>) -> Self {
        Self::build(DeterministicRng::new(config.seed()), fault_injector)
    }

    fn build(rng: DeterministicRng, fault_injector: Arc<FaultInjector>) -> Self {
        tracing::debug!(seed = rng.seed(), "sim statement adapter ready");

        Self {
            state: Arc::new(RwLock::new(SimState::default())),
            fault_injector,
            clock: SimClock::new(),
            rng: Arc::new(Mutex::new(rng)),
            base_query: Query::new(),
        }
    }

    /// Add fault configuration.
    ///
    /// # Panics
    /// Panics if the fault injector is already shared.
    #[must_use]
    pub fn with_faults(mut self, config: FaultConfig) -> Self {
        Arc::get_mut(&mut self.fault_injector)
            .expect("cannot add faults after adapter is shared")
            .register(config);
        self
    }

    /// Scope every filter and response query with `base_query`.
    #[must_use]
    pub fn with_base_query(mut self, base_query: Query) -> Self {
        self.base_query = base_query;
        self
    }

    /// Get the base scope query.
    #[must_use]
    pub fn base_query(&self) -> &Query {
        &self.base_query
    }

    /// Get the simulated clock.
    #[must_use]
    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Get fault injector for inspection.
    #[must_use]
    pub fn fault_injector(&self) -> &Arc<FaultInjector> {
        &self.fault_injector
    }

    /// Number of stored records, bypassing fault injection.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.read_state().records.len()
    }

    /// Build a statement stamped with the simulated clock, advanced by 1ms.
    #[must_use]
    pub fn stamped(&self, text: impl Into<String>) -> Statement {
        Statement::builder(text).created_at(self.clock.tick(1)).build()
    }

    fn maybe_inject_fault(&self, operation: &str) -> StorageResult<()> {
        match self.fault_injector.should_inject(operation) {
            Some(fault_type) => {
                let message = format!("simulated {fault_type} during {operation}");
                if fault_type.is_connectivity() {
                    Err(StorageError::connection(message))
                } else {
                    Err(StorageError::query(message))
                }
            }
            None => Ok(()),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SimState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SimState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StatementAdapter for SimStatementAdapter {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    #[tracing::instrument(skip(self))]
    async fn count(&self) -> StorageResult<usize> {
        self.maybe_inject_fault("count")?;

        Ok(self.read_state().records.len())
    }

    #[tracing::instrument(skip(self, statement), fields(text_len = statement.text.len()))]
    async fn create(&self, statement: &Statement) -> StorageResult<Statement> {
        statement.validate()?;
        self.maybe_inject_fault("create")?;

        let record = statement.to_record();
        let id = self.write_state().insert(record.clone());

        Ok(Statement::from_record(
            Some(StatementId::new(id.to_string())),
            record,
        ))
    }

    #[tracing::instrument(skip(self, statements), fields(batch = statements.len()))]
    async fn update_many(&self, statements: &[Statement]) -> StorageResult<BatchReport> {
        self.maybe_inject_fault("update")?;

        let mut report = BatchReport::default();
        let mut state = self.write_state();

        for statement in statements {
            if let Err(e) = statement.validate() {
                report.record_failure(&statement.text, e.to_string());
                continue;
            }
            if let Err(e) = self.maybe_inject_fault("upsert_item") {
                report.record_failure(&statement.text, e.to_string());
                continue;
            }
            state.upsert(statement.to_record());
            report.written += 1;
        }

        // Postcondition
        assert_eq!(
            report.written + report.failures.len(),
            statements.len(),
            "every item must be accounted for"
        );

        Ok(report)
    }

    #[tracing::instrument(skip(self, query, order_by), fields(constraints = query.len()))]
    async fn filter(&self, query: &Query, order_by: &OrderBy) -> StorageResult<Vec<Statement>> {
        query.validate()?;
        self.maybe_inject_fault("filter")?;

        let query = self.base_query.merge(query);
        let mut results: Vec<Statement> = self
            .read_state()
            .records
            .iter()
            .map(StoredRecord::to_statement)
            .filter(|s| query.matches(s))
            .collect();

        if !order_by.is_empty() {
            // Stable: ties keep insertion order
            results.sort_by(|a, b| order_by.compare(a, b));
        }

        Ok(results)
    }

    #[tracing::instrument(skip(self))]
    async fn get_random(&self) -> StorageResult<Statement> {
        self.maybe_inject_fault("random")?;

        let state = self.read_state();
        if state.records.is_empty() {
            return Err(StorageError::EmptyStorage);
        }

        let index = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_index(state.records.len());

        Ok(state.records[index].to_statement())
    }

    #[tracing::instrument(skip(self, text), fields(text_len = text.len()))]
    async fn remove(&self, text: &str) -> StorageResult<()> {
        self.maybe_inject_fault("remove")?;

        self.write_state().records.retain(|r| r.record.text != text);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_response_statements(&self) -> StorageResult<Vec<Statement>> {
        self.maybe_inject_fault("responses")?;

        let state = self.read_state();
        let replied_to: HashSet<&str> = state
            .records
            .iter()
            .filter_map(|r| r.record.in_response_to.as_deref())
            .collect();

        Ok(state
            .records
            .iter()
            .filter(|r| replied_to.contains(r.record.text.as_str()))
            .map(StoredRecord::to_statement)
            .filter(|s| self.base_query.matches(s))
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn drop_all(&self) -> StorageResult<()> {
        self.maybe_inject_fault("drop")?;

        *self.write_state() = SimState::default();
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FieldValue;

    fn adapter() -> SimStatementAdapter {
        SimStatementAdapter::new(SimConfig::with_seed(42))
    }

    // =========================================================================
    // Basic CRUD Tests
    // =========================================================================

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let adapter = adapter();

        let first = adapter.create(&Statement::new("Hi")).await.unwrap();
        let second = adapter.create(&Statement::new("Hi")).await.unwrap();

        assert_eq!(first.id, Some(StatementId::new("1")));
        assert_eq!(second.id, Some(StatementId::new("2")));
        // create does not deduplicate
        assert_eq!(adapter.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_create_resets_confidence() {
        let adapter = adapter();

        let created = adapter
            .create(&Statement::builder("Hi").confidence(0.8).build())
            .await
            .unwrap();

        assert!(created.confidence.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_update_inserts_then_replaces() {
        let adapter = adapter();

        adapter
            .update(&Statement::builder("Fine").in_response_to("How are you?").build())
            .await
            .unwrap();
        adapter
            .update(&Statement::builder("Fine").in_response_to("How is it going?").build())
            .await
            .unwrap();

        let stored = adapter
            .filter(&Query::new().text_equals("Fine"), &OrderBy::none())
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].in_response_to.as_deref(), Some("How is it going?"));
        assert_eq!(stored[0].id, Some(StatementId::new("1")));
    }

    #[tokio::test]
    async fn test_update_after_create_duplicates_touches_first() {
        let adapter = adapter();
        adapter.create(&Statement::new("Dup")).await.unwrap();
        adapter.create(&Statement::new("Dup")).await.unwrap();

        adapter
            .update(&Statement::builder("Dup").extra("tag", "new").build())
            .await
            .unwrap();

        let stored = adapter
            .filter(&Query::new().text_equals("Dup"), &OrderBy::none())
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].get_extra("tag"), Some(&FieldValue::from("new")));
        assert_eq!(stored[1].get_extra("tag"), None);
    }

    #[tokio::test]
    async fn test_update_many_reports_invalid_items() {
        let adapter = adapter();
        let batch = vec![
            Statement::new("ok"),
            Statement::builder("bad").extra("text", "shadow").build(),
            Statement::new("also ok"),
        ];

        let report = adapter.update_many(&batch).await.unwrap();

        assert_eq!(report.written, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].text, "bad");
        assert_eq!(adapter.statement_count(), 2);
    }

    #[tokio::test]
    async fn test_filter_insertion_order_without_ordering() {
        let adapter = adapter();
        for text in ["c", "a", "b"] {
            adapter.create(&Statement::new(text)).await.unwrap();
        }

        let all = adapter.filter(&Query::new(), &OrderBy::none()).await.unwrap();

        let texts: Vec<&str> = all.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_filter_newest_first() {
        let adapter = adapter();
        for text in ["old", "middle", "new"] {
            adapter.create(&adapter.stamped(text)).await.unwrap();
        }

        let order = OrderBy::parse(["created_at"]).unwrap();
        let all = adapter.filter(&Query::new(), &order).await.unwrap();

        let texts: Vec<&str> = all.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["new", "middle", "old"]);
    }

    #[tokio::test]
    async fn test_filter_rejects_created_at_constraint() {
        let adapter = adapter();

        let result = adapter
            .filter(&Query::new().raw([("created_at", "now")]), &OrderBy::none())
            .await;

        assert!(matches!(result, Err(StorageError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_get_random_empty() {
        let adapter = adapter();

        let result = adapter.get_random().await;

        assert!(matches!(result, Err(StorageError::EmptyStorage)));
    }

    #[tokio::test]
    async fn test_get_random_is_deterministic_per_seed() {
        let a = SimStatementAdapter::new(SimConfig::with_seed(7));
        let b = SimStatementAdapter::new(SimConfig::with_seed(7));
        for adapter in [&a, &b] {
            for i in 0..10 {
                adapter.create(&Statement::new(format!("s{i}"))).await.unwrap();
            }
        }

        for _ in 0..20 {
            assert_eq!(
                a.get_random().await.unwrap().text,
                b.get_random().await.unwrap().text
            );
        }
    }

    #[tokio::test]
    async fn test_remove_all_matches_and_unknown_is_noop() {
        let adapter = adapter();
        adapter.create(&Statement::new("Hi")).await.unwrap();
        adapter.create(&Statement::new("Hi")).await.unwrap();
        adapter.create(&Statement::new("Hello")).await.unwrap();

        adapter.remove("Hi").await.unwrap();
        adapter.remove("never stored").await.unwrap();

        assert_eq!(adapter.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_response_statements() {
        let adapter = adapter();
        adapter.update(&Statement::new("Hi")).await.unwrap();
        adapter
            .update(&Statement::builder("Hello").in_response_to("Hi").build())
            .await
            .unwrap();
        adapter
            .update(&Statement::builder("How are you?").in_response_to("Hello").build())
            .await
            .unwrap();

        let responses = adapter.get_response_statements().await.unwrap();

        let texts: Vec<&str> = responses.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Hi", "Hello"]);
    }

    #[tokio::test]
    async fn test_base_query_scopes_filter_and_responses() {
        let adapter = adapter().with_base_query(Query::new().raw([("persona", "support")]));
        adapter
            .update(&Statement::builder("Hi").extra("persona", "support").build())
            .await
            .unwrap();
        adapter
            .update(
                &Statement::builder("Hello")
                    .in_response_to("Hi")
                    .extra("persona", "sales")
                    .build(),
            )
            .await
            .unwrap();

        let scoped = adapter.filter(&Query::new(), &OrderBy::none()).await.unwrap();
        let responses = adapter.get_response_statements().await.unwrap();

        assert_eq!(scoped.len(), 1);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].text, "Hi");
        // count is unscoped
        assert_eq!(adapter.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_drop_resets_ids() {
        let adapter = adapter();
        adapter.create(&Statement::new("Hi")).await.unwrap();

        adapter.drop_all().await.unwrap();
        let created = adapter.create(&Statement::new("Again")).await.unwrap();

        assert_eq!(adapter.count().await.unwrap(), 1);
        assert_eq!(created.id, Some(StatementId::new("1")));
    }
}

// =============================================================================
// DST Tests
// =============================================================================


// =============================================================================
// Property-Based Tests
// =============================================================================
