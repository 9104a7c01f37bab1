//! PostgresStatementAdapter - Relational Statement Storage
//!
//! `TigerStyle`: Real database storage behind the `StatementAdapter` contract.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  PostgresStatementAdapter                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pool: sqlx::PgPool (connection pooling, work_mem tuning)    │
//! │  Table: statements (id, text, in_response_to, created_at,   │
//! │         extra)                                               │
//! │  Index: btree on text, created_at DESC, in_response_to       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS statements (
//!     id BIGSERIAL PRIMARY KEY,
//!     text TEXT NOT NULL,
//!     in_response_to TEXT,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     extra JSONB NOT NULL DEFAULT '{}'
//! );
//! ```
//!
//! Upserts take a transaction-scoped advisory lock on the hashed text, so
//! concurrent upserts of one text serialize and converge on one row.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};

use super::adapter::{BatchReport, StatementAdapter};
use super::error::{StorageError, StorageResult};
use super::query::{Direction, FieldConstraint, OrderBy, Query};
use super::statement::{
    FieldValue, Statement, StatementId, StatementRecord, FIELD_IN_RESPONSE_TO, FIELD_TEXT,
};
use crate::constants::{
    COLLECTION_NAME_BYTES_MAX, COLLECTION_NAME_DEFAULT, POOL_CONNECTIONS_COUNT_DEFAULT,
    POOL_CONNECTIONS_COUNT_MAX, TUNING_SORT_BUFFER_BYTES,
};

const SELECT_COLUMNS: &str = "id, text, in_response_to, created_at, extra";

// =============================================================================
// PostgresStatementAdapter
// =============================================================================

/// PostgreSQL statement adapter.
///
/// `TigerStyle`: Connection pooling, explicit schema, proper error handling.
#[derive(Clone, Debug)]
pub struct PostgresStatementAdapter {
    pool: PgPool,
    table: String,
    base_query: Query,
}

impl PostgresStatementAdapter {
    /// Connect with the default table name and pool size.
    ///
    /// # Errors
    /// Returns error if connection fails or the schema cannot be created.
    ///
    /// # Example
    /// ```ignore
    /// let adapter = PostgresStatementAdapter::new("postgres://localhost/chatterbot-database").await?;
    /// ```
    pub async fn new(connection_string: &str) -> StorageResult<Self> {
        Self::connect(
            connection_string,
            COLLECTION_NAME_DEFAULT,
            POOL_CONNECTIONS_COUNT_DEFAULT,
        )
        .await
    }

    /// Connect, tune new connections, and create the schema if missing.
    ///
    /// # Errors
    /// Returns `Configuration` for a non-postgres URL or bad table name,
    /// `Connection` if the pool cannot connect.
    #[tracing::instrument(skip(connection_string))]
    pub async fn connect(
        connection_string: &str,
        table: &str,
        max_connections: u32,
    ) -> StorageResult<Self> {
        if !(connection_string.starts_with("postgres://")
            || connection_string.starts_with("postgresql://"))
        {
            return Err(StorageError::configuration(
                "connection string must be a postgres URL",
            ));
        }
        validate_table_name(table)?;
        // Precondition
        assert!(
            (1..=POOL_CONNECTIONS_COUNT_MAX).contains(&max_connections),
            "max_connections must be in 1..={POOL_CONNECTIONS_COUNT_MAX}"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    let directive = format!("SET work_mem = '{}kB'", TUNING_SORT_BUFFER_BYTES / 1024);
                    if let Err(e) = sqlx::query(&directive).execute(&mut *conn).await {
                        tracing::debug!(error = %e, "sort buffer tuning rejected");
                    }
                    Ok(())
                })
            })
            .connect(connection_string)
            .await
            .map_err(|e| StorageError::connection(format!("failed to connect: {e}")))?;

        Self::from_pool(pool, table).await
    }

    /// Create from an existing pool.
    ///
    /// # Errors
    /// Returns error for a bad table name or if the schema cannot be created.
    pub async fn from_pool(pool: PgPool, table: &str) -> StorageResult<Self> {
        validate_table_name(table)?;

        let adapter = Self {
            pool,
            table: table.to_string(),
            base_query: Query::new(),
        };
        adapter.init_schema().await?;

        tracing::info!(table = %adapter.table, "postgres statement adapter ready");
        Ok(adapter)
    }

    /// Scope every filter and response query with `base_query`.
    #[must_use]
    pub fn with_base_query(mut self, base_query: Query) -> Self {
        self.base_query = base_query;
        self
    }

    /// Get the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close all connections in the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create table and indexes. Idempotent.
    async fn init_schema(&self) -> StorageResult<()> {
        let table = &self.table;
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id BIGSERIAL PRIMARY KEY,
                    text TEXT NOT NULL,
                    in_response_to TEXT,
                    created_at TIMESTAMPTZ NOT NULL,
                    extra JSONB NOT NULL DEFAULT '{{}}'
                )"
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_text ON {table}(text)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_created ON {table}(created_at DESC)"),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_in_response_to ON {table}(in_response_to)"
            ),
        ];

        for statement in &statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::internal(format!("failed to create schema: {e}")))?;
        }

        Ok(())
    }

    async fn upsert_one(&self, record: &StatementRecord) -> Result<(), sqlx::Error> {
        let table = &self.table;
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&record.text)
            .execute(&mut *tx)
            .await?;

        let updated = sqlx::query(&format!(
            "UPDATE {table} SET in_response_to = $2, created_at = $3, extra = $4
             WHERE id = (SELECT id FROM {table} WHERE text = $1 ORDER BY id LIMIT 1)"
        ))
        .bind(&record.text)
        .bind(&record.in_response_to)
        .bind(record.created_at)
        .bind(Json(&record.extra))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            sqlx::query(&format!(
                "INSERT INTO {table} (text, in_response_to, created_at, extra)
                 VALUES ($1, $2, $3, $4)"
            ))
            .bind(&record.text)
            .bind(&record.in_response_to)
            .bind(record.created_at)
            .bind(Json(&record.extra))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    fn select(&self) -> QueryBuilder<'static, Postgres> {
        QueryBuilder::new(format!(
            "SELECT {SELECT_COLUMNS} FROM {} WHERE TRUE",
            self.table
        ))
    }

    async fn fetch_statements(
        &self,
        mut builder: QueryBuilder<'_, Postgres>,
    ) -> StorageResult<Vec<Statement>> {
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "read"))?;

        rows.iter().map(row_to_statement).collect()
    }
}

#[async_trait]
impl StatementAdapter for PostgresStatementAdapter {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    #[tracing::instrument(skip(self))]
    async fn count(&self) -> StorageResult<usize> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "read"))?;

        usize::try_from(count).map_err(|e| StorageError::internal(e.to_string()))
    }

    #[tracing::instrument(skip(self, statement), fields(text_len = statement.text.len()))]
    async fn create(&self, statement: &Statement) -> StorageResult<Statement> {
        statement.validate()?;
        let record = statement.to_record();

        let id: i64 = sqlx::query_scalar(&format!(
            "INSERT INTO {} (text, in_response_to, created_at, extra)
             VALUES ($1, $2, $3, $4) RETURNING id",
            self.table
        ))
        .bind(&record.text)
        .bind(&record.in_response_to)
        .bind(record.created_at)
        .bind(Json(&record.extra))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, "write"))?;

        Ok(Statement::from_record(
            Some(StatementId::new(id.to_string())),
            record,
        ))
    }

    #[tracing::instrument(skip(self, statements), fields(batch = statements.len()))]
    async fn update_many(&self, statements: &[Statement]) -> StorageResult<BatchReport> {
        let mut report = BatchReport::default();

        for statement in statements {
            if let Err(e) = statement.validate() {
                report.record_failure(&statement.text, e.to_string());
                continue;
            }
            match self.upsert_one(&statement.to_record()).await {
                Ok(()) => report.written += 1,
                Err(sqlx::Error::Database(e)) => {
                    report.record_failure(&statement.text, e.to_string());
                }
                Err(e) => return Err(map_sqlx_error(e, "write")),
            }
        }

        Ok(report)
    }

    #[tracing::instrument(skip(self, query, order_by), fields(constraints = query.len()))]
    async fn filter(&self, query: &Query, order_by: &OrderBy) -> StorageResult<Vec<Statement>> {
        query.validate()?;

        let mut builder = self.select();
        push_query(&mut builder, &self.base_query.merge(query));
        push_order(&mut builder, order_by);

        self.fetch_statements(builder).await
    }

    #[tracing::instrument(skip(self))]
    async fn get_random(&self) -> StorageResult<Statement> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM {} ORDER BY random() LIMIT 1",
            self.table
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, "read"))?;

        match row {
            Some(row) => row_to_statement(&row),
            None => Err(StorageError::EmptyStorage),
        }
    }

    #[tracing::instrument(skip(self, text), fields(text_len = text.len()))]
    async fn remove(&self, text: &str) -> StorageResult<()> {
        sqlx::query(&format!("DELETE FROM {} WHERE text = $1", self.table))
            .bind(text)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "write"))?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_response_statements(&self) -> StorageResult<Vec<Statement>> {
        let mut builder = self.select();
        builder.push(format!(
            " AND text IN (SELECT DISTINCT in_response_to FROM {} WHERE in_response_to IS NOT NULL)",
            self.table
        ));
        push_query(&mut builder, &self.base_query);
        push_order(&mut builder, &OrderBy::none());

        self.fetch_statements(builder).await
    }

    #[tracing::instrument(skip(self))]
    async fn drop_all(&self) -> StorageResult<()> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.table))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "write"))?;

        self.init_schema().await
    }
}

// =============================================================================
// Translation
// =============================================================================

/// Check a table name is a plain SQL identifier.
///
/// # Errors
/// Returns `Configuration` when it is not.
pub fn validate_table_name(name: &str) -> StorageResult<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && name.len() <= COLLECTION_NAME_BYTES_MAX {
        Ok(())
    } else {
        Err(StorageError::configuration(format!(
            "table name '{name}' must be an identifier of at most {COLLECTION_NAME_BYTES_MAX} bytes"
        )))
    }
}

fn push_query(builder: &mut QueryBuilder<'_, Postgres>, query: &Query) {
    for (field, constraint) in query.iter() {
        match field {
            FIELD_TEXT | FIELD_IN_RESPONSE_TO => push_column_constraint(builder, field, constraint),
            _ => push_extra_constraint(builder, field, constraint),
        }
    }
}

/// Constraint on a nullable TEXT column.
fn push_column_constraint(
    builder: &mut QueryBuilder<'_, Postgres>,
    column: &str,
    constraint: &FieldConstraint,
) {
    match &constraint.equals {
        Some(FieldValue::Null) => {
            builder.push(format!(" AND {column} IS NULL"));
        }
        Some(FieldValue::Text(value)) => {
            builder.push(format!(" AND {column} = "));
            builder.push_bind(value.clone());
        }
        // A text column never equals a number or boolean
        Some(_) => {
            builder.push(" AND FALSE");
        }
        None => {}
    }

    if constraint.not_in.contains(&FieldValue::Null) {
        builder.push(format!(" AND {column} IS NOT NULL"));
    }

    let excluded: Vec<String> = constraint
        .not_in
        .iter()
        .filter_map(|v| v.as_text().map(str::to_string))
        .collect();
    if !excluded.is_empty() {
        builder.push(format!(" AND ({column} IS NULL OR NOT ({column} = ANY("));
        builder.push_bind(excluded);
        builder.push(")))");
    }
}

/// Constraint on a key of the JSONB `extra` column. A missing key is null.
fn push_extra_constraint(
    builder: &mut QueryBuilder<'_, Postgres>,
    key: &str,
    constraint: &FieldConstraint,
) {
    if let Some(value) = &constraint.equals {
        builder.push(" AND COALESCE(extra -> ");
        builder.push_bind(key.to_string());
        builder.push(", 'null'::jsonb) = ");
        builder.push_bind(Json(value.to_json()));
    }
    for value in &constraint.not_in {
        builder.push(" AND COALESCE(extra -> ");
        builder.push_bind(key.to_string());
        builder.push(", 'null'::jsonb) <> ");
        builder.push_bind(Json(value.to_json()));
    }
}

/// Ordering clause; ties and unordered queries fall back to insertion order.
fn push_order(builder: &mut QueryBuilder<'_, Postgres>, order_by: &OrderBy) {
    builder.push(" ORDER BY ");
    for key in order_by.keys() {
        // Null and missing values rank lowest, as in `FieldValue::sort_cmp`
        let direction = match key.direction {
            Direction::Ascending => "ASC NULLS FIRST",
            Direction::Descending => "DESC NULLS LAST",
        };
        match key.field.as_str() {
            field @ (FIELD_TEXT | FIELD_IN_RESPONSE_TO) => {
                builder.push(format!("{field} {direction}, "));
            }
            _ if key.is_created_at() => {
                builder.push(format!("created_at {direction}, "));
            }
            field => {
                builder.push("extra -> ");
                builder.push_bind(field.to_string());
                builder.push(format!(" {direction}, "));
            }
        }
    }
    builder.push("id ASC");
}

fn map_sqlx_error(error: sqlx::Error, operation: &str) -> StorageError {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StorageError::connection(format!("{operation}: {error}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StorageError::serialization(error.to_string())
        }
        _ if operation == "write" => StorageError::write(error.to_string()),
        _ => StorageError::read(error.to_string()),
    }
}

/// Convert a database row to a Statement.
fn row_to_statement(row: &PgRow) -> StorageResult<Statement> {
    let id: i64 = row
        .try_get("id")
        .map_err(|e| StorageError::internal(e.to_string()))?;
    let text: String = row
        .try_get("text")
        .map_err(|e| StorageError::internal(e.to_string()))?;
    let in_response_to: Option<String> = row
        .try_get("in_response_to")
        .map_err(|e| StorageError::internal(e.to_string()))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| StorageError::internal(e.to_string()))?;
    let Json(extra): Json<BTreeMap<String, FieldValue>> = row
        .try_get("extra")
        .map_err(|e| StorageError::serialization(format!("failed to parse extra: {e}")))?;

    Ok(Statement::from_record(
        Some(StatementId::new(id.to_string())),
        StatementRecord {
            text,
            in_response_to,
            created_at,
            extra,
        },
    ))
}
