//! MongoStatementAdapter - Document Statement Storage
//!
//! `TigerStyle`: Real database storage behind the `StatementAdapter` contract.
//!
//! Statements live in one collection (default `statements`) of the database
//! named by the connection URI (default `chatterbot-database`). Each document
//! carries `text`, `in_response_to`, `created_at` and the caller's extra
//! fields at the top level; `_id` is the engine's object id.
//!
//! `create` must allow duplicate texts, so there is no unique index on
//! `text`. Same-text upserts are serialized per adapter (and its clones)
//! with striped locks instead.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, FindOptions, ReplaceOptions};
use mongodb::{Client, Collection, Database};
use tokio::sync::Mutex;

use super::adapter::{BatchReport, StatementAdapter};
use super::error::{StorageError, StorageResult};
use super::query::{Direction, OrderBy, Query};
use super::statement::{
    FieldValue, Statement, StatementId, StatementRecord, FIELD_CREATED_AT, FIELD_IN_RESPONSE_TO,
    FIELD_TEXT,
};
use crate::constants::{
    COLLECTION_NAME_BYTES_MAX, COLLECTION_NAME_DEFAULT, DATABASE_NAME_DEFAULT,
    STATEMENT_RESERVED_FIELDS, TUNING_SORT_BUFFER_BYTES, TUNING_TIMEOUT_MS,
};

const FIELD_OBJECT_ID: &str = "_id";

/// Lock stripes serializing same-text upserts issued through one client.
const UPSERT_LOCK_STRIPES_COUNT: usize = 64;

// =============================================================================
// MongoStatementAdapter
// =============================================================================

/// MongoDB statement adapter.
///
/// `TigerStyle`: Shared client (cheap to clone), explicit document mapping.
#[derive(Clone, Debug)]
pub struct MongoStatementAdapter {
    client: Client,
    database: Database,
    statements: Collection<Document>,
    base_query: Query,
    upsert_locks: Arc<Vec<Mutex<()>>>,
}

impl MongoStatementAdapter {
    /// Connect with the default collection name.
    ///
    /// # Errors
    /// Returns error if the URI is invalid.
    pub async fn new(uri: &str) -> StorageResult<Self> {
        Self::connect(uri, COLLECTION_NAME_DEFAULT).await
    }

    /// Connect and apply best-effort engine tuning.
    ///
    /// The driver connects lazily; unreachable servers surface on first use.
    /// The tuning command is the one exception: it may delay construction by
    /// up to `TUNING_TIMEOUT_MS` before it is abandoned.
    ///
    /// # Errors
    /// Returns `Configuration` for a bad URI or collection name.
    #[tracing::instrument(skip(uri))]
    pub async fn connect(uri: &str, collection: &str) -> StorageResult<Self> {
        if collection.is_empty() || collection.len() > COLLECTION_NAME_BYTES_MAX {
            return Err(StorageError::configuration(format!(
                "collection name must be 1..={COLLECTION_NAME_BYTES_MAX} bytes"
            )));
        }

        let options = ClientOptions::parse(uri)
            .await
            .map_err(|e| StorageError::configuration(format!("invalid mongodb uri: {e}")))?;
        let client = Client::with_options(options)
            .map_err(|e| StorageError::connection(format!("failed to create client: {e}")))?;

        let database = client
            .default_database()
            .unwrap_or_else(|| client.database(DATABASE_NAME_DEFAULT));
        let statements = database.collection::<Document>(collection);

        let adapter = Self {
            client,
            database,
            statements,
            base_query: Query::new(),
            upsert_locks: Arc::new(
                (0..UPSERT_LOCK_STRIPES_COUNT)
                    .map(|_| Mutex::new(()))
                    .collect(),
            ),
        };
        adapter.tune().await;

        tracing::info!(
            database = %adapter.database.name(),
            collection = %collection,
            "mongodb statement adapter ready"
        );
        Ok(adapter)
    }

    /// Scope every filter and response query with `base_query`.
    #[must_use]
    pub fn with_base_query(mut self, base_query: Query) -> Self {
        self.base_query = base_query;
        self
    }

    /// Get the database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Raise the blocking-sort memory limit. Rejection is expected on
    /// managed deployments and is only logged.
    async fn tune(&self) {
        let command = doc! {
            "setParameter": 1,
            "internalQueryExecMaxBlockingSortBytes": i64::try_from(TUNING_SORT_BUFFER_BYTES).unwrap_or(i64::MAX),
        };
        let admin = self.client.database("admin");
        let tuning = admin.run_command(command, None);

        match tokio::time::timeout(Duration::from_millis(TUNING_TIMEOUT_MS), tuning).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "sort buffer tuning rejected"),
            Err(_) => tracing::debug!(
                timeout_ms = TUNING_TIMEOUT_MS,
                "sort buffer tuning abandoned: server not reachable"
            ),
        }
    }

    fn upsert_lock(&self, text: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let stripe = (hasher.finish() % UPSERT_LOCK_STRIPES_COUNT as u64) as usize;
        &self.upsert_locks[stripe]
    }

    async fn find(&self, filter: Document, order_by: &OrderBy) -> StorageResult<Vec<Statement>> {
        let options = (!order_by.is_empty()).then(|| {
            FindOptions::builder()
                .sort(order_to_document(order_by))
                .build()
        });

        let documents: Vec<Document> = self
            .statements
            .find(filter, options)
            .await
            .map_err(|e| map_mongo_error(e, "read"))?
            .try_collect()
            .await
            .map_err(|e| map_mongo_error(e, "read"))?;

        documents.iter().map(document_to_statement).collect()
    }
}

#[async_trait]
impl StatementAdapter for MongoStatementAdapter {
    fn backend_name(&self) -> &'static str {
        "mongodb"
    }

    #[tracing::instrument(skip(self))]
    async fn count(&self) -> StorageResult<usize> {
        let count = self
            .statements
            .count_documents(None, None)
            .await
            .map_err(|e| map_mongo_error(e, "read"))?;

        usize::try_from(count).map_err(|e| StorageError::internal(e.to_string()))
    }

    #[tracing::instrument(skip(self, statement), fields(text_len = statement.text.len()))]
    async fn create(&self, statement: &Statement) -> StorageResult<Statement> {
        statement.validate()?;
        let record = statement.to_record();

        let result = self
            .statements
            .insert_one(record_to_document(&record), None)
            .await
            .map_err(|e| map_mongo_error(e, "write"))?;

        Ok(Statement::from_record(
            Some(bson_to_id(&result.inserted_id)),
            record,
        ))
    }

    #[tracing::instrument(skip(self, statements), fields(batch = statements.len()))]
    async fn update_many(&self, statements: &[Statement]) -> StorageResult<BatchReport> {
        let mut report = BatchReport::default();
        let options = ReplaceOptions::builder().upsert(true).build();

        for statement in statements {
            if let Err(e) = statement.validate() {
                report.record_failure(&statement.text, e.to_string());
                continue;
            }

            let _guard = self.upsert_lock(&statement.text).lock().await;
            let result = self
                .statements
                .replace_one(
                    doc! { FIELD_TEXT: statement.text.as_str() },
                    record_to_document(&statement.to_record()),
                    options.clone(),
                )
                .await;

            match result {
                Ok(_) => report.written += 1,
                Err(e) if matches!(*e.kind, ErrorKind::Write(_)) => {
                    report.record_failure(&statement.text, e.to_string());
                }
                Err(e) => return Err(map_mongo_error(e, "write")),
            }
        }

        Ok(report)
    }

    #[tracing::instrument(skip(self, query, order_by), fields(constraints = query.len()))]
    async fn filter(&self, query: &Query, order_by: &OrderBy) -> StorageResult<Vec<Statement>> {
        query.validate()?;

        self.find(query_to_document(&self.base_query.merge(query)), order_by)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn get_random(&self) -> StorageResult<Statement> {
        let mut cursor = self
            .statements
            .aggregate([doc! { "$sample": { "size": 1 } }], None)
            .await
            .map_err(|e| map_mongo_error(e, "read"))?;

        match cursor
            .try_next()
            .await
            .map_err(|e| map_mongo_error(e, "read"))?
        {
            Some(document) => document_to_statement(&document),
            None => Err(StorageError::EmptyStorage),
        }
    }

    #[tracing::instrument(skip(self, text), fields(text_len = text.len()))]
    async fn remove(&self, text: &str) -> StorageResult<()> {
        self.statements
            .delete_many(doc! { FIELD_TEXT: text }, None)
            .await
            .map_err(|e| map_mongo_error(e, "write"))?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_response_statements(&self) -> StorageResult<Vec<Statement>> {
        let replied_to: Vec<Bson> = self
            .statements
            .distinct(
                FIELD_IN_RESPONSE_TO,
                doc! { FIELD_IN_RESPONSE_TO: { "$ne": Bson::Null } },
                None,
            )
            .await
            .map_err(|e| map_mongo_error(e, "read"))?
            .into_iter()
            .filter(|value| matches!(value, Bson::String(_)))
            .collect();

        if replied_to.is_empty() {
            return Ok(Vec::new());
        }

        let filter = doc! {
            "$and": [
                { FIELD_TEXT: { "$in": replied_to } },
                query_to_document(&self.base_query),
            ]
        };
        self.find(filter, &OrderBy::none()).await
    }

    #[tracing::instrument(skip(self))]
    async fn drop_all(&self) -> StorageResult<()> {
        self.database
            .drop(None)
            .await
            .map_err(|e| map_mongo_error(e, "write"))
    }
}

// =============================================================================
// Translation
// =============================================================================

fn field_to_bson(value: &FieldValue) -> Bson {
    match value {
        FieldValue::Null => Bson::Null,
        FieldValue::Bool(b) => Bson::Boolean(*b),
        FieldValue::Int(i) => Bson::Int64(*i),
        FieldValue::Float(f) => Bson::Double(*f),
        FieldValue::Text(s) => Bson::String(s.clone()),
    }
}

fn bson_to_field(key: &str, value: &Bson) -> StorageResult<FieldValue> {
    match value {
        Bson::Null | Bson::Undefined => Ok(FieldValue::Null),
        Bson::Boolean(b) => Ok(FieldValue::Bool(*b)),
        Bson::Int32(i) => Ok(FieldValue::Int(i64::from(*i))),
        Bson::Int64(i) => Ok(FieldValue::Int(*i)),
        Bson::Double(f) => Ok(FieldValue::Float(*f)),
        Bson::String(s) => Ok(FieldValue::Text(s.clone())),
        other => Err(StorageError::serialization(format!(
            "field '{key}' has unsupported type {:?}",
            other.element_type()
        ))),
    }
}

fn bson_to_id(value: &Bson) -> StatementId {
    match value {
        Bson::ObjectId(oid) => StatementId::new(oid.to_hex()),
        Bson::String(s) => StatementId::new(s.clone()),
        other => StatementId::new(other.to_string()),
    }
}

fn record_to_document(record: &StatementRecord) -> Document {
    let mut document = Document::new();
    document.insert(FIELD_TEXT, record.text.clone());
    document.insert(
        FIELD_IN_RESPONSE_TO,
        record
            .in_response_to
            .clone()
            .map_or(Bson::Null, Bson::String),
    );
    document.insert(
        FIELD_CREATED_AT,
        BsonDateTime::from_millis(record.created_at.timestamp_millis()),
    );
    for (key, value) in &record.extra {
        document.insert(key.clone(), field_to_bson(value));
    }
    document
}

fn document_to_statement(document: &Document) -> StorageResult<Statement> {
    let id = document.get(FIELD_OBJECT_ID).map(bson_to_id);
    let text = document
        .get_str(FIELD_TEXT)
        .map_err(|e| StorageError::serialization(format!("text: {e}")))?
        .to_string();
    let in_response_to = match document.get(FIELD_IN_RESPONSE_TO) {
        None | Some(Bson::Null) => None,
        Some(Bson::String(s)) => Some(s.clone()),
        Some(other) => {
            return Err(StorageError::serialization(format!(
                "in_response_to has unsupported type {:?}",
                other.element_type()
            )))
        }
    };
    let created_at = document
        .get_datetime(FIELD_CREATED_AT)
        .map_err(|e| StorageError::serialization(format!("created_at: {e}")))
        .and_then(|dt| {
            DateTime::from_timestamp_millis(dt.timestamp_millis())
                .ok_or_else(|| StorageError::serialization("created_at out of range"))
        })?;

    let mut extra = BTreeMap::new();
    for (key, value) in document {
        if key == FIELD_OBJECT_ID || STATEMENT_RESERVED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        extra.insert(key.clone(), bson_to_field(key, value)?);
    }

    Ok(Statement::from_record(
        id,
        StatementRecord {
            text,
            in_response_to,
            created_at,
            extra,
        },
    ))
}

/// Filter document for a query. An empty query matches everything.
fn query_to_document(query: &Query) -> Document {
    let mut filter = Document::new();
    for (field, constraint) in query.iter() {
        let equals = constraint.equals.as_ref().map(field_to_bson);
        if constraint.not_in.is_empty() {
            if let Some(value) = equals {
                filter.insert(field, value);
            }
            continue;
        }

        let mut condition = Document::new();
        if let Some(value) = equals {
            condition.insert("$eq", value);
        }
        condition.insert(
            "$nin",
            constraint.not_in.iter().map(field_to_bson).collect::<Vec<_>>(),
        );
        filter.insert(field, condition);
    }
    filter
}

/// Sort document; ties fall back to `_id` (insertion order).
fn order_to_document(order_by: &OrderBy) -> Document {
    let mut sort = Document::new();
    for key in order_by.keys() {
        let direction = match key.direction {
            Direction::Ascending => 1,
            Direction::Descending => -1,
        };
        sort.insert(key.field.clone(), direction);
    }
    sort.insert(FIELD_OBJECT_ID, 1);
    sort
}

fn map_mongo_error(error: mongodb::error::Error, operation: &str) -> StorageError {
    match *error.kind {
        ErrorKind::Io(_)
        | ErrorKind::ServerSelection { .. }
        | ErrorKind::ConnectionPoolCleared { .. }
        | ErrorKind::DnsResolve { .. } => StorageError::connection(format!("{operation}: {error}")),
        ErrorKind::BsonDeserialization(_) | ErrorKind::BsonSerialization(_) => {
            StorageError::serialization(error.to_string())
        }
        _ if operation == "write" => StorageError::write(error.to_string()),
        _ => StorageError::read(error.to_string()),
    }
}
