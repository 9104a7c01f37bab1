//! Statement - One stored utterance with optional reply linkage
//!
//! `TigerStyle`: Explicit types, validation, builder pattern.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};
use crate::constants::{
    STATEMENT_EXTRA_FIELDS_COUNT_MAX, STATEMENT_EXTRA_KEY_BYTES_MAX, STATEMENT_RESERVED_FIELDS,
    STATEMENT_TEXT_BYTES_MAX,
};

/// Name of the text field.
pub const FIELD_TEXT: &str = "text";
/// Name of the reply-linkage field.
pub const FIELD_IN_RESPONSE_TO: &str = "in_response_to";
/// Name of the creation timestamp field.
pub const FIELD_CREATED_AT: &str = "created_at";

// =============================================================================
// StatementId
// =============================================================================

/// Backend-assigned identity of a stored statement.
///
/// Opaque to callers: an object id for the document store, a row id for the
/// relational store, a counter for the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatementId(String);

impl StatementId {
    /// Wrap a backend identity.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identity as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// FieldValue
// =============================================================================

/// Value of a caller-supplied field, or of a known field inside a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Absent / null
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// String
    Text(String),
}

impl FieldValue {
    /// Borrow the string content, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Check for null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert to a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Convert from a JSON value. Arrays and objects are not field values.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    /// Equality as the database engines see it: integers and floats
    /// compare numerically, so `Int(1)` matches `Float(1.0)`.
    #[must_use]
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                self.sort_cmp(other) == std::cmp::Ordering::Equal
            }
            _ => self == other,
        }
    }

    /// Total order used when sorting by this value.
    ///
    /// Null sorts first, then booleans, numbers, text. Integers and floats
    /// compare numerically.
    #[must_use]
    pub fn sort_cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;

        fn rank(v: &FieldValue) -> u8 {
            match v {
                FieldValue::Null => 0,
                FieldValue::Bool(_) => 1,
                FieldValue::Int(_) | FieldValue::Float(_) => 2,
                FieldValue::Text(_) => 3,
            }
        }

        #[allow(clippy::cast_precision_loss)]
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).total_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.total_cmp(&(*b as f64)),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)).then(Ordering::Equal),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// =============================================================================
// StatementRecord
// =============================================================================

/// The persisted shape of a statement.
///
/// Everything a backend writes. There is deliberately no `confidence` and no
/// `id` here: confidence is never stored and ids are assigned by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementRecord {
    /// Utterance text
    pub text: String,
    /// Text of the statement this one replies to
    pub in_response_to: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Caller-supplied fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, FieldValue>,
}

// =============================================================================
// Statement
// =============================================================================

/// One utterance.
///
/// Equality is defined by `text`, the logical key used for upserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    /// Backend-assigned identity (None until stored)
    pub id: Option<StatementId>,
    /// Utterance text
    pub text: String,
    /// Text of the statement this one replies to
    pub in_response_to: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Caller-supplied fields
    pub extra: BTreeMap<String, FieldValue>,
    /// Match confidence set by response selection; never persisted
    #[serde(skip)]
    pub confidence: f64,
}

impl Statement {
    /// Create a statement with the given text, stamped now.
    ///
    /// Size limits are checked by [`Statement::validate`] when the statement
    /// is written.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            in_response_to: None,
            created_at: Utc::now(),
            extra: BTreeMap::new(),
            confidence: 0.0,
        }
    }

    /// Create a builder for more complex construction.
    #[must_use]
    pub fn builder(text: impl Into<String>) -> StatementBuilder {
        StatementBuilder::new(text)
    }

    /// Serialize to the persisted shape (confidence excluded).
    #[must_use]
    pub fn to_record(&self) -> StatementRecord {
        StatementRecord {
            text: self.text.clone(),
            in_response_to: self.in_response_to.clone(),
            created_at: self.created_at,
            extra: self.extra.clone(),
        }
    }

    /// Rebuild a statement read back from storage.
    ///
    /// Confidence is always reset: it is computed per query, never stored.
    #[must_use]
    pub fn from_record(id: Option<StatementId>, record: StatementRecord) -> Self {
        Self {
            id,
            text: record.text,
            in_response_to: record.in_response_to,
            created_at: record.created_at,
            extra: record.extra,
            confidence: 0.0,
        }
    }

    /// Value of a field by name, for query evaluation and sorting.
    ///
    /// `created_at` is not a field value; it is ordered separately.
    #[must_use]
    pub fn field(&self, name: &str) -> FieldValue {
        match name {
            FIELD_TEXT => FieldValue::Text(self.text.clone()),
            FIELD_IN_RESPONSE_TO => self.in_response_to.clone().into(),
            _ => self.extra.get(name).cloned().unwrap_or(FieldValue::Null),
        }
    }

    /// Get an extra field.
    #[must_use]
    pub fn get_extra(&self, key: &str) -> Option<&FieldValue> {
        self.extra.get(key)
    }

    /// Whether this statement is known to be a reply.
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.in_response_to.is_some()
    }

    /// Check the statement can be persisted.
    ///
    /// # Errors
    /// Returns `Validation` when an extra field shadows a known field, or when
    /// the extra map is too large.
    pub fn validate(&self) -> StorageResult<()> {
        if self.text.len() > STATEMENT_TEXT_BYTES_MAX {
            return Err(StorageError::validation(format!(
                "text {} bytes exceeds max {STATEMENT_TEXT_BYTES_MAX}",
                self.text.len()
            )));
        }
        if self.extra.len() > STATEMENT_EXTRA_FIELDS_COUNT_MAX {
            return Err(StorageError::validation(format!(
                "{} extra fields exceeds max {STATEMENT_EXTRA_FIELDS_COUNT_MAX}",
                self.extra.len()
            )));
        }
        for key in self.extra.keys() {
            if key.is_empty() || key.len() > STATEMENT_EXTRA_KEY_BYTES_MAX {
                return Err(StorageError::validation(format!(
                    "extra field name must be 1..={STATEMENT_EXTRA_KEY_BYTES_MAX} bytes"
                )));
            }
            if STATEMENT_RESERVED_FIELDS.contains(&key.as_str()) {
                return Err(StorageError::validation(format!(
                    "extra field '{key}' shadows a statement field"
                )));
            }
        }
        Ok(())
    }
}

impl PartialEq for Statement {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Statement {}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// =============================================================================
// StatementBuilder
// =============================================================================

/// Builder for `Statement`.
#[derive(Debug)]
pub struct StatementBuilder {
    statement: Statement,
}

impl StatementBuilder {
    /// Create a builder with the required text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            statement: Statement::new(text),
        }
    }

    /// Set the statement this one replies to.
    #[must_use]
    pub fn in_response_to(mut self, text: impl Into<String>) -> Self {
        self.statement.in_response_to = Some(text.into());
        self
    }

    /// Set the creation timestamp.
    #[must_use]
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.statement.created_at = created_at;
        self
    }

    /// Add a caller-supplied field.
    #[must_use]
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.statement.extra.insert(key.into(), value.into());
        self
    }

    /// Set the transient confidence.
    #[must_use]
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.statement.confidence = confidence;
        self
    }

    /// Build the statement.
    #[must_use]
    pub fn build(self) -> Statement {
        self.statement
    }
}
