//! Query - Backend-independent filter expression and ordering plan
//!
//! `TigerStyle`: Immutable values, every builder call returns a new query.
//!
//! A `Query` maps field names to a `FieldConstraint` (an optional equality
//! plus a set of excluded values). Backends translate it into their own
//! query language; the in-memory backend evaluates it with [`Query::matches`].
//!
//! ```rust
//! use statement_store::storage::Query;
//!
//! let scope = Query::new().raw([("persona", "support")]);
//! let narrowed = scope.text_not_in(["Hi"]).text_not_in(["Hello"]);
//!
//! assert!(scope.get("text").is_none());
//! assert_eq!(narrowed.get("text").map(|c| c.not_in.len()), Some(2));
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::error::{StorageError, StorageResult};
use super::statement::{FieldValue, Statement, FIELD_CREATED_AT, FIELD_IN_RESPONSE_TO, FIELD_TEXT};
use crate::constants::{
    QUERY_EXCLUSION_VALUES_COUNT_MAX, QUERY_ORDER_DESCENDING_PREFIX, QUERY_ORDER_KEYS_COUNT_MAX,
};

/// Fields a query can neither constrain nor sort by.
const UNQUERYABLE_FIELDS: [&str; 2] = ["id", "confidence"];

// =============================================================================
// FieldConstraint
// =============================================================================

/// Constraint on one field: optional exact match, plus excluded values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldConstraint {
    /// Exact value the field must have
    pub equals: Option<FieldValue>,
    /// Values the field must not have
    pub not_in: Vec<FieldValue>,
}

impl FieldConstraint {
    /// Constraint requiring an exact value.
    #[must_use]
    pub fn equal(value: impl Into<FieldValue>) -> Self {
        Self {
            equals: Some(value.into()),
            not_in: Vec::new(),
        }
    }

    /// Constraint excluding a set of values.
    #[must_use]
    pub fn excluding<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FieldValue>,
    {
        Self {
            equals: None,
            not_in: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Check a field value against this constraint.
    #[must_use]
    pub fn matches(&self, value: &FieldValue) -> bool {
        if let Some(expected) = &self.equals {
            if !expected.same_value(value) {
                return false;
            }
        }
        !self.not_in.iter().any(|excluded| excluded.same_value(value))
    }

    fn extend_not_in(&mut self, values: impl IntoIterator<Item = FieldValue>) {
        for value in values {
            if !self.not_in.contains(&value) {
                self.not_in.push(value);
            }
        }
    }
}

// =============================================================================
// Query
// =============================================================================

/// Immutable filter expression over statements.
///
/// An empty query matches every statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    fields: BTreeMap<String, FieldConstraint>,
}

impl Query {
    /// Create an empty query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge exact-match constraints; a key already present is replaced.
    #[must_use]
    pub fn raw<I, K, V>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let mut next = self.clone();
        for (key, value) in fields {
            next.fields
                .insert(key.into(), FieldConstraint::equal(value));
        }
        next
    }

    /// Set a full constraint on one field, replacing whatever was there.
    #[must_use]
    pub fn with_constraint(&self, field: impl Into<String>, constraint: FieldConstraint) -> Self {
        let mut next = self.clone();
        next.fields.insert(field.into(), constraint);
        next
    }

    /// Require `text` to equal `value`.
    #[must_use]
    pub fn text_equals(&self, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.fields.entry(FIELD_TEXT.to_string()).or_default().equals =
            Some(FieldValue::Text(value.into()));
        next
    }

    /// Exclude texts; repeated calls extend the exclusion set.
    #[must_use]
    pub fn text_not_in<I, S>(&self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.fields
            .entry(FIELD_TEXT.to_string())
            .or_default()
            .extend_not_in(values.into_iter().map(|v| FieldValue::Text(v.into())));
        next
    }

    /// Require `in_response_to` to equal `value`; `None` matches non-replies.
    #[must_use]
    pub fn in_response_to_equals(&self, value: Option<&str>) -> Self {
        let mut next = self.clone();
        next.fields
            .entry(FIELD_IN_RESPONSE_TO.to_string())
            .or_default()
            .equals = Some(value.into());
        next
    }

    /// Overlay `other` on this query.
    ///
    /// Equalities in `other` override; exclusion sets accumulate.
    #[must_use]
    pub fn merge(&self, other: &Query) -> Self {
        let mut next = self.clone();
        for (field, constraint) in &other.fields {
            let entry = next.fields.entry(field.clone()).or_default();
            if constraint.equals.is_some() {
                entry.equals.clone_from(&constraint.equals);
            }
            entry.extend_not_in(constraint.not_in.iter().cloned());
        }
        next
    }

    /// Evaluate the query against a statement.
    #[must_use]
    pub fn matches(&self, statement: &Statement) -> bool {
        self.fields
            .iter()
            .all(|(field, constraint)| constraint.matches(&statement.field(field)))
    }

    /// Constraint on a field, if any.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldConstraint> {
        self.fields.get(field)
    }

    /// Iterate over constrained fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldConstraint)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether the query has no constraints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of constrained fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check the query can be evaluated by a backend.
    ///
    /// # Errors
    /// Returns `Validation` for constraints on `id`, `created_at` or
    /// `confidence`, and for oversized exclusion sets.
    pub fn validate(&self) -> StorageResult<()> {
        for (field, constraint) in &self.fields {
            if field.is_empty() {
                return Err(StorageError::validation("query field name is empty"));
            }
            if field == FIELD_CREATED_AT || UNQUERYABLE_FIELDS.contains(&field.as_str()) {
                return Err(StorageError::validation(format!(
                    "field '{field}' cannot be used as a query constraint"
                )));
            }
            if constraint.not_in.len() > QUERY_EXCLUSION_VALUES_COUNT_MAX {
                return Err(StorageError::validation(format!(
                    "{} excluded values for '{field}' exceeds max {QUERY_EXCLUSION_VALUES_COUNT_MAX}",
                    constraint.not_in.len()
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Ordering
// =============================================================================

/// Sort direction of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first
    Ascending,
    /// Largest first
    Descending,
}

/// One key of an ordering plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Field to sort by
    pub field: String,
    /// Sort direction
    pub direction: Direction,
}

impl SortKey {
    /// Whether this key sorts by creation time.
    #[must_use]
    pub fn is_created_at(&self) -> bool {
        self.field == FIELD_CREATED_AT
    }
}

/// Normalized ordering plan.
///
/// `created_at`, wherever it appears in the request, becomes the first key and
/// always sorts newest first. Other fields keep their requested order and sort
/// ascending unless prefixed with `-`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBy {
    keys: Vec<SortKey>,
}

impl OrderBy {
    /// No ordering.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Newest first.
    #[must_use]
    pub fn newest_first() -> Self {
        Self {
            keys: vec![SortKey {
                field: FIELD_CREATED_AT.to_string(),
                direction: Direction::Descending,
            }],
        }
    }

    /// Build a plan from field names such as `["text", "-persona", "created_at"]`.
    ///
    /// # Errors
    /// Returns `Validation` for empty or unsortable names and for too many keys.
    pub fn parse<I, S>(fields: I) -> StorageResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut created_at = false;
        let mut rest = Vec::new();

        for raw in fields {
            let raw = raw.as_ref();
            let (name, direction) = match raw.strip_prefix(QUERY_ORDER_DESCENDING_PREFIX) {
                Some(name) => (name, Direction::Descending),
                None => (raw, Direction::Ascending),
            };

            if name.is_empty() {
                return Err(StorageError::validation(format!(
                    "order field '{raw}' has no name"
                )));
            }
            if UNQUERYABLE_FIELDS.contains(&name) {
                return Err(StorageError::validation(format!(
                    "field '{name}' cannot be used for ordering"
                )));
            }

            if name == FIELD_CREATED_AT {
                created_at = true;
            } else {
                rest.push(SortKey {
                    field: name.to_string(),
                    direction,
                });
            }
        }

        let mut keys = Vec::with_capacity(rest.len() + 1);
        if created_at {
            keys.extend(Self::newest_first().keys);
        }
        keys.extend(rest);

        if keys.len() > QUERY_ORDER_KEYS_COUNT_MAX {
            return Err(StorageError::validation(format!(
                "{} order keys exceeds max {QUERY_ORDER_KEYS_COUNT_MAX}",
                keys.len()
            )));
        }

        // Postcondition
        debug_assert!(
            keys.iter().skip(1).all(|k| !k.is_created_at()),
            "created_at may only lead the plan"
        );

        Ok(Self { keys })
    }

    /// The normalized keys.
    #[must_use]
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Whether no ordering was requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Compare two statements under this plan.
    #[must_use]
    pub fn compare(&self, a: &Statement, b: &Statement) -> Ordering {
        for key in &self.keys {
            let ordering = if key.is_created_at() {
                a.created_at.cmp(&b.created_at)
            } else {
                a.field(&key.field).sort_cmp(&b.field(&key.field))
            };
            let ordering = match key.direction {
                Direction::Ascending => ordering,
                Direction::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn statement(text: &str, reply_to: Option<&str>) -> Statement {
        let builder = Statement::builder(text);
        match reply_to {
            Some(r) => builder.in_response_to(r).build(),
            None => builder.build(),
        }
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let query = Query::new();

        assert!(query.is_empty());
        assert!(query.matches(&statement("anything", None)));
    }

    #[test]
    fn test_text_equals() {
        let query = Query::new().text_equals("Hi");

        assert!(query.matches(&statement("Hi", None)));
        assert!(!query.matches(&statement("Hello", None)));
    }

    #[test]
    fn test_text_not_in_accumulates() {
        let query = Query::new().text_not_in(["Hi"]).text_not_in(["Hello", "Hi"]);

        let constraint = query.get("text").unwrap();
        assert_eq!(constraint.not_in.len(), 2);
        assert!(!query.matches(&statement("Hi", None)));
        assert!(!query.matches(&statement("Hello", None)));
        assert!(query.matches(&statement("Hey", None)));
    }

    #[test]
    fn test_equality_and_exclusion_both_apply() {
        let query = Query::new().text_equals("Hi").text_not_in(["Hi"]);
        assert!(!query.matches(&statement("Hi", None)));

        let query = Query::new().text_not_in(["Hello"]).text_equals("Hi");
        assert!(query.matches(&statement("Hi", None)));
        assert_eq!(query.get("text").unwrap().not_in.len(), 1);
    }

    #[test]
    fn test_raw_overwrites_conflicting_keys() {
        let query = Query::new()
            .text_not_in(["Hi"])
            .raw([("persona", "bot")])
            .raw([("persona", "human"), ("text", "Hi")]);

        assert_eq!(
            query.get("persona"),
            Some(&FieldConstraint::equal("human"))
        );
        // raw replaced the whole text constraint, exclusions included
        assert!(query.get("text").unwrap().not_in.is_empty());
        assert!(query.matches(&Statement::builder("Hi").extra("persona", "human").build()));
    }

    #[test]
    fn test_numbers_match_across_int_and_float() {
        let statement = Statement::builder("Hi").extra("turn", 1_i64).build();

        assert!(Query::new().raw([("turn", 1.0)]).matches(&statement));
        assert!(!Query::new().raw([("turn", 1.5)]).matches(&statement));
        assert!(!Query::new()
            .with_constraint("turn", FieldConstraint::excluding([1.0]))
            .matches(&statement));
        // numbers never equal their text form
        assert!(!Query::new().raw([("turn", "1")]).matches(&statement));
    }

    #[test]
    fn test_narrowing_never_corrupts_base() {
        let base = Query::new().raw([("persona", "support")]);
        let snapshot = base.clone();

        let first = base.text_not_in(["a"]);
        let second = base.text_not_in(["b"]).text_equals("c");

        assert_eq!(base, snapshot);
        assert_eq!(first.get("text").unwrap().not_in, vec![FieldValue::from("a")]);
        assert_eq!(second.get("text").unwrap().not_in, vec![FieldValue::from("b")]);
    }

    #[test]
    fn test_in_response_to_equals_none_matches_non_replies() {
        let query = Query::new().in_response_to_equals(None);

        assert!(query.matches(&statement("Hi", None)));
        assert!(!query.matches(&statement("Hello", Some("Hi"))));

        let query = Query::new().in_response_to_equals(Some("Hi"));
        assert!(query.matches(&statement("Hello", Some("Hi"))));
    }

    #[test]
    fn test_merge_overrides_equality_and_accumulates_exclusions() {
        let base = Query::new()
            .raw([("persona", "support")])
            .text_not_in(["a"]);
        let request = Query::new().raw([("persona", "sales")]).text_not_in(["b"]);

        let merged = base.merge(&request);

        assert_eq!(merged.get("persona"), Some(&FieldConstraint::equal("sales")));
        assert_eq!(merged.get("text").unwrap().not_in.len(), 2);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_validate_rejects_unqueryable_fields() {
        assert!(Query::new().raw([("created_at", "x")]).validate().is_err());
        assert!(Query::new().raw([("confidence", 0.5)]).validate().is_err());
        assert!(Query::new().raw([("id", "1")]).validate().is_err());
        assert!(Query::new().text_equals("ok").validate().is_ok());
    }

    #[test]
    fn test_order_by_moves_created_at_first_descending() {
        let order = OrderBy::parse(["text", "created_at", "-persona"]).unwrap();

        let keys = order.keys();
        assert_eq!(keys.len(), 3);
        assert!(keys[0].is_created_at());
        assert_eq!(keys[0].direction, Direction::Descending);
        assert_eq!(keys[1].field, "text");
        assert_eq!(keys[1].direction, Direction::Ascending);
        assert_eq!(keys[2].field, "persona");
        assert_eq!(keys[2].direction, Direction::Descending);
    }

    #[test]
    fn test_order_by_created_at_prefix_ignored() {
        assert_eq!(OrderBy::parse(["-created_at"]).unwrap(), OrderBy::newest_first());
        assert_eq!(
            OrderBy::parse(["created_at", "-created_at"]).unwrap(),
            OrderBy::newest_first()
        );
    }

    #[test]
    fn test_order_by_rejects_bad_names() {
        assert!(OrderBy::parse(["-"]).is_err());
        assert!(OrderBy::parse([""]).is_err());
        assert!(OrderBy::parse(["confidence"]).is_err());
        assert!(OrderBy::parse(Vec::<String>::new()).unwrap().is_empty());
    }

    #[test]
    fn test_compare_newest_first_then_text() {
        let old = DateTime::from_timestamp(1_000, 0).unwrap();
        let new = DateTime::from_timestamp(2_000, 0).unwrap();
        let a = Statement::builder("b").created_at(old).build();
        let b = Statement::builder("a").created_at(new).build();
        let c = Statement::builder("c").created_at(new).build();

        let order = OrderBy::parse(["text", "created_at"]).unwrap();
        let mut items = vec![a, c, b];
        items.sort_by(|x, y| order.compare(x, y));

        let texts: Vec<&str> = items.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "c", "b"]);
    }
}
