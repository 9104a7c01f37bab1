//! Shared `StatementAdapter` contract checks.
//!
//! Every backend runs the same checks: the in-memory adapter always, the
//! database bindings when a server is reachable. Each check starts from an
//! empty store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use statement_store::constants::STATEMENT_TEXT_BYTES_MAX;
use statement_store::storage::{
    FieldConstraint, FieldValue, OrderBy, Query, Statement, StatementAdapter, StorageError,
};

/// Fixed timestamp `offset_secs` after a base instant.
pub fn at(offset_secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + offset_secs, 0).expect("valid timestamp")
}

fn texts(statements: &[Statement]) -> Vec<&str> {
    statements.iter().map(|s| s.text.as_str()).collect()
}

async fn reset(adapter: &dyn StatementAdapter) {
    adapter.drop_all().await.unwrap();
    assert_eq!(adapter.count().await.unwrap(), 0);
}

// =============================================================================
// Upsert
// =============================================================================

pub async fn check_upsert_then_filter_returns_one(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    adapter.update(&Statement::new("Hi")).await.unwrap();

    let found = adapter
        .filter(&Query::new().text_equals("Hi"), &OrderBy::none())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0], Statement::new("Hi"));
    assert!(found[0].id.is_some());
}

pub async fn check_double_upsert_keeps_latest(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    adapter
        .update(&Statement::builder("Fine").in_response_to("How are you?").build())
        .await
        .unwrap();
    adapter
        .update(
            &Statement::builder("Fine")
                .in_response_to("How is it going?")
                .extra("persona", "bot")
                .build(),
        )
        .await
        .unwrap();

    let found = adapter
        .filter(&Query::new().text_equals("Fine"), &OrderBy::none())
        .await
        .unwrap();
    assert_eq!(adapter.count().await.unwrap(), 1);
    assert_eq!(found[0].in_response_to.as_deref(), Some("How is it going?"));
    assert_eq!(found[0].get_extra("persona"), Some(&FieldValue::from("bot")));
}

pub async fn check_create_does_not_deduplicate(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    let first = adapter.create(&Statement::new("Hi")).await.unwrap();
    let second = adapter.create(&Statement::new("Hi")).await.unwrap();

    assert_eq!(adapter.count().await.unwrap(), 2);
    assert!(first.id.is_some());
    assert_ne!(first.id, second.id);
}

pub async fn check_confidence_never_persisted(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    adapter
        .update(&Statement::builder("Scored").confidence(0.9).build())
        .await
        .unwrap();

    let found = adapter.filter(&Query::new(), &OrderBy::none()).await.unwrap();
    assert!(found[0].confidence.abs() < f64::EPSILON);
    assert!(found[0].get_extra("confidence").is_none());
}

pub async fn check_batch_reports_invalid_items(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    let oversized = "x".repeat(STATEMENT_TEXT_BYTES_MAX + 1);
    let batch = vec![
        Statement::new("one"),
        Statement::builder("bad").extra("created_at", "shadow").build(),
        Statement::new(oversized.as_str()),
        Statement::new("two"),
    ];
    let report = adapter.update_many(&batch).await.unwrap();

    assert_eq!(report.written, 2);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[0].text, "bad");
    assert_eq!(report.failures[1].text, oversized);
    assert_eq!(adapter.count().await.unwrap(), 2);

    // the single-item path reports instead of failing
    adapter.update(&Statement::new(oversized.as_str())).await.unwrap();
    assert!(adapter.create(&Statement::new(oversized)).await.is_err());
    assert_eq!(adapter.count().await.unwrap(), 2);
}

pub async fn check_concurrent_same_text_upserts_converge(adapter: Arc<dyn StatementAdapter>) {
    reset(adapter.as_ref()).await;

    let mut handles = Vec::new();
    for i in 0..16_i64 {
        let adapter = Arc::clone(&adapter);
        handles.push(tokio::spawn(async move {
            adapter
                .update(&Statement::builder("Same").extra("writer", i).build())
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(adapter.count().await.unwrap(), 1);
}

// =============================================================================
// Filter and Ordering
// =============================================================================

pub async fn check_unfiltered_returns_everything(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    adapter.create(&Statement::new("Hi")).await.unwrap();
    adapter.create(&Statement::new("Hello")).await.unwrap();

    let mut all: Vec<String> = adapter
        .filter(&Query::new(), &OrderBy::none())
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.text)
        .collect();
    all.sort();

    assert_eq!(all, vec!["Hello", "Hi"]);
}

pub async fn check_created_at_newest_first(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    for (text, offset) in [("middle", 10), ("old", 0), ("new", 20)] {
        adapter
            .create(&Statement::builder(text).created_at(at(offset)).build())
            .await
            .unwrap();
    }

    let order = OrderBy::parse(["text", "created_at"]).unwrap();
    let found = adapter.filter(&Query::new(), &order).await.unwrap();

    assert_eq!(texts(&found), vec!["new", "middle", "old"]);
}

pub async fn check_secondary_sort_keys(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    for text in ["b", "c", "a"] {
        adapter
            .create(&Statement::builder(text).created_at(at(5)).build())
            .await
            .unwrap();
    }

    let ascending = OrderBy::parse(["created_at", "text"]).unwrap();
    let descending = OrderBy::parse(["-text"]).unwrap();

    assert_eq!(
        texts(&adapter.filter(&Query::new(), &ascending).await.unwrap()),
        vec!["a", "b", "c"]
    );
    assert_eq!(
        texts(&adapter.filter(&Query::new(), &descending).await.unwrap()),
        vec!["c", "b", "a"]
    );
}

pub async fn check_nulls_sort_lowest(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    adapter
        .create(&Statement::builder("a").extra("rank", 2_i64).build())
        .await
        .unwrap();
    adapter
        .create(&Statement::builder("b").in_response_to("x").build())
        .await
        .unwrap();
    adapter
        .create(
            &Statement::builder("c")
                .in_response_to("y")
                .extra("rank", 1_i64)
                .build(),
        )
        .await
        .unwrap();

    for (field, expected) in [
        ("in_response_to", ["a", "b", "c"]),
        ("-in_response_to", ["c", "b", "a"]),
        ("rank", ["b", "c", "a"]),
        ("-rank", ["a", "c", "b"]),
    ] {
        let order = OrderBy::parse([field]).unwrap();
        let found = adapter.filter(&Query::new(), &order).await.unwrap();
        assert_eq!(texts(&found), expected, "order by {field}");
    }
}

pub async fn check_text_not_in_accumulates(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    for text in ["a", "b", "c"] {
        adapter.update(&Statement::new(text)).await.unwrap();
    }

    let query = Query::new().text_not_in(["a"]).text_not_in(["b"]);
    let found = adapter.filter(&query, &OrderBy::none()).await.unwrap();

    assert_eq!(texts(&found), vec!["c"]);
}

pub async fn check_extra_and_reply_constraints(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    adapter
        .update(&Statement::builder("Hi").extra("persona", "bot").extra("turn", 1_i64).build())
        .await
        .unwrap();
    adapter
        .update(
            &Statement::builder("Hello")
                .in_response_to("Hi")
                .extra("persona", "human")
                .build(),
        )
        .await
        .unwrap();

    let bots = adapter
        .filter(&Query::new().raw([("persona", "bot")]), &OrderBy::none())
        .await
        .unwrap();
    let turn_one = adapter
        .filter(&Query::new().raw([("turn", 1_i64)]), &OrderBy::none())
        .await
        .unwrap();
    let roots = adapter
        .filter(&Query::new().in_response_to_equals(None), &OrderBy::none())
        .await
        .unwrap();
    let replies = adapter
        .filter(&Query::new().in_response_to_equals(Some("Hi")), &OrderBy::none())
        .await
        .unwrap();

    assert_eq!(texts(&bots), vec!["Hi"]);
    assert_eq!(texts(&turn_one), vec!["Hi"]);
    assert_eq!(texts(&roots), vec!["Hi"]);
    assert_eq!(texts(&replies), vec!["Hello"]);
}

pub async fn check_numbers_match_across_int_and_float(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    adapter
        .update(&Statement::builder("Counted").extra("turn", 1_i64).build())
        .await
        .unwrap();
    adapter
        .update(&Statement::builder("Halved").extra("turn", 0.5).build())
        .await
        .unwrap();

    let equal = adapter
        .filter(&Query::new().raw([("turn", 1.0)]), &OrderBy::none())
        .await
        .unwrap();
    assert_eq!(texts(&equal), vec!["Counted"]);

    let excluded = adapter
        .filter(
            &Query::new().with_constraint("turn", FieldConstraint::excluding([1.0])),
            &OrderBy::none(),
        )
        .await
        .unwrap();
    assert_eq!(texts(&excluded), vec!["Halved"]);
}

pub async fn check_narrowing_leaves_base_intact(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    for text in ["a", "b"] {
        adapter
            .update(&Statement::builder(text).extra("persona", "bot").build())
            .await
            .unwrap();
    }

    let base = Query::new().raw([("persona", "bot")]);
    let narrowed = adapter
        .filter(&base.text_not_in(["a"]), &OrderBy::none())
        .await
        .unwrap();
    let full = adapter.filter(&base, &OrderBy::none()).await.unwrap();

    assert_eq!(narrowed.len(), 1);
    assert_eq!(full.len(), 2);
}

// =============================================================================
// Random, Remove, Responses, Drop
// =============================================================================

pub async fn check_random_on_empty_store(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    let result = adapter.get_random().await;

    assert!(matches!(result, Err(StorageError::EmptyStorage)));
}

/// Every stored statement is drawn with roughly equal frequency.
pub async fn check_random_is_uniform(adapter: &dyn StatementAdapter, draws_per_statement: usize) {
    reset(adapter).await;

    let stored = ["a", "b", "c", "d", "e"];
    for text in stored {
        adapter.update(&Statement::new(text)).await.unwrap();
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..draws_per_statement * stored.len() {
        let statement = adapter.get_random().await.unwrap();
        *counts.entry(statement.text).or_insert(0) += 1;
    }

    let low = draws_per_statement * 7 / 10;
    let high = draws_per_statement * 13 / 10;
    for text in stored {
        let count = counts.get(text).copied().unwrap_or(0);
        assert!(
            (low..=high).contains(&count),
            "'{text}' drawn {count} times, expected {low}..={high}"
        );
    }
}

pub async fn check_remove(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    adapter.update(&Statement::new("Hi")).await.unwrap();
    adapter.update(&Statement::new("Hello")).await.unwrap();

    adapter.remove("Hi").await.unwrap();
    adapter.remove("never stored").await.unwrap();

    let left = adapter.filter(&Query::new(), &OrderBy::none()).await.unwrap();
    assert_eq!(texts(&left), vec!["Hello"]);
}

pub async fn check_response_statements(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    adapter.update(&Statement::new("Hi")).await.unwrap();
    adapter
        .update(&Statement::builder("Hello").in_response_to("Hi").build())
        .await
        .unwrap();
    adapter
        .update(&Statement::builder("How are you?").in_response_to("Hello").build())
        .await
        .unwrap();
    // Dangling reference: "Unknown" was never stored
    adapter
        .update(&Statement::builder("Orphan").in_response_to("Unknown").build())
        .await
        .unwrap();

    let mut responses: Vec<String> = adapter
        .get_response_statements()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.text)
        .collect();
    responses.sort();

    assert_eq!(responses, vec!["Hello", "Hi"]);
}

pub async fn check_response_statements_empty(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    adapter.update(&Statement::new("Alone")).await.unwrap();

    assert!(adapter.get_response_statements().await.unwrap().is_empty());
}

pub async fn check_drop_empties_and_stays_usable(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    adapter.update(&Statement::new("Hi")).await.unwrap();
    adapter.drop_all().await.unwrap();

    assert_eq!(adapter.count().await.unwrap(), 0);

    adapter.update(&Statement::new("Again")).await.unwrap();
    assert_eq!(adapter.count().await.unwrap(), 1);
}

// =============================================================================
// Base Query
// =============================================================================

/// Field every scoped adapter is restricted to.
pub const SCOPE_FIELD: &str = "persona";
/// Value every scoped adapter is restricted to.
pub const SCOPE_VALUE: &str = "support";

/// `adapter` must carry a base query of `SCOPE_FIELD == SCOPE_VALUE`.
pub async fn check_base_query_scopes_reads(adapter: &dyn StatementAdapter) {
    reset(adapter).await;

    adapter
        .update(&Statement::builder("Hi").extra(SCOPE_FIELD, SCOPE_VALUE).build())
        .await
        .unwrap();
    adapter
        .update(
            &Statement::builder("Hello")
                .in_response_to("Hi")
                .extra(SCOPE_FIELD, "sales")
                .build(),
        )
        .await
        .unwrap();
    adapter
        .update(&Statement::builder("Hey").in_response_to("Hello").build())
        .await
        .unwrap();

    let scoped = adapter.filter(&Query::new(), &OrderBy::none()).await.unwrap();
    assert_eq!(texts(&scoped), vec!["Hi"]);

    // narrowing by text stays inside the scope
    let widened = adapter
        .filter(&Query::new().text_equals("Hello"), &OrderBy::none())
        .await
        .unwrap();
    assert!(widened.is_empty());

    let responses = adapter.get_response_statements().await.unwrap();
    assert_eq!(texts(&responses), vec!["Hi"]);

    assert_eq!(adapter.count().await.unwrap(), 3);
}

/// Every check, in order. Used by the database suites.
pub async fn run_contract(adapter: Arc<dyn StatementAdapter>, draws_per_statement: usize) {
    let a = adapter.as_ref();
    check_upsert_then_filter_returns_one(a).await;
    check_double_upsert_keeps_latest(a).await;
    check_create_does_not_deduplicate(a).await;
    check_confidence_never_persisted(a).await;
    check_batch_reports_invalid_items(a).await;
    check_unfiltered_returns_everything(a).await;
    check_created_at_newest_first(a).await;
    check_secondary_sort_keys(a).await;
    check_nulls_sort_lowest(a).await;
    check_text_not_in_accumulates(a).await;
    check_extra_and_reply_constraints(a).await;
    check_numbers_match_across_int_and_float(a).await;
    check_narrowing_leaves_base_intact(a).await;
    check_random_on_empty_store(a).await;
    check_random_is_uniform(a, draws_per_statement).await;
    check_remove(a).await;
    check_response_statements(a).await;
    check_response_statements_empty(a).await;
    check_drop_empties_and_stays_usable(a).await;
    check_concurrent_same_text_upserts_converge(adapter).await;
}
