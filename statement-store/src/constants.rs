//! `TigerStyle` Constants
//!
//! All limits use big-endian naming: `CATEGORY_SPECIFICS_UNIT_LIMIT`
//! Example: `STATEMENT_TEXT_BYTES_MAX` (not `MAX_STATEMENT_TEXT`)
//!
//! Every constant includes units in the name:
//! - _`BYTES_MAX/MIN` for size limits
//! - _`COUNT_MAX` for quantity limits
//! - _MS for milliseconds

// =============================================================================
// Statement Limits
// =============================================================================

/// Maximum size of a statement's text
pub const STATEMENT_TEXT_BYTES_MAX: usize = 64 * 1024; // 64KB

/// Maximum number of caller-supplied extra fields per statement
pub const STATEMENT_EXTRA_FIELDS_COUNT_MAX: usize = 64;

/// Maximum length of an extra field name
pub const STATEMENT_EXTRA_KEY_BYTES_MAX: usize = 128;

/// Field names owned by the statement model; extra fields may not use them
pub const STATEMENT_RESERVED_FIELDS: [&str; 5] =
    ["id", "text", "in_response_to", "created_at", "confidence"];

// =============================================================================
// Query Limits
// =============================================================================

/// Maximum number of values accumulated in a single exclusion set
pub const QUERY_EXCLUSION_VALUES_COUNT_MAX: usize = 10_000;

/// Maximum number of sort keys in an ordering plan
pub const QUERY_ORDER_KEYS_COUNT_MAX: usize = 8;

/// Prefix marking a descending sort key
pub const QUERY_ORDER_DESCENDING_PREFIX: char = '-';

// =============================================================================
// Connection Defaults
// =============================================================================

/// Default connection target (document store)
pub const DATABASE_URI_DEFAULT: &str = "mongodb://localhost:27017/chatterbot-database";

/// Default connection target when the relational backend is selected
pub const DATABASE_URI_POSTGRES_DEFAULT: &str = "postgres://localhost:5432/chatterbot-database";

/// Default logical database name
pub const DATABASE_NAME_DEFAULT: &str = "chatterbot-database";

/// Default collection (document store) or table (relational) name
pub const COLLECTION_NAME_DEFAULT: &str = "statements";

/// Maximum length of a collection/table name
pub const COLLECTION_NAME_BYTES_MAX: usize = 63;

/// Default connection pool size
pub const POOL_CONNECTIONS_COUNT_DEFAULT: u32 = 10;

/// Maximum connection pool size
pub const POOL_CONNECTIONS_COUNT_MAX: u32 = 256;

/// Sort buffer requested from the engine at connect time (best effort)
pub const TUNING_SORT_BUFFER_BYTES: u64 = 44_040_192; // 42MB

/// Upper bound on the connect-time tuning command
pub const TUNING_TIMEOUT_MS: u64 = 2_000;

// =============================================================================
// DST (Deterministic Simulation Testing) Limits
// =============================================================================

/// Maximum number of simulation steps
pub const DST_SIMULATION_STEPS_MAX: u64 = 1_000_000;

/// Maximum probability for fault injection (1.0 = 100%)
pub const DST_FAULT_PROBABILITY_MAX: f64 = 1.0;

/// Maximum time advance per step in milliseconds
pub const DST_TIME_ADVANCE_MS_MAX: u64 = 86_400_000; // 24 hours

// =============================================================================
// Telemetry
// =============================================================================

/// Default log filter when `RUST_LOG` is unset
pub const TELEMETRY_FILTER_DEFAULT: &str = "info";

/// Default service name attached to the root span
pub const TELEMETRY_SERVICE_NAME_DEFAULT: &str = "statement-store";

// =============================================================================
// Tests
// =============================================================================
