//! Storage Configuration
//!
//! `TigerStyle`: Sensible defaults, builder pattern, explicit over implicit.
//!
//! The backend is chosen once, from configuration, and resolved by
//! [`StorageConfig::connect`] into a `Box<dyn StatementAdapter>`.

use std::env;
use std::fmt;
use std::str::FromStr;

use crate::constants::{
    COLLECTION_NAME_DEFAULT, DATABASE_URI_DEFAULT, DATABASE_URI_POSTGRES_DEFAULT,
    POOL_CONNECTIONS_COUNT_DEFAULT, POOL_CONNECTIONS_COUNT_MAX,
};
use crate::dst::SimConfig;
use crate::storage::{Query, SimStatementAdapter, StatementAdapter, StorageError, StorageResult};

/// Environment variable selecting the backend.
pub const ENV_BACKEND: &str = "STATEMENT_STORE_BACKEND";
/// Environment variable holding the connection URI.
pub const ENV_DATABASE_URI: &str = "STATEMENT_STORE_URI";
/// Environment variable naming the collection (table for Postgres).
pub const ENV_COLLECTION: &str = "STATEMENT_STORE_COLLECTION";

// =============================================================================
// BackendKind
// =============================================================================

/// Which storage engine backs the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// In-memory, deterministic (always available)
    #[default]
    Memory,
    /// PostgreSQL via sqlx (feature `postgres`)
    Postgres,
    /// MongoDB (feature `mongodb`)
    MongoDb,
}

impl BackendKind {
    /// Configuration name of the backend.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres => "postgres",
            Self::MongoDb => "mongodb",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "sim" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mongodb" | "mongo" => Ok(Self::MongoDb),
            other => Err(StorageError::configuration(format!(
                "unknown backend '{other}' (expected memory, postgres or mongodb)"
            ))),
        }
    }
}

// =============================================================================
// StorageConfig
// =============================================================================

/// Configuration for connecting a statement adapter.
///
/// # Example
///
/// ```rust
/// use statement_store::config::{BackendKind, StorageConfig};
///
/// let config = StorageConfig::default()
///     .with_backend(BackendKind::Memory)
///     .with_seed(42);
/// assert_eq!(config.collection, "statements");
/// ```
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Storage engine.
    ///
    /// Default: memory
    pub backend: BackendKind,

    /// Connection URI. `None` uses the backend's default URI.
    pub database_uri: Option<String>,

    /// Collection name (table name for Postgres).
    ///
    /// Default: "statements"
    pub collection: String,

    /// Connection pool size for Postgres.
    ///
    /// Default: 10
    pub max_connections: u32,

    /// Seed for the in-memory backend. `None` reads `DST_SEED` or picks one.
    pub seed: Option<u64>,

    /// Scope applied to every filter and response query.
    pub base_query: Query,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            database_uri: None,
            collection: COLLECTION_NAME_DEFAULT.to_string(),
            max_connections: POOL_CONNECTIONS_COUNT_DEFAULT,
            seed: None,
            base_query: Query::new(),
        }
    }
}

impl StorageConfig {
    /// Read backend, URI and collection from the environment over defaults.
    ///
    /// # Errors
    /// Returns `Configuration` if the backend variable names no known backend.
    pub fn from_env() -> StorageResult<Self> {
        let mut config = Self::default();

        if let Ok(backend) = env::var(ENV_BACKEND) {
            config.backend = backend.parse()?;
        }
        if let Ok(uri) = env::var(ENV_DATABASE_URI) {
            config.database_uri = Some(uri);
        }
        if let Ok(collection) = env::var(ENV_COLLECTION) {
            config.collection = collection;
        }

        Ok(config)
    }

    /// Set the backend.
    #[must_use]
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the connection URI.
    #[must_use]
    pub fn with_database_uri(mut self, uri: impl Into<String>) -> Self {
        self.database_uri = Some(uri.into());
        self
    }

    /// Set the collection (or table) name.
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Set the Postgres pool size.
    #[must_use]
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set the in-memory backend seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the base scope query.
    #[must_use]
    pub fn with_base_query(mut self, base_query: Query) -> Self {
        self.base_query = base_query;
        self
    }

    /// Connection URI, falling back to the backend's default.
    #[must_use]
    pub fn resolved_uri(&self) -> &str {
        match (&self.database_uri, self.backend) {
            (Some(uri), _) => uri,
            (None, BackendKind::Postgres) => DATABASE_URI_POSTGRES_DEFAULT,
            (None, _) => DATABASE_URI_DEFAULT,
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `Configuration` for an out-of-range pool size or empty collection.
    pub fn validate(&self) -> StorageResult<()> {
        if !(1..=POOL_CONNECTIONS_COUNT_MAX).contains(&self.max_connections) {
            return Err(StorageError::configuration(format!(
                "max_connections must be in 1..={POOL_CONNECTIONS_COUNT_MAX}, got {}",
                self.max_connections
            )));
        }
        if self.collection.is_empty() {
            return Err(StorageError::configuration("collection cannot be empty"));
        }
        self.base_query.validate()
    }

    /// Construct and initialize the configured adapter.
    ///
    /// # Errors
    /// Returns `Configuration` when the backend is not compiled in or the
    /// config is invalid, and the backend's error if it cannot connect.
    #[tracing::instrument(skip(self), fields(backend = %self.backend))]
    pub async fn connect(&self) -> StorageResult<Box<dyn StatementAdapter>> {
        self.validate()?;

        let adapter: Box<dyn StatementAdapter> = match self.backend {
            BackendKind::Memory => {
                let sim = self
                    .seed
                    .map_or_else(SimConfig::from_env_or_random, SimConfig::with_seed);
                Box::new(SimStatementAdapter::new(sim).with_base_query(self.base_query.clone()))
            }
            BackendKind::Postgres => self.connect_postgres().await?,
            BackendKind::MongoDb => self.connect_mongodb().await?,
        };

        tracing::info!(backend = adapter.backend_name(), "statement adapter connected");
        Ok(adapter)
    }

    #[cfg(feature = "postgres")]
    async fn connect_postgres(&self) -> StorageResult<Box<dyn StatementAdapter>> {
        let adapter = crate::storage::PostgresStatementAdapter::connect(
            self.resolved_uri(),
            &self.collection,
            self.max_connections,
        )
        .await?;
        Ok(Box::new(adapter.with_base_query(self.base_query.clone())))
    }

    #[cfg(not(feature = "postgres"))]
    #[allow(clippy::unused_async)]
    async fn connect_postgres(&self) -> StorageResult<Box<dyn StatementAdapter>> {
        Err(StorageError::configuration(
            "postgres backend not compiled in (enable feature `postgres`)",
        ))
    }

    #[cfg(feature = "mongodb")]
    async fn connect_mongodb(&self) -> StorageResult<Box<dyn StatementAdapter>> {
        let adapter =
            crate::storage::MongoStatementAdapter::connect(self.resolved_uri(), &self.collection)
                .await?;
        Ok(Box::new(adapter.with_base_query(self.base_query.clone())))
    }

    #[cfg(not(feature = "mongodb"))]
    #[allow(clippy::unused_async)]
    async fn connect_mongodb(&self) -> StorageResult<Box<dyn StatementAdapter>> {
        Err(StorageError::configuration(
            "mongodb backend not compiled in (enable feature `mongodb`)",
        ))
    }
}
