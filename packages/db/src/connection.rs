//! Database connection management.

use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;

use crate::repositories::{EventRepository, JobRepository};
use crate::schema::init_schema;

/// Database connection wrapper.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection endpoint: "mem://", "rocksdb://path", "ws://host:port"
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "roam".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Use an explicit endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Handle to the durable store behind the queue and the event bus.
///
/// Cheap to clone; every clone shares one connection.
#[derive(Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    /// Connect, select namespace and database, and apply the schema.
    pub async fn connect(config: DbConfig) -> Result<Self, DbError> {
        tracing::info!(endpoint = %config.endpoint, "Connecting to database");

        let db = connect(config.endpoint.as_str()).await?;

        // Authenticate if credentials provided
        if let Some((username, password)) = &config.credentials {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await?;

        init_schema(&db).await?;

        tracing::info!(
            namespace = %config.namespace,
            database = %config.database,
            "Connected to database"
        );

        Ok(Self { db })
    }

    /// A fresh, private in-memory store.
    pub async fn memory() -> Result<Self, DbError> {
        Self::connect(DbConfig::memory()).await
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn jobs(&self) -> JobRepository {
        JobRepository::new(self.db.clone())
    }

    pub fn events(&self) -> EventRepository {
        EventRepository::new(self.db.clone())
    }

    /// Check that the store answers queries.
    pub async fn health_check(&self) -> Result<(), DbError> {
        self.db.query("RETURN true").await?.check()?;
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}
