//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables and indexes.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;
    db.query(EVENT_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
const JOB_SCHEMA: &str = r#"
-- One record per submitted job, keyed by job id
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

-- Startup recovery scans non-terminal jobs
DEFINE INDEX IF NOT EXISTS job_status ON job FIELDS status;
DEFINE INDEX IF NOT EXISTS job_submitted ON job FIELDS submitted_at;
"#;

/// Event table schema.
const EVENT_SCHEMA: &str = r#"
-- Append-only per-job event log
DEFINE TABLE IF NOT EXISTS event SCHEMALESS;

-- A sequence number is written at most once per job
DEFINE INDEX IF NOT EXISTS event_job_sequence ON event FIELDS job_id, sequence UNIQUE;
"#;
