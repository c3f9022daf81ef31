//! Event repository for the append-only per-job event log.

use roam_core::{Event, JobId};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

/// Repository for event persistence operations.
#[derive(Clone)]
pub struct EventRepository {
    db: Database,
}

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct EventRecord {
    job_id: String,
    sequence: u64,
    event: Event,
}

/// Record key for an event; zero-padded so keys sort by sequence.
fn event_key(job_id: JobId, sequence: u64) -> String {
    format!("{}-{:020}", job_id, sequence)
}

impl EventRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist one event.
    ///
    /// Fails if an event with the same job and sequence already exists.
    pub async fn append(&self, event: &Event) -> Result<(), DbError> {
        let record = EventRecord {
            job_id: event.job_id.to_string(),
            sequence: event.sequence,
            event: event.clone(),
        };

        let created: Option<EventRecord> = self
            .db
            .create(("event", event_key(event.job_id, event.sequence)))
            .content(record)
            .await?;

        created.map(|_| ()).ok_or_else(|| {
            DbError::Query(format!(
                "Failed to append event {} for job {}",
                event.sequence, event.job_id
            ))
        })
    }

    /// Events of `job_id` with `sequence >= since`, in order.
    pub async fn list_since(&self, job_id: JobId, since: u64) -> Result<Vec<Event>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM event
                WHERE job_id = $job_id AND sequence >= $since
                ORDER BY sequence ASC
                "#,
            )
            .bind(("job_id", job_id.to_string()))
            .bind(("since", since as i64))
            .await?;

        let records: Vec<EventRecord> = result.take(0)?;

        Ok(records.into_iter().map(|r| r.event).collect())
    }

    /// All events of `job_id`, in order.
    pub async fn list(&self, job_id: JobId) -> Result<Vec<Event>, DbError> {
        self.list_since(job_id, 0).await
    }

    /// The most recent event of `job_id`, if any.
    pub async fn last(&self, job_id: JobId) -> Result<Option<Event>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM event
                WHERE job_id = $job_id
                ORDER BY sequence DESC
                LIMIT 1
                "#,
            )
            .bind(("job_id", job_id.to_string()))
            .await?;

        let records: Vec<EventRecord> = result.take(0)?;

        Ok(records.into_iter().next().map(|r| r.event))
    }
}
