//! Job repository for durable job records.

use std::collections::HashMap;

use roam_core::{Job, JobId, JobStatus};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

/// Repository for job persistence operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

/// Internal record type for SurrealDB.
///
/// `status` and `job_id` are lifted to the top level so they can be indexed
/// and filtered without reaching into the nested job.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    job_id: String,
    status: JobStatus,
    job: Job,
}

impl From<&Job> for JobRecord {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            status: job.status,
            job: job.clone(),
        }
    }
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new job in the database.
    pub async fn create(&self, job: &Job) -> Result<Job, DbError> {
        let record: Option<JobRecord> = self
            .db
            .create(("job", job.id.to_string()))
            .content(JobRecord::from(job))
            .await?;

        record
            .map(|r| r.job)
            .ok_or_else(|| DbError::Query("Failed to create job".into()))
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Job, DbError> {
        self.find(id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }

    /// Get a job by ID, if it exists.
    pub async fn find(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let record: Option<JobRecord> = self.db.select(("job", id.to_string())).await?;
        Ok(record.map(|r| r.job))
    }

    /// Overwrite a job record with its current state.
    pub async fn save(&self, job: &Job) -> Result<Job, DbError> {
        let record: Option<JobRecord> = self
            .db
            .update(("job", job.id.to_string()))
            .content(JobRecord::from(job))
            .await?;

        record
            .map(|r| r.job)
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", job.id)))
    }

    /// All queued or running jobs, oldest submission first.
    pub async fn list_active(&self) -> Result<Vec<Job>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM job
                WHERE status IN $statuses
                ORDER BY job_id ASC
                "#,
            )
            .bind((
                "statuses",
                vec![
                    JobStatus::Queued.as_str().to_string(),
                    JobStatus::Running.as_str().to_string(),
                ],
            ))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;

        Ok(records.into_iter().map(|r| r.job).collect())
    }

    /// Count jobs per status.
    pub async fn count_by_status(&self) -> Result<HashMap<String, u64>, DbError> {
        let mut result = self
            .db
            .query("SELECT status, count() AS count FROM job GROUP BY status")
            .await?;

        #[derive(Deserialize)]
        struct StatusCount {
            status: Option<String>,
            count: i64,
        }

        let counts: Vec<StatusCount> = result.take(0)?;

        Ok(counts
            .into_iter()
            .filter_map(|c| c.status.map(|status| (status, c.count.max(0) as u64)))
            .collect())
    }
}
