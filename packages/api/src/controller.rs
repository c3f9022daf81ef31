//! Controller: the streaming gateway in front of the queue and the bus.

use std::collections::HashMap;

use actors::{CancelAck, EventBus, EventStream, JobQueue, QueueError};
use roam_core::{Job, JobId, JobPayload};

use crate::error::AppResult;

/// Shared state behind every route.
///
/// Keeps nothing per subscriber: reconnecting clients resume from the
/// bus with `since`.
#[derive(Clone, Debug)]
pub struct Controller {
    queue: JobQueue,
    bus: EventBus,
}

impl Controller {
    pub fn new(queue: JobQueue, bus: EventBus) -> Self {
        Self { queue, bus }
    }

    /// Queue a call and return its job ID.
    pub async fn submit(&self, payload: JobPayload) -> AppResult<JobId> {
        let function = payload.function.clone();
        let job_id = self.queue.submit(payload).await?;
        tracing::debug!(job_id = %job_id, function = %function, "Accepted submission");
        Ok(job_id)
    }

    /// Current record of a job.
    pub async fn job(&self, job_id: JobId) -> AppResult<Job> {
        Ok(self
            .queue
            .get(job_id)
            .await?
            .ok_or(QueueError::NotFound(job_id))?)
    }

    /// A job's events from `since`, ending after its terminal event.
    pub async fn events(&self, job_id: JobId, since: u64) -> AppResult<EventStream> {
        self.job(job_id).await?;
        tracing::debug!(job_id = %job_id, since, "Opening event stream");
        Ok(self.bus.subscribe(job_id, since))
    }

    pub async fn cancel(&self, job_id: JobId, reason: Option<String>) -> AppResult<CancelAck> {
        Ok(self.queue.cancel(job_id, reason).await?)
    }

    /// Job counts per status, once both the queue and the bus answer.
    pub async fn health(&self) -> AppResult<HashMap<String, u64>> {
        self.bus.health_check().await?;
        Ok(self.queue.stats().await?)
    }
}
