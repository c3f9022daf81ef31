//! The seam between the client proxy and a controller.

use std::future::Future;

use futures_util::stream::BoxStream;
use roam_core::{CancelAck, Event, JobId, JobPayload};

use crate::error::ClientError;

/// A finite stream of one job's events, in sequence order.
pub type EventStream = BoxStream<'static, Result<Event, ClientError>>;

/// Something that accepts jobs and serves their event logs.
pub trait JobGateway: Send + Sync + 'static {
    /// Submit a call; returns once the job is durably queued.
    fn submit(&self, payload: &JobPayload)
    -> impl Future<Output = Result<JobId, ClientError>> + Send;

    /// Open the job's event stream at sequence `since`.
    fn events(
        &self,
        job_id: JobId,
        since: u64,
    ) -> impl Future<Output = Result<EventStream, ClientError>> + Send;

    fn cancel(&self, job_id: JobId) -> impl Future<Output = Result<CancelAck, ClientError>> + Send;
}
