//! Gateway speaking the controller's HTTP interface.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::{Response, StatusCode};
use roam_core::{CancelAck, CancelResponse, ErrorBody, Event, Job, JobId, JobPayload, SubmitResponse};

use crate::error::ClientError;
use crate::gateway::{EventStream, JobGateway};
use crate::sse::SseDecoder;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for a controller at `base_url`.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    base_url: String,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_client(base_url, client))
    }

    /// Use a preconfigured reqwest client.
    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Current record of a job, for callers that cannot stream.
    pub async fn job(&self, job_id: JobId) -> Result<Job, ClientError> {
        let response = self.client.get(self.url(&format!("/jobs/{job_id}"))).send().await?;
        Ok(ok_or_error(response).await?.json().await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl JobGateway for HttpGateway {
    async fn submit(&self, payload: &JobPayload) -> Result<JobId, ClientError> {
        let response = self
            .client
            .post(self.url("/jobs"))
            .json(payload)
            .send()
            .await?;
        let body: SubmitResponse = ok_or_error(response).await?.json().await?;
        tracing::debug!(job_id = %body.job_id, function = %payload.function, "Job submitted");
        Ok(body.job_id)
    }

    async fn events(&self, job_id: JobId, since: u64) -> Result<EventStream, ClientError> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{job_id}/events")))
            .query(&[("since", since)])
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        Ok(decode_events(ok_or_error(response).await?))
    }

    async fn cancel(&self, job_id: JobId) -> Result<CancelAck, ClientError> {
        let response = self
            .client
            .post(self.url(&format!("/jobs/{job_id}/cancel")))
            .send()
            .await?;
        let body: CancelResponse = ok_or_error(response).await?.json().await?;
        Ok(body.status)
    }
}

/// Pass successful responses through; turn the rest into errors.
async fn ok_or_error(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    Err(if status == StatusCode::NOT_FOUND {
        ClientError::NotFound(message)
    } else if status == StatusCode::SERVICE_UNAVAILABLE {
        ClientError::QueueUnavailable(message)
    } else if status.is_client_error() {
        ClientError::Submission(message)
    } else {
        ClientError::Transport(message)
    })
}

struct Decoding {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<Event, ClientError>>,
}

/// Decode an SSE response body into events. The stream ends with the body;
/// a broken body yields one `StreamDisconnect` and ends.
fn decode_events(response: Response) -> EventStream {
    let body = response
        .bytes_stream()
        .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
        .boxed();
    let state = Decoding {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
    };

    stream::unfold(Some(state), |state| async move {
        let Some(mut state) = state else {
            return None;
        };
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, Some(state)));
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    for frame in state.decoder.push(&chunk) {
                        let event = serde_json::from_str::<Event>(&frame.data).map_err(ClientError::from);
                        state.pending.push_back(event);
                    }
                }
                Some(Err(e)) => {
                    return Some((Err(ClientError::StreamDisconnect(e.to_string())), None));
                }
                None => return None,
            }
        }
    })
    .boxed()
}
