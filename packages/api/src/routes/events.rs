//! Server-sent event stream of one job's log.
//!
//! Each frame carries `id: <sequence>`, `event: <kind>` and the event as
//! JSON data. A reconnecting client passes `?since=` or `Last-Event-ID`.

use std::time::Duration;

use axum::Router;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use futures_util::{Stream, StreamExt, future};
use roam_core::{Event, JobId};
use serde::Deserialize;

use super::parse_job_id;
use crate::controller::Controller;
use crate::error::{AppError, AppResult};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct EventsQuery {
    since: Option<u64>,
}

/// First sequence to send. The query wins over `Last-Event-ID`, which
/// names the last event the client already holds.
fn resume_from(query: &EventsQuery, headers: &HeaderMap) -> u64 {
    if let Some(since) = query.since {
        return since;
    }
    headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map_or(0, |last| last.saturating_add(1))
}

fn frame(event: &Event) -> Result<SseEvent, axum::Error> {
    SseEvent::default()
        .id(event.sequence.to_string())
        .event(event.kind.as_str())
        .json_data(event)
}

async fn job_events(
    State(controller): State<Controller>,
    Path(job_id): Path<String>,
    query: Result<Query<EventsQuery>, QueryRejection>,
    headers: HeaderMap,
) -> AppResult<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>> {
    let job_id: JobId = parse_job_id(&job_id)?;
    let Query(query) =
        query.map_err(|e| AppError::BadRequest(format!("invalid query: {}", e.body_text())))?;
    let since = resume_from(&query, &headers);
    let events = controller.events(job_id, since).await?;

    // A bus failure ends the response; the client resumes with `since`.
    let frames = events.scan((), move |_, item| {
        future::ready(match item {
            Ok(event) => Some(frame(&event)),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Event stream interrupted");
                None
            }
        })
    });

    Ok(Sse::new(frames).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

pub fn router() -> Router<Controller> {
    Router::new().route("/jobs/{job_id}/events", get(job_events))
}
