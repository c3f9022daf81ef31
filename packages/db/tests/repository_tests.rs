#![allow(clippy::disallowed_methods)]

mod common;

use chrono::{Duration, Utc};
use roam_core::{Event, EventKind, JobId, JobStatus, Lease, Outcome};
use serde_json::json;
use std::error::Error;

use db::DbError;

#[tokio::test]
async fn job_records_round_trip_through_the_store() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    store.health_check().await?;
    let jobs = store.jobs();

    let job = common::add_job(2, 2).with_max_attempts(5);
    let created = jobs.create(&job).await?;
    assert_eq!(created.id, job.id);
    assert_eq!(created.status, JobStatus::Queued);
    assert_eq!(created.max_attempts, 5);

    let loaded = jobs.get(job.id).await?;
    assert_eq!(loaded.payload, job.payload);
    assert_eq!(loaded.payload.call.args, vec![json!(2), json!(2)]);

    // Lease the job and persist the running state
    let mut running = loaded.clone();
    let now = Utc::now();
    running.status = JobStatus::Running;
    running.attempt = 1;
    running.started_at = Some(now);
    running.lease = Some(Lease::new("worker-1", running.id, now + Duration::seconds(30)));
    jobs.save(&running).await?;

    let reloaded = jobs.get(job.id).await?;
    assert_eq!(reloaded.status, JobStatus::Running);
    assert_eq!(reloaded.attempt, 1);
    assert!(reloaded.lease_held_by("worker-1", now).is_some());
    assert!(reloaded.lease_held_by("worker-2", now).is_none());

    let missing = jobs.get(JobId::new()).await;
    assert!(matches!(missing, Err(DbError::NotFound(_))));
    assert!(jobs.find(JobId::new()).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn active_jobs_exclude_terminal_ones() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    let jobs = store.jobs();

    let queued = common::add_job(1, 1);
    let mut running = common::add_job(1, 2);
    let mut done = common::add_job(1, 3);
    for job in [&queued, &running, &done] {
        jobs.create(job).await?;
    }

    running.status = JobStatus::Running;
    jobs.save(&running).await?;
    done.status = JobStatus::Succeeded;
    done.completed_at = Some(Utc::now());
    jobs.save(&done).await?;

    let active = jobs.list_active().await?;
    let mut ids: Vec<JobId> = active.iter().map(|j| j.id).collect();
    ids.sort();
    let mut expected = vec![queued.id, running.id];
    expected.sort();
    assert_eq!(ids, expected);

    let counts = jobs.count_by_status().await?;
    assert_eq!(counts.get("queued"), Some(&1));
    assert_eq!(counts.get("running"), Some(&1));
    assert_eq!(counts.get("succeeded"), Some(&1));

    Ok(())
}

#[tokio::test]
async fn events_are_listed_in_sequence_order() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    let events = store.events();
    let job_id = JobId::new();
    let other = JobId::new();

    // Appended out of order on purpose
    let outcome = Outcome::Succeeded(json!(4));
    events
        .append(&Event::new(job_id, 2, outcome.kind(), outcome.to_payload()))
        .await?;
    events
        .append(&Event::new(job_id, 0, EventKind::Started, json!({"attempt": 1})))
        .await?;
    events
        .append(&Event::new(job_id, 1, EventKind::Output, json!("hello")))
        .await?;
    events
        .append(&Event::new(other, 0, EventKind::Started, json!({"attempt": 1})))
        .await?;

    let all = events.list(job_id).await?;
    let sequences: Vec<u64> = all.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    assert_eq!(all[1].payload, json!("hello"));
    assert_eq!(all[2].outcome(), Some(outcome));

    let tail = events.list_since(job_id, 1).await?;
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].sequence, 1);

    assert!(events.list_since(job_id, 3).await?.is_empty());

    let last = events.last(job_id).await?.ok_or("no last event")?;
    assert_eq!(last.sequence, 2);
    assert!(last.is_terminal());
    assert!(events.last(JobId::new()).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn a_sequence_number_is_written_once() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    let events = store.events();
    let job_id = JobId::new();

    events
        .append(&Event::new(job_id, 0, EventKind::Started, json!({})))
        .await?;
    let duplicate = events
        .append(&Event::new(job_id, 0, EventKind::Heartbeat, json!({})))
        .await;
    assert!(duplicate.is_err());

    let all = events.list(job_id).await?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].kind, EventKind::Started);

    Ok(())
}
