#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use actors::{CancelAck, MIN_PERIOD, PoolConfig, QueueConfig, QueueError};
use common::{Harness, TestResult};
use futures_util::StreamExt;
use roam_core::{
    CallArgs, CallFuture, CallableRegistry, EventKind, ExecutionError, FnCallable, JobStatus,
    Outcome, sync_callable,
};
use serde_json::json;

#[tokio::test]
async fn pool_runs_a_job_to_success() -> TestResult {
    let h = Harness::start(QueueConfig::default()).await?;
    let pool = h.pool(common::fast_pool(1)).await?;

    let job_id = h.queue.submit(common::add(2, 2)).await?;
    let events = h.collect(job_id, 0).await?;

    common::assert_well_formed(&events);
    assert_eq!(events[0].kind, EventKind::Started);
    assert_eq!(events[0].payload["attempt"], json!(1));
    assert_eq!(
        events.last().and_then(|e| e.outcome()),
        Some(Outcome::Succeeded(json!(4)))
    );

    pool.shutdown().await;
    let job = h.queue.get(job_id).await?.expect("job exists");
    assert_eq!(job.status, JobStatus::Succeeded);
    Ok(())
}

#[tokio::test]
async fn raised_errors_fail_the_job() -> TestResult {
    let h = Harness::start(QueueConfig::default()).await?;
    let pool = h.pool(common::fast_pool(1)).await?;

    let job_id = h.queue.submit(common::call("boom", CallArgs::new())).await?;
    let events = h.collect(job_id, 0).await?;

    assert_eq!(
        events.last().and_then(|e| e.outcome()),
        Some(Outcome::Failed(ExecutionError::new("ValueError", "boom")))
    );

    // Unregistered functions fail the same way
    let job_id = h.queue.submit(common::call("missing", CallArgs::new())).await?;
    let events = h.collect(job_id, 0).await?;
    let failed = events.last().and_then(|e| e.outcome());
    assert!(matches!(failed, Some(Outcome::Failed(ref e)) if e.kind == "UnknownFunction"));

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn outputs_precede_the_result() -> TestResult {
    let h = Harness::start(QueueConfig::default()).await?;
    let pool = h.pool(common::fast_pool(1)).await?;

    let job_id = h.queue.submit(common::call("count", CallArgs::new().arg(5))).await?;
    let events = h.collect(job_id, 0).await?;
    common::assert_well_formed(&events);

    let outputs: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::Output)
        .map(|e| e.payload.clone())
        .collect();
    assert_eq!(outputs, (0..5).map(|i| json!(i)).collect::<Vec<_>>());
    assert_eq!(
        events.last().and_then(|e| e.outcome()),
        Some(Outcome::Succeeded(json!(5)))
    );

    // Resuming mid-stream picks up exactly where the reader left off
    let tail = h.collect(job_id, 3).await?;
    assert_eq!(tail.first().map(|e| e.sequence), Some(3));
    assert_eq!(tail.len(), events.len() - 3);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn output_limit_fails_the_job() -> TestResult {
    let h = Harness::start(QueueConfig::default()).await?;
    let pool = h
        .pool(common::fast_pool(1).with_max_output_events(2))
        .await?;

    let job_id = h.queue.submit(common::call("count", CallArgs::new().arg(10))).await?;
    let events = h.collect(job_id, 0).await?;
    common::assert_well_formed(&events);

    let outputs = events.iter().filter(|e| e.kind == EventKind::Output).count();
    assert_eq!(outputs, 2);
    let failed = events.last().and_then(|e| e.outcome());
    assert!(matches!(failed, Some(Outcome::Failed(ref e)) if e.kind == "OutputLimitExceeded"));

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn slow_jobs_time_out() -> TestResult {
    let h = Harness::start(QueueConfig::default()).await?;
    let pool = h
        .pool(common::fast_pool(1).with_exec_timeout(Duration::from_millis(200)))
        .await?;

    let job_id = h.queue.submit(common::call("sleep", CallArgs::new().arg(5_000))).await?;
    let events = h.collect(job_id, 0).await?;

    let failed = events.last().and_then(|e| e.outcome());
    assert!(matches!(failed, Some(Outcome::Failed(ref e)) if e.kind == "Timeout"));

    // The slot is free again afterwards
    let next = h.queue.submit(common::add(1, 1)).await?;
    let events = h.collect(next, 0).await?;
    assert_eq!(
        events.last().and_then(|e| e.outcome()),
        Some(Outcome::Succeeded(json!(2)))
    );

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn running_jobs_can_be_cancelled() -> TestResult {
    let h = Harness::start(QueueConfig::default()).await?;
    let pool = h.pool(common::fast_pool(1)).await?;

    let job_id = h.queue.submit(common::call("sleep", CallArgs::new().arg(5_000))).await?;

    let mut events = h.bus.subscribe(job_id, 0);
    let started = tokio::time::timeout(common::WAIT, events.next())
        .await?
        .expect("stream yields")?;
    assert_eq!(started.kind, EventKind::Started);

    assert_eq!(h.queue.cancel(job_id, None).await?, CancelAck::Requested);

    let mut last = None;
    while let Some(event) = tokio::time::timeout(common::WAIT, events.next()).await? {
        last = Some(event?);
    }
    let last = last.expect("terminal event");
    assert_eq!(last.kind, EventKind::Cancelled);

    let job = h.queue.get(job_id).await?.expect("job exists");
    assert_eq!(job.status, JobStatus::Cancelled);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn one_slot_runs_one_job_at_a_time() -> TestResult {
    let h = Harness::start(QueueConfig::default()).await?;
    let pool = h.pool(common::fast_pool(1)).await?;

    let first = h.queue.submit(common::call("sleep", CallArgs::new().arg(150))).await?;
    let second = h.queue.submit(common::call("sleep", CallArgs::new().arg(150))).await?;

    let first_events = h.collect(first, 0).await?;
    let second_events = h.collect(second, 0).await?;
    common::assert_well_formed(&first_events);
    common::assert_well_formed(&second_events);

    let first_end = first_events.last().expect("terminal event").timestamp;
    let second_start = second_events[0].timestamp;
    assert_eq!(second_events[0].kind, EventKind::Started);
    assert!(second_start >= first_end, "second job started before the first ended");

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn every_job_finishes_exactly_once() -> TestResult {
    let h = Harness::start(QueueConfig::default()).await?;
    let pool = h.pool(common::fast_pool(3)).await?;
    assert_eq!(pool.slots().await, 3);

    let mut jobs = Vec::new();
    for i in 0..12 {
        jobs.push((i, h.queue.submit(common::add(i, i)).await?));
    }

    let mut workers = HashSet::new();
    for (i, job_id) in jobs {
        let events = h.collect(job_id, 0).await?;
        common::assert_well_formed(&events);

        // One delivery per job while workers stay healthy
        let starts: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::Started)
            .collect();
        assert_eq!(starts.len(), 1);
        let worker = starts[0].payload["worker_id"].as_str().unwrap_or_default();
        workers.insert(worker.to_string());

        assert_eq!(
            events.last().and_then(|e| e.outcome()),
            Some(Outcome::Succeeded(json!(i + i)))
        );
    }
    assert!(!workers.is_empty() && workers.len() <= 3);

    let stats = h.queue.stats().await?;
    assert_eq!(stats.get("succeeded"), Some(&12));

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn long_jobs_keep_their_lease() -> TestResult {
    // Leases far shorter than the job; heartbeats must keep it alive
    let config = QueueConfig::default()
        .with_lease_ttl(Duration::from_millis(300))
        .with_sweep_interval(Duration::from_millis(50));
    let h = Harness::start(config).await?;
    let pool = h.pool(common::fast_pool(1)).await?;

    let job_id = h.queue.submit(common::call("sleep", CallArgs::new().arg(800))).await?;
    let events = h.collect(job_id, 0).await?;
    common::assert_well_formed(&events);

    let starts = events.iter().filter(|e| e.kind == EventKind::Started).count();
    let heartbeats = events.iter().filter(|e| e.kind == EventKind::Heartbeat).count();
    assert_eq!(starts, 1);
    assert!(heartbeats >= 2, "expected heartbeats, got {heartbeats}");
    assert_eq!(
        events.last().and_then(|e| e.outcome()),
        Some(Outcome::Succeeded(json!(800)))
    );

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn drained_pools_stop() -> TestResult {
    let h = Harness::start(QueueConfig::default()).await?;
    let pool = h.pool(common::fast_pool(2)).await?;
    assert_eq!(pool.slots().await, 2);

    tokio::time::timeout(common::WAIT, pool.shutdown()).await?;
    assert_eq!(pool.slots().await, 0);
    Ok(())
}

#[tokio::test]
async fn sync_panics_fail_the_job_once() -> TestResult {
    let config = QueueConfig::default()
        .with_lease_ttl(Duration::from_millis(300))
        .with_sweep_interval(Duration::from_millis(50))
        .with_max_attempts(2);
    let h = Harness::start(config).await?;
    let registry = common::registry().with(sync_callable("explode", |_| panic!("kaboom")));
    let pool = h.pool_with(common::fast_pool(1), registry).await?;

    let job_id = h.queue.submit(common::call("explode", CallArgs::new())).await?;
    let events = h.collect(job_id, 0).await?;
    common::assert_well_formed(&events);

    // The slot survives, so the job is never redelivered
    let starts = events.iter().filter(|e| e.kind == EventKind::Started).count();
    assert_eq!(starts, 1);
    assert_eq!(
        events.last().and_then(|e| e.outcome()),
        Some(Outcome::Failed(ExecutionError::panic("kaboom")))
    );

    let next = h.queue.submit(common::add(1, 2)).await?;
    let events = h.collect(next, 0).await?;
    assert_eq!(
        events.last().and_then(|e| e.outcome()),
        Some(Outcome::Succeeded(json!(3)))
    );

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn blocking_sync_callables_time_out() -> TestResult {
    let h = Harness::start(QueueConfig::default()).await?;
    let registry = common::registry().with(sync_callable("stall", |_| {
        std::thread::sleep(Duration::from_millis(1_500));
        Ok(json!("done"))
    }));
    let pool = h
        .pool_with(
            common::fast_pool(1).with_exec_timeout(Duration::from_millis(400)),
            registry,
        )
        .await?;

    let job_id = h.queue.submit(common::call("stall", CallArgs::new())).await?;
    let events = h.collect(job_id, 0).await?;
    common::assert_well_formed(&events);

    // Heartbeats keep flowing while the callable blocks its thread
    let heartbeats = events.iter().filter(|e| e.kind == EventKind::Heartbeat).count();
    assert!(heartbeats >= 2, "expected heartbeats, got {heartbeats}");
    let failed = events.last().and_then(|e| e.outcome());
    assert!(matches!(failed, Some(Outcome::Failed(ref e)) if e.kind == "Timeout"));

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn zero_periods_are_raised_to_the_floor() -> TestResult {
    let pool_config = PoolConfig::default()
        .with_lease_wait(Duration::ZERO)
        .with_heartbeat_interval(Duration::ZERO);
    assert_eq!(pool_config.lease_wait, MIN_PERIOD);
    assert_eq!(pool_config.heartbeat_interval, MIN_PERIOD);

    let queue_config = QueueConfig::default()
        .with_lease_ttl(Duration::ZERO)
        .with_sweep_interval(Duration::ZERO);
    assert_eq!(queue_config.lease_ttl, MIN_PERIOD);
    assert_eq!(queue_config.sweep_interval, MIN_PERIOD);

    // Fields set directly are floored where they are used
    let h = Harness::start(QueueConfig {
        sweep_interval: Duration::ZERO,
        ..QueueConfig::default()
    })
    .await?;
    let pool = h
        .pool(PoolConfig {
            lease_wait: Duration::ZERO,
            heartbeat_interval: Duration::ZERO,
            ..common::fast_pool(1)
        })
        .await?;

    let job_id = h.queue.submit(common::call("sleep", CallArgs::new().arg(100))).await?;
    let events = h.collect(job_id, 0).await?;
    common::assert_well_formed(&events);

    let starts = events.iter().filter(|e| e.kind == EventKind::Started).count();
    assert_eq!(starts, 1);
    assert_eq!(
        events.last().and_then(|e| e.outcome()),
        Some(Outcome::Succeeded(json!(100)))
    );
    assert_eq!(pool.slots().await, 1);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn lapsed_leases_are_abandoned_and_redelivered() -> TestResult {
    // The queue forgets a lease long before the slot's next renewal
    let config = QueueConfig::default()
        .with_lease_ttl(Duration::from_millis(200))
        .with_sweep_interval(Duration::from_millis(50));
    let h = Harness::start(config).await?;

    let calls = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));
    let stall_once = {
        let (calls, finished) = (calls.clone(), finished.clone());
        FnCallable::new("stall_once", move |_args, _out| -> CallFuture {
            let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
            let finished = finished.clone();
            Box::pin(async move {
                if first {
                    tokio::time::sleep(Duration::from_millis(1_000)).await;
                    finished.store(true, Ordering::SeqCst);
                }
                Ok(json!("done"))
            })
        })
    };
    let pool = h
        .pool_with(
            common::fast_pool(2).with_heartbeat_interval(Duration::from_millis(600)),
            CallableRegistry::new().with(stall_once),
        )
        .await?;

    let job_id = h.queue.submit(common::call("stall_once", CallArgs::new())).await?;
    let events = h.collect(job_id, 0).await?;
    common::assert_well_formed(&events);

    let starts: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::Started)
        .collect();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[0].payload["attempt"], json!(1));
    assert_eq!(starts[1].payload["attempt"], json!(2));
    assert_ne!(starts[0].payload["worker_id"], starts[1].payload["worker_id"]);
    assert_eq!(
        events.last().and_then(|e| e.outcome()),
        Some(Outcome::Succeeded(json!("done")))
    );

    // Past the first slot's renewal and its callable's natural end
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert!(!finished.load(Ordering::SeqCst), "first attempt ran to completion");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let first_worker = starts[0].payload["worker_id"].as_str().unwrap_or_default();
    assert!(matches!(
        h.queue.renew(job_id, first_worker).await,
        Err(QueueError::LeaseLost { .. })
    ));
    assert_eq!(h.collect(job_id, 0).await?.len(), events.len());

    let job = h.queue.get(job_id).await?.expect("job exists");
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.attempt, 2);

    pool.shutdown().await;
    Ok(())
}
