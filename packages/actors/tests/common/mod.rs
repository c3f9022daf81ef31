#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{EventBus, JobQueue, PoolConfig, QueueConfig, TaskExecutor, WorkerPool};
use db::Store;
use futures_util::StreamExt;
use roam_core::{CallArgs, CallableRegistry, Event, ExecutionError, JobId, JobPayload, sync_callable};
use serde_json::json;

pub type TestResult = Result<(), Box<dyn Error>>;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(10);

/// Queue and bus over a fresh in-memory store.
pub struct Harness {
    pub store: Store,
    pub bus: EventBus,
    pub queue: JobQueue,
}

impl Harness {
    pub async fn start(config: QueueConfig) -> Result<Self, Box<dyn Error>> {
        let store = Store::memory().await?;
        Self::on(store, config).await
    }

    /// Start a queue over an existing store, as a restarted controller would.
    pub async fn on(store: Store, config: QueueConfig) -> Result<Self, Box<dyn Error>> {
        let bus = EventBus::new(store.clone());
        let queue = JobQueue::start(store.clone(), bus.clone(), config).await?;
        Ok(Self { store, bus, queue })
    }

    pub async fn pool(&self, config: PoolConfig) -> Result<WorkerPool, Box<dyn Error>> {
        self.pool_with(config, registry()).await
    }

    /// A pool running callables from `registry` as tasks.
    pub async fn pool_with(
        &self,
        config: PoolConfig,
        registry: CallableRegistry,
    ) -> Result<WorkerPool, Box<dyn Error>> {
        let executor = Arc::new(TaskExecutor::new(registry));
        Ok(WorkerPool::start(self.queue.clone(), self.bus.clone(), executor, config).await?)
    }

    /// Every event of a job from `since` through its terminal event.
    pub async fn collect(&self, job_id: JobId, since: u64) -> Result<Vec<Event>, Box<dyn Error>> {
        let events: Vec<_> = tokio::time::timeout(WAIT, self.bus.subscribe(job_id, since).collect())
            .await?;
        Ok(events.into_iter().collect::<Result<Vec<Event>, _>>()?)
    }
}

/// Pool settings that keep tests fast.
pub fn fast_pool(size: usize) -> PoolConfig {
    PoolConfig::default()
        .with_size(size)
        .with_lease_wait(Duration::from_millis(200))
        .with_heartbeat_interval(Duration::from_millis(50))
}

pub fn registry() -> CallableRegistry {
    CallableRegistry::new()
        .with(sync_callable("add", |args| {
            Ok(json!(args.get::<i64>(0)? + args.get::<i64>(1)?))
        }))
        .with(sync_callable("boom", |_| {
            Err(ExecutionError::new("ValueError", "boom"))
        }))
        .with(roam_core::callable!("count", |args, out| {
            let n: u64 = args.get(0)?;
            for i in 0..n {
                out.emit(i);
            }
            Ok(json!(n))
        }))
        .with(roam_core::callable!("sleep", |args, _out| {
            let ms: u64 = args.get(0)?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!(ms))
        }))
}

pub fn call(function: &str, args: CallArgs) -> JobPayload {
    JobPayload::new(function, args)
}

pub fn add(a: i64, b: i64) -> JobPayload {
    call("add", CallArgs::new().arg(a).arg(b))
}

/// Assert sequences run 0, 1, 2... with exactly one terminal event, last.
pub fn assert_well_formed(events: &[Event]) {
    for (index, event) in events.iter().enumerate() {
        assert_eq!(event.sequence, index as u64, "gap or reorder at {index}");
    }
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "expected exactly one terminal event");
    assert!(events.last().is_some_and(Event::is_terminal));
}
