//! Pool supervisor: keeps a fixed number of worker slots alive.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::executor::Executor;
use crate::messages::{PoolMessage, WorkerMessage};
use crate::queue::{JobQueue, MIN_PERIOD};
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Distinguishes pools started by the same process.
static POOL_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of execution slots.
    pub size: usize,
    /// Prefix of worker IDs.
    pub name: String,
    /// How long one lease request blocks.
    pub lease_wait: Duration,
    /// Renew and heartbeat period; must be shorter than the lease TTL.
    pub heartbeat_interval: Duration,
    /// Wall-clock limit for jobs that do not carry their own.
    pub exec_timeout: Duration,
    /// Output events allowed per job.
    pub max_output_events: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 4,
            name: "worker".to_string(),
            lease_wait: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(10),
            exec_timeout: Duration::from_secs(300),
            max_output_events: 10_000,
        }
    }
}

impl PoolConfig {
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_lease_wait(mut self, lease_wait: Duration) -> Self {
        self.lease_wait = lease_wait.max(MIN_PERIOD);
        self
    }

    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval.max(MIN_PERIOD);
        self
    }

    pub fn with_exec_timeout(mut self, exec_timeout: Duration) -> Self {
        self.exec_timeout = exec_timeout;
        self
    }

    pub fn with_max_output_events(mut self, max_output_events: u64) -> Self {
        self.max_output_events = max_output_events;
        self
    }
}

/// Pool supervisor arguments.
pub struct PoolArgs {
    pub config: PoolConfig,
    pub queue: JobQueue,
    pub bus: EventBus,
    pub executor: Arc<dyn Executor>,
}

struct Slot {
    worker_id: String,
    worker: ActorRef<WorkerMessage>,
}

/// State for the pool supervisor.
pub struct PoolState {
    args: PoolArgs,
    /// Prefix shared by this pool's worker IDs.
    pool_id: String,
    slots: HashMap<ActorId, Slot>,
    draining: bool,
}

impl PoolState {
    async fn spawn_slot(
        &mut self,
        myself: &ActorRef<PoolMessage>,
        worker_id: String,
    ) -> Result<(), ActorProcessingErr> {
        let args = WorkerArgs {
            worker_id: worker_id.clone(),
            queue: self.args.queue.clone(),
            bus: self.args.bus.clone(),
            executor: self.args.executor.clone(),
            config: self.args.config.clone(),
        };

        let (worker, _handle) =
            Actor::spawn_linked(None, WorkerActor, args, myself.get_cell()).await?;
        self.slots.insert(worker.get_id(), Slot { worker_id, worker });
        Ok(())
    }

    async fn slot_exited(
        &mut self,
        myself: &ActorRef<PoolMessage>,
        id: ActorId,
        reason: String,
    ) -> Result<(), ActorProcessingErr> {
        let Some(slot) = self.slots.remove(&id) else {
            return Ok(());
        };

        if self.draining {
            tracing::debug!(worker_id = %slot.worker_id, remaining = self.slots.len(), "Worker drained");
            if self.slots.is_empty() {
                myself.stop(None);
            }
            return Ok(());
        }

        tracing::warn!(worker_id = %slot.worker_id, reason = %reason, "Worker slot exited; restarting");
        self.spawn_slot(myself, slot.worker_id).await
    }
}

/// Supervisor actor owning the worker slots.
pub struct PoolSupervisor;

impl Actor for PoolSupervisor {
    type Msg = PoolMessage;
    type State = PoolState;
    type Arguments = PoolArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let pool_id = format!(
            "{}-{}-{}",
            args.config.name,
            std::process::id(),
            POOL_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        tracing::info!(pool_id = %pool_id, size = args.config.size, "Starting worker pool");

        let size = args.config.size;
        let mut state = PoolState {
            args,
            pool_id,
            slots: HashMap::new(),
            draining: false,
        };
        for index in 0..size {
            let worker_id = format!("{}-{}", state.pool_id, index);
            state.spawn_slot(&myself, worker_id).await?;
        }

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PoolMessage::Slots { reply } => {
                let _ = reply.send(state.slots.len());
            }

            PoolMessage::Drain => {
                tracing::info!(pool_id = %state.pool_id, "Draining worker pool");
                state.draining = true;
                if state.slots.is_empty() {
                    myself.stop(None);
                }
                for slot in state.slots.values() {
                    // Takes effect once the slot finishes its current job.
                    slot.worker.stop(Some("pool draining".to_string()));
                }
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                let reason = reason.unwrap_or_else(|| "stopped".to_string());
                state.slot_exited(&myself, cell.get_id(), reason).await?;
            }
            SupervisionEvent::ActorFailed(cell, error) => {
                state
                    .slot_exited(&myself, cell.get_id(), error.to_string())
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(pool_id = %state.pool_id, "Worker pool stopped");
        Ok(())
    }
}

/// Handle to a running worker pool.
#[derive(Clone)]
pub struct WorkerPool {
    supervisor: ActorRef<PoolMessage>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl WorkerPool {
    /// Start `config.size` slots leasing from `queue` and publishing to `bus`.
    pub async fn start(
        queue: JobQueue,
        bus: EventBus,
        executor: Arc<dyn Executor>,
        config: PoolConfig,
    ) -> Result<Self, ractor::SpawnErr> {
        let args = PoolArgs {
            config,
            queue,
            bus,
            executor,
        };
        let (supervisor, handle) = Actor::spawn(None, PoolSupervisor, args).await?;

        Ok(Self {
            supervisor,
            handle: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// Number of live slots.
    pub async fn slots(&self) -> usize {
        let (tx, rx) = ractor::concurrency::oneshot();
        if self
            .supervisor
            .send_message(PoolMessage::Slots { reply: tx.into() })
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Let every slot finish its current job, then stop the pool.
    pub async fn shutdown(&self) {
        let _ = self.supervisor.send_message(PoolMessage::Drain);
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("supervisor", &self.supervisor.get_id())
            .finish()
    }
}
