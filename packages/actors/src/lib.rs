//! Actor system for remote execution.
//!
//! This crate provides the Ractor-based runtime behind the controller:
//! the durable job queue, the per-job event bus and the worker pool.
//!
//! # Architecture
//!
//! - `QueueActor` - Owns job status and leases; the only writer of
//!   terminal events
//! - `EventBus` - Ordered, durable per-job event logs with resumable
//!   subscriptions
//! - `PoolSupervisor` - Keeps a fixed number of `WorkerActor` slots alive
//! - `WorkerActor` - Leases one job at a time and runs it through an
//!   [`Executor`]
//!
//! # Usage
//!
//! ```ignore
//! use actors::{EventBus, JobQueue, QueueConfig, PoolConfig, TaskExecutor, WorkerPool};
//!
//! let bus = EventBus::new(store.clone());
//! let queue = JobQueue::start(store, bus.clone(), QueueConfig::default()).await?;
//! let pool = WorkerPool::start(queue.clone(), bus.clone(), executor, PoolConfig::default()).await?;
//!
//! let job_id = queue.submit(payload).await?;
//! let mut events = bus.subscribe(job_id, 0);
//! ```

mod bus;
mod executor;
mod messages;
pub mod protocol;
mod queue;
mod queue_actor;
mod supervisor;
mod worker_actor;

pub use bus::{BusError, EventBus, EventStream};
pub use executor::{Execution, Executor, ExecutorError, ProcessExecutor, TaskExecutor};
pub use messages::{PoolMessage, QueueMessage, WorkerMessage};
pub use queue::{CancelAck, JobQueue, MIN_PERIOD, QueueConfig, QueueError};
pub use queue_actor::QueueActor;
pub use supervisor::{PoolConfig, PoolSupervisor, WorkerPool};
pub use worker_actor::WorkerActor;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
