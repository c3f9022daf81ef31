//! Wiring: store, bus, queue, worker pool and router in one place.

use std::future::Future;
use std::sync::Arc;

use actors::{EventBus, Executor, JobQueue, ProcessExecutor, QueueError, TaskExecutor, WorkerPool};
use api::{Controller, build_router};
use axum::Router;
use db::{DbError, Store};
use tokio::net::TcpListener;

use crate::callables;
use crate::config::{ExecutorKind, ServerConfig};

/// Errors starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("failed to start worker pool: {0}")]
    Pool(#[from] ractor::SpawnErr),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job execution error: {0}")]
    Exec(#[from] actors::ExecutorError),
}

/// A running controller with its worker pool.
#[derive(Debug)]
pub struct Roam {
    queue: JobQueue,
    pool: WorkerPool,
    router: Router,
}

impl Roam {
    /// Start everything `config` describes. Process executors re-run the
    /// current binary with the `exec` subcommand.
    pub async fn start(config: &ServerConfig) -> Result<Self, ServerError> {
        let executor: Arc<dyn Executor> = match config.executor {
            ExecutorKind::Process => {
                let mut executor = ProcessExecutor::new(std::env::current_exe()?, ["exec"]);
                if let Some(bytes) = config.memory_limit_bytes() {
                    executor = executor.with_memory_limit(bytes);
                }
                Arc::new(executor)
            }
            ExecutorKind::Task => Arc::new(TaskExecutor::new(callables::registry())),
        };
        Self::start_with(config, executor).await
    }

    /// Start with an explicit executor.
    pub async fn start_with(
        config: &ServerConfig,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let store = Store::connect(config.db.clone()).await?;
        let bus = EventBus::new(store.clone());
        let queue = JobQueue::start(store, bus.clone(), config.queue()).await?;
        let pool = WorkerPool::start(queue.clone(), bus.clone(), executor, config.pool()).await?;
        tracing::info!(workers = config.workers, executor = ?config.executor, "Worker pool started");

        let router = build_router(Controller::new(queue.clone(), bus), &config.router());
        Ok(Self {
            queue,
            pool,
            router,
        })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Serve HTTP on `listener` until `shutdown` resolves, then stop the
    /// worker pool and the queue.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "Serving");

        let served = axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(shutdown)
            .await;

        tracing::info!("Server stopped accepting connections, cleaning up");
        self.shutdown().await;
        served?;
        Ok(())
    }

    /// Let running jobs finish, then stop the queue.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        tracing::info!("Worker pool stopped");
        self.queue.shutdown().await;
        tracing::info!("Graceful shutdown complete");
    }
}
