//! Worker actor: one persistent execution slot.

use std::sync::Arc;
use std::time::Duration;

use ractor::{Actor, ActorProcessingErr, ActorRef};
use roam_core::{EventKind, ExecutionError, Job, JobId, Outcome};
use serde_json::{Value, json};
use tokio::task::JoinError;
use tokio::time::{Instant, MissedTickBehavior};

use crate::bus::{BusError, EventBus};
use crate::executor::Executor;
use crate::messages::WorkerMessage;
use crate::queue::{JobQueue, MIN_PERIOD, QueueError};
use crate::supervisor::PoolConfig;

/// Pause before polling again after the queue refused a lease request.
const UNAVAILABLE_BACKOFF: Duration = Duration::from_secs(1);

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub queue: JobQueue,
    pub bus: EventBus,
    pub executor: Arc<dyn Executor>,
    pub config: PoolConfig,
}

/// State for the worker actor.
pub type WorkerActorState = WorkerArgs;

/// How a slot leaves a job.
enum Finish {
    /// Record this outcome through the queue.
    Complete(Outcome),
    /// Walk away without writing anything else.
    Abandon(&'static str),
}

fn cancelled() -> Finish {
    Finish::Complete(Outcome::Cancelled(Some("cancel requested".into())))
}

fn abandon_after(job_id: JobId, error: BusError) -> Finish {
    match error {
        BusError::Terminated { .. } => Finish::Abandon("event log already ended"),
        BusError::Store(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to append event");
            Finish::Abandon("event store unavailable")
        }
    }
}

fn outcome_of(result: Result<Result<Value, ExecutionError>, JoinError>) -> Outcome {
    match result {
        Ok(Ok(value)) => Outcome::Succeeded(value),
        Ok(Err(error)) => Outcome::Failed(error),
        Err(e) => Outcome::Failed(ExecutionError::panic(e.to_string())),
    }
}

impl WorkerArgs {
    /// Lease one job (waiting up to the lease wait) and run it to the end.
    async fn poll(&self) {
        let wait = self.config.lease_wait.max(MIN_PERIOD);
        match self.queue.lease(&self.worker_id, wait).await {
            Ok(Some(job)) => self.run(job).await,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(worker_id = %self.worker_id, error = %e, "Lease request failed");
                tokio::time::sleep(UNAVAILABLE_BACKOFF).await;
            }
        }
    }

    async fn run(&self, job: Job) {
        let job_id = job.id;
        tracing::info!(
            job_id = %job_id,
            worker_id = %self.worker_id,
            attempt = job.attempt,
            function = %job.payload.function,
            "Running job"
        );

        match self.drive(&job).await {
            Finish::Complete(outcome) => {
                match self.queue.complete(job_id, &self.worker_id, outcome).await {
                    Ok(done) => {
                        tracing::info!(job_id = %job_id, worker_id = %self.worker_id, status = %done.status, "Job completed");
                    }
                    Err(QueueError::LeaseLost { .. }) => {
                        tracing::debug!(job_id = %job_id, worker_id = %self.worker_id, "Lease lost before completion");
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, worker_id = %self.worker_id, error = %e, "Failed to complete job");
                    }
                }
            }
            Finish::Abandon(reason) => {
                tracing::debug!(job_id = %job_id, worker_id = %self.worker_id, reason, "Abandoning job");
            }
        }
    }

    /// Execute a leased job, streaming its events, until it reaches an outcome
    /// or the lease is lost.
    async fn drive(&self, job: &Job) -> Finish {
        let started = json!({ "worker_id": self.worker_id, "attempt": job.attempt });
        if let Err(e) = self.bus.append(job.id, EventKind::Started, started).await {
            return abandon_after(job.id, e);
        }

        // A cancel may have been requested between submission and lease.
        match self.queue.renew(job.id, &self.worker_id).await {
            Ok(status) if status.cancel_requested => return cancelled(),
            Ok(_) => {}
            Err(QueueError::LeaseLost { .. }) => return Finish::Abandon("lease lost"),
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to renew lease");
            }
        }

        let mut execution = match self.executor.start(job) {
            Ok(execution) => execution,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to start execution");
                return Finish::Complete(Outcome::Failed(ExecutionError::new(
                    "ExecutorError",
                    e.to_string(),
                )));
            }
        };

        let timeout = job
            .payload
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.exec_timeout);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let period = self.config.heartbeat_interval.max(MIN_PERIOD);
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut emitted = 0u64;
        let mut outputs_open = true;

        let finish = loop {
            tokio::select! {
                biased;

                // Renewal first so a busy output stream cannot starve the lease.
                _ = heartbeat.tick() => match self.queue.renew(job.id, &self.worker_id).await {
                    Ok(status) if status.cancel_requested => break cancelled(),
                    Ok(status) => {
                        let payload = json!({ "expires_at": status.expires_at });
                        if let Err(e) = self.bus.append(job.id, EventKind::Heartbeat, payload).await {
                            break abandon_after(job.id, e);
                        }
                    }
                    Err(QueueError::LeaseLost { .. }) => break Finish::Abandon("lease lost"),
                    Err(e) => {
                        tracing::warn!(job_id = %job.id, error = %e, "Failed to renew lease");
                    }
                },

                _ = &mut deadline => {
                    break Finish::Complete(Outcome::Failed(ExecutionError::timeout(timeout)));
                }

                data = execution.outputs.recv(), if outputs_open => match data {
                    Some(data) => {
                        if let Err(finish) = self.emit_output(job.id, &mut emitted, data).await {
                            break finish;
                        }
                    }
                    None => outputs_open = false,
                },

                result = &mut execution.handle => {
                    // Output emitted before returning precedes the terminal event.
                    let mut drained = Ok(());
                    while let Ok(data) = execution.outputs.try_recv() {
                        drained = self.emit_output(job.id, &mut emitted, data).await;
                        if drained.is_err() {
                            break;
                        }
                    }
                    break match drained {
                        Ok(()) => Finish::Complete(outcome_of(result)),
                        Err(finish) => finish,
                    };
                }
            }
        };

        // Stops the callable or kills the job process if it is still running.
        execution.handle.abort();
        finish
    }

    async fn emit_output(&self, job_id: JobId, emitted: &mut u64, data: Value) -> Result<(), Finish> {
        let limit = self.config.max_output_events;
        if *emitted >= limit {
            return Err(Finish::Complete(Outcome::Failed(ExecutionError::new(
                "OutputLimitExceeded",
                format!("job emitted more than {} output events", limit),
            ))));
        }

        self.bus
            .append(job_id, EventKind::Output, data)
            .await
            .map_err(|e| abandon_after(job_id, e))?;
        *emitted += 1;
        Ok(())
    }
}

/// Worker actor: leases jobs one at a time and runs them.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(worker_id = %args.worker_id, "Starting worker");
        Ok(args)
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        myself.send_message(WorkerMessage::Poll)?;
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                state.poll().await;
                // Fails only once the slot is stopping.
                let _ = myself.send_message(WorkerMessage::Poll);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(worker_id = %state.worker_id, "Worker stopped");
        Ok(())
    }
}
