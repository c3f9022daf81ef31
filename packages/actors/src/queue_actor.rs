//! Queue actor owning job status and leases.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use db::JobRepository;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use roam_core::{ExecutionError, Job, JobId, JobPayload, JobStatus, Lease, LeaseStatus, Outcome};
use tokio::sync::Notify;

use crate::bus::{BusError, EventBus};
use crate::messages::QueueMessage;
use crate::queue::{CancelAck, MIN_PERIOD, QueueConfig, QueueError};

/// Queue actor arguments.
pub struct QueueArgs {
    pub config: QueueConfig,
    pub store: db::Store,
    pub bus: EventBus,
    /// Signalled whenever a job becomes leasable.
    pub notify: Arc<Notify>,
}

/// State for the queue actor.
pub struct QueueActorState {
    config: QueueConfig,
    jobs: JobRepository,
    bus: EventBus,
    notify: Arc<Notify>,
    /// Queued and running jobs by ID. Finished jobs live only in the store.
    active: HashMap<JobId, Job>,
    /// Queued job IDs, oldest first.
    pending: VecDeque<JobId>,
}

impl QueueActorState {
    fn new(args: QueueArgs) -> Self {
        Self {
            config: args.config,
            jobs: args.store.jobs(),
            bus: args.bus,
            notify: args.notify,
            active: HashMap::new(),
            pending: VecDeque::new(),
        }
    }

    fn lease_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = TimeDelta::from_std(self.config.lease_ttl.max(MIN_PERIOD))
            .unwrap_or(TimeDelta::seconds(30));
        now + ttl
    }

    /// Reload unfinished jobs after a restart.
    ///
    /// Running jobs keep their persisted lease and are redelivered once it
    /// expires.
    async fn recover(&mut self) -> Result<(), QueueError> {
        let mut jobs = self.jobs.list_active().await?;
        jobs.sort_by_key(|job| (job.submitted_at, job.id));

        let mut queued = 0usize;
        let mut running = 0usize;
        for job in jobs {
            // A terminal event without a terminal status means the status
            // write was lost; the event log is authoritative.
            if let Some(outcome) = self.bus.last_event(job.id).await?.and_then(|e| e.outcome()) {
                tracing::warn!(job_id = %job.id, status = %outcome.status(), "Settling job from its event log");
                self.settle(job, &outcome).await;
                continue;
            }

            match job.status {
                JobStatus::Queued => {
                    queued += 1;
                    self.pending.push_back(job.id);
                }
                _ => running += 1,
            }
            self.active.insert(job.id, job);
        }

        if queued + running > 0 {
            tracing::info!(queued, running, "Recovered unfinished jobs");
        }
        Ok(())
    }

    async fn submit(&mut self, payload: JobPayload) -> Result<Job, QueueError> {
        payload.validate()?;

        let job = Job::new(payload).with_max_attempts(self.config.max_attempts);
        let job = self.jobs.create(&job).await?;

        tracing::info!(job_id = %job.id, function = %job.payload.function, "Job submitted");

        self.pending.push_back(job.id);
        self.active.insert(job.id, job.clone());
        self.notify.notify_waiters();

        Ok(job)
    }

    async fn lease(&mut self, worker_id: String) -> Result<Option<Job>, QueueError> {
        self.reclaim_expired().await;

        let now = Utc::now();
        while let Some(job_id) = self.pending.pop_front() {
            let Some(job) = self.active.get(&job_id) else {
                continue;
            };
            if job.status != JobStatus::Queued {
                continue;
            }

            let mut leased = job.clone();
            leased.status = JobStatus::Running;
            leased.attempt += 1;
            leased.started_at.get_or_insert(now);
            leased.lease = Some(Lease::new(&worker_id, job_id, self.lease_deadline(now)));
            leased.updated_at = now;

            if let Err(e) = self.jobs.save(&leased).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to persist lease");
                self.pending.push_front(job_id);
                return Err(e.into());
            }

            tracing::info!(
                job_id = %job_id,
                worker_id = %worker_id,
                attempt = leased.attempt,
                "Job leased"
            );

            self.active.insert(job_id, leased.clone());
            return Ok(Some(leased));
        }

        Ok(None)
    }

    async fn renew(&mut self, job_id: JobId, worker_id: String) -> Result<LeaseStatus, QueueError> {
        let now = Utc::now();
        let expires_at = self.lease_deadline(now);

        let Some(job) = self
            .active
            .get(&job_id)
            .filter(|job| job.lease_held_by(&worker_id, now).is_some())
        else {
            return Err(QueueError::LeaseLost { job_id, worker_id });
        };

        let mut renewed = job.clone();
        if let Some(lease) = renewed.lease.as_mut() {
            lease.expires_at = expires_at;
        }
        renewed.updated_at = now;
        let status = LeaseStatus {
            expires_at,
            cancel_requested: renewed.cancel_requested,
        };

        // Memory only moves once the store has the new expiry
        if let Err(e) = self.jobs.save(&renewed).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to persist renewed lease");
            return Err(e.into());
        }
        self.active.insert(job_id, renewed);

        Ok(status)
    }

    async fn complete(
        &mut self,
        job_id: JobId,
        worker_id: String,
        outcome: Outcome,
    ) -> Result<Job, QueueError> {
        let now = Utc::now();
        let held = self
            .active
            .get(&job_id)
            .is_some_and(|job| job.lease_held_by(&worker_id, now).is_some());
        if !held {
            return Err(QueueError::LeaseLost { job_id, worker_id });
        }

        self.finish(job_id, outcome).await
    }

    async fn cancel(&mut self, job_id: JobId, reason: Option<String>) -> Result<CancelAck, QueueError> {
        let status = self.active.get(&job_id).map(|job| job.status);
        match status {
            Some(JobStatus::Queued) => {
                self.finish(job_id, Outcome::Cancelled(reason)).await?;
                Ok(CancelAck::Cancelled)
            }
            Some(_) => {
                let Some(job) = self.active.get(&job_id) else {
                    return Err(QueueError::NotFound(job_id));
                };
                let mut flagged = job.clone();
                flagged.cancel_requested = true;
                flagged.updated_at = Utc::now();

                // Acknowledge only a request that survives a restart
                if let Err(e) = self.jobs.save(&flagged).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to persist cancel request");
                    return Err(e.into());
                }
                self.active.insert(job_id, flagged);
                tracing::info!(job_id = %job_id, "Cancellation requested");
                Ok(CancelAck::Requested)
            }
            None => match self.jobs.find(job_id).await? {
                Some(_) => Ok(CancelAck::AlreadyFinished),
                None => Err(QueueError::NotFound(job_id)),
            },
        }
    }

    /// Append the terminal event for `outcome`, then store the terminal status.
    async fn finish(&mut self, job_id: JobId, outcome: Outcome) -> Result<Job, QueueError> {
        let recorded = match self.bus.append_outcome(job_id, &outcome).await {
            Ok(_) => outcome,
            Err(BusError::Terminated { .. }) => {
                // Already ended; keep whatever the log says.
                let logged = self.bus.last_event(job_id).await?.and_then(|e| e.outcome());
                tracing::warn!(job_id = %job_id, "Event log already terminated");
                logged.unwrap_or(outcome)
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to append terminal event");
                return Err(e.into());
            }
        };

        let job = self
            .active
            .remove(&job_id)
            .ok_or(QueueError::NotFound(job_id))?;
        self.pending.retain(|id| *id != job_id);

        Ok(self.settle(job, &recorded).await)
    }

    /// Store the terminal status matching an already recorded outcome.
    async fn settle(&mut self, mut job: Job, outcome: &Outcome) -> Job {
        let now = Utc::now();
        job.status = outcome.status();
        job.lease = None;
        job.completed_at = Some(now);
        job.updated_at = now;

        if let Err(e) = self.jobs.save(&job).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to persist terminal status");
        }

        tracing::info!(
            job_id = %job.id,
            status = %job.status,
            attempt = job.attempt,
            "Job finished"
        );
        job
    }

    /// Return jobs with lapsed leases to the queue, or fail them once they
    /// have used up their attempts.
    async fn reclaim_expired(&mut self) {
        let now = Utc::now();
        let expired: Vec<JobId> = self
            .active
            .values()
            .filter(|job| job.lease_expired(now))
            .map(|job| job.id)
            .collect();

        let mut requeued = false;
        for job_id in expired {
            let Some(job) = self.active.get_mut(&job_id) else {
                continue;
            };

            tracing::warn!(
                job_id = %job_id,
                worker_id = job.lease.as_ref().map(|l| l.worker_id.as_str()).unwrap_or_default(),
                attempt = job.attempt,
                "Lease expired"
            );

            let outcome = if job.cancel_requested {
                Some(Outcome::Cancelled(Some("cancel requested".into())))
            } else if job.attempt >= job.max_attempts {
                Some(Outcome::Failed(ExecutionError::max_attempts(job.attempt)))
            } else {
                None
            };

            match outcome {
                Some(outcome) => {
                    if let Err(e) = self.finish(job_id, outcome).await {
                        tracing::warn!(job_id = %job_id, error = %e, "Failed to finish expired job");
                    }
                }
                None => {
                    job.status = JobStatus::Queued;
                    job.lease = None;
                    job.updated_at = now;
                    let snapshot = job.clone();

                    if let Err(e) = self.jobs.save(&snapshot).await {
                        tracing::warn!(job_id = %job_id, error = %e, "Failed to persist requeued job");
                    }
                    self.pending.push_front(job_id);
                    requeued = true;
                }
            }
        }

        if requeued {
            self.notify.notify_waiters();
        }
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError> {
        if let Some(job) = self.active.get(&job_id) {
            return Ok(Some(job.clone()));
        }
        Ok(self.jobs.find(job_id).await?)
    }
}

/// Queue actor that serializes every status and lease change.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            lease_ttl_ms = args.config.lease_ttl.as_millis() as u64,
            max_attempts = args.config.max_attempts,
            "Starting queue actor"
        );

        let mut state = QueueActorState::new(args);
        state.recover().await?;

        // Start periodic sweep
        let myself_clone = myself.clone();
        let period = state.config.sweep_interval.max(MIN_PERIOD);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if myself_clone.send_message(QueueMessage::Sweep).is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Submit { payload, reply } => {
                let _ = reply.send(state.submit(*payload).await);
            }

            QueueMessage::Lease { worker_id, reply } => {
                let _ = reply.send(state.lease(worker_id).await);
            }

            QueueMessage::Renew {
                job_id,
                worker_id,
                reply,
            } => {
                let _ = reply.send(state.renew(job_id, worker_id).await);
            }

            QueueMessage::Complete {
                job_id,
                worker_id,
                outcome,
                reply,
            } => {
                let _ = reply.send(state.complete(job_id, worker_id, outcome).await);
            }

            QueueMessage::Cancel {
                job_id,
                reason,
                reply,
            } => {
                let _ = reply.send(state.cancel(job_id, reason).await);
            }

            QueueMessage::GetJob { job_id, reply } => {
                let _ = reply.send(state.get(job_id).await);
            }

            QueueMessage::Stats { reply } => {
                let _ = reply.send(state.jobs.count_by_status().await.map_err(Into::into));
            }

            QueueMessage::Sweep => {
                state.reclaim_expired().await;
            }

            QueueMessage::Shutdown => {
                tracing::info!(active = state.active.len(), "Shutting down queue actor");
                myself.stop(None);
            }
        }

        Ok(())
    }
}
