//! Per-job durable event logs with resumable subscriptions.
//!
//! Every append is persisted before its sequence number is published.
//! Subscribers always read events back from the store, so a subscription
//! started at any `since` observes the same contiguous log as a live one.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use db::{DbError, EventRepository, Store};
use futures_util::stream::{self, BoxStream, StreamExt};
use roam_core::{Event, EventKind, JobId, Outcome};
use serde_json::Value;
use tokio::sync::watch;

/// Errors from the event bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("event log of job {job_id} already ended")]
    Terminated { job_id: JobId },

    #[error("event store error: {0}")]
    Store(#[from] DbError),
}

/// A lazy, finite stream of one job's events.
pub type EventStream = BoxStream<'static, Result<Event, BusError>>;

/// Published end of a job's log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tail {
    /// Sequence the next append receives.
    next: u64,
    terminated: bool,
}

impl Tail {
    fn after(event: &Event) -> Self {
        Self {
            next: event.sequence + 1,
            terminated: event.is_terminal(),
        }
    }
}

struct JobLog {
    /// Serializes appenders of one job.
    append: tokio::sync::Mutex<()>,
    tail: watch::Sender<Tail>,
}

impl JobLog {
    fn new(tail: Tail) -> Self {
        Self {
            append: tokio::sync::Mutex::new(()),
            tail: watch::Sender::new(tail),
        }
    }
}

struct BusInner {
    store: Store,
    events: EventRepository,
    logs: Mutex<HashMap<JobId, Arc<JobLog>>>,
}

/// Durable, ordered per-job event logs.
///
/// Cheap to clone; clones share the same logs.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(BusInner {
                events: store.events(),
                store,
                logs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Append an event and return its sequence number.
    ///
    /// The event is durable when this returns. Appending to a log that
    /// already holds a terminal event fails with [`BusError::Terminated`].
    pub async fn append(
        &self,
        job_id: JobId,
        kind: EventKind,
        payload: Value,
    ) -> Result<u64, BusError> {
        let log = self.log(job_id).await?;
        let guard = log.append.lock().await;

        let tail = *log.tail.borrow();
        if tail.terminated {
            return Err(BusError::Terminated { job_id });
        }

        let event = Event::new(job_id, tail.next, kind, payload);
        if let Err(e) = self.inner.events.append(&event).await {
            // Whatever is in the store now wins; reload on next access.
            drop(guard);
            self.evict(job_id, &log);
            return Err(e.into());
        }
        log.tail.send_replace(Tail::after(&event));
        drop(guard);

        tracing::debug!(job_id = %job_id, sequence = event.sequence, kind = %kind, "Event appended");

        if kind.is_terminal() {
            self.prune(job_id);
        }

        Ok(event.sequence)
    }

    /// Append the terminal event recording `outcome`.
    pub async fn append_outcome(&self, job_id: JobId, outcome: &Outcome) -> Result<u64, BusError> {
        self.append(job_id, outcome.kind(), outcome.to_payload())
            .await
    }

    /// Subscribe to a job's events starting at sequence `since`.
    ///
    /// Yields persisted events first, then live ones, and ends right after
    /// the terminal event. If `since` lies beyond the terminal event the
    /// stream is empty.
    pub fn subscribe(&self, job_id: JobId, since: u64) -> EventStream {
        let cursor = Cursor {
            bus: self.clone(),
            job_id,
            next: since,
            buffered: VecDeque::new(),
            tail: None,
            done: false,
        };

        stream::unfold(cursor, |mut cursor| async move {
            cursor.advance().await.map(|item| (item, cursor))
        })
        .boxed()
    }

    /// Persisted events with `sequence >= since`, without waiting.
    pub async fn events(&self, job_id: JobId, since: u64) -> Result<Vec<Event>, BusError> {
        Ok(self.inner.events.list_since(job_id, since).await?)
    }

    /// The most recent persisted event of a job.
    pub async fn last_event(&self, job_id: JobId) -> Result<Option<Event>, BusError> {
        Ok(self.inner.events.last(job_id).await?)
    }

    /// Check that the backing store answers.
    pub async fn health_check(&self) -> Result<(), BusError> {
        Ok(self.inner.store.health_check().await?)
    }

    fn logs(&self) -> MutexGuard<'_, HashMap<JobId, Arc<JobLog>>> {
        self.inner
            .logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The in-memory log of a job, loading its tail from the store on first use.
    async fn log(&self, job_id: JobId) -> Result<Arc<JobLog>, BusError> {
        let cached = self.logs().get(&job_id).cloned();
        if let Some(log) = cached {
            return Ok(log);
        }

        let tail = self
            .inner
            .events
            .last(job_id)
            .await?
            .map(|event| Tail::after(&event))
            .unwrap_or_default();

        let log = self
            .logs()
            .entry(job_id)
            .or_insert_with(|| Arc::new(JobLog::new(tail)))
            .clone();
        Ok(log)
    }

    /// Drop a terminated log nobody is watching.
    fn prune(&self, job_id: JobId) {
        let mut logs = self.logs();
        let idle = logs.get(&job_id).is_some_and(|log| {
            log.tail.borrow().terminated && log.tail.receiver_count() == 0
        });
        if idle {
            logs.remove(&job_id);
        }
    }

    fn evict(&self, job_id: JobId, log: &Arc<JobLog>) {
        let mut logs = self.logs();
        if logs.get(&job_id).is_some_and(|current| Arc::ptr_eq(current, log)) {
            logs.remove(&job_id);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("open_logs", &self.logs().len())
            .finish()
    }
}

/// Read position of one subscription.
struct Cursor {
    bus: EventBus,
    job_id: JobId,
    next: u64,
    buffered: VecDeque<Event>,
    tail: Option<watch::Receiver<Tail>>,
    done: bool,
}

impl Cursor {
    async fn advance(&mut self) -> Option<Result<Event, BusError>> {
        if self.done {
            return None;
        }

        loop {
            if let Some(event) = self.buffered.pop_front() {
                self.next = event.sequence + 1;
                if event.is_terminal() {
                    self.finish();
                }
                return Some(Ok(event));
            }

            if self.tail.is_none() {
                match self.bus.log(self.job_id).await {
                    Ok(log) => self.tail = Some(log.tail.subscribe()),
                    Err(e) => {
                        self.finish();
                        return Some(Err(e));
                    }
                }
            }
            let Some(rx) = self.tail.as_mut() else {
                continue;
            };

            let tail = *rx.borrow_and_update();
            if tail.next > self.next {
                match self.bus.inner.events.list_since(self.job_id, self.next).await {
                    Ok(events) if !events.is_empty() => {
                        self.buffered.extend(events);
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.finish();
                        return Some(Err(e.into()));
                    }
                }
            }

            if tail.terminated {
                self.finish();
                return None;
            }

            if rx.changed().await.is_err() {
                // The log was evicted; pick up a fresh one.
                self.tail = None;
            }
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.tail = None;
        self.bus.prune(self.job_id);
    }
}
