//! Client proxy: remote functions that read like local ones.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use roam_core::{CallArgs, CallableRegistry, CancelAck, EventKind, JobId, JobPayload, Outcome, OutputSink};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ClientError;
use crate::gateway::{EventStream, JobGateway};
use crate::http::HttpGateway;

/// Reconnect behaviour while following a job's events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Consecutive reconnects without progress before giving up.
    pub max_reconnects: u32,
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_reconnects: 5,
            reconnect_delay: Duration::from_millis(250),
        }
    }
}

impl ClientConfig {
    pub fn with_max_reconnects(mut self, max_reconnects: u32) -> Self {
        self.max_reconnects = max_reconnects;
        self
    }

    pub fn with_reconnect_delay(mut self, reconnect_delay: Duration) -> Self {
        self.reconnect_delay = reconnect_delay;
        self
    }
}

type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;
type OutputCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Where remote functions run, and how to reach it.
///
/// Cheap to clone; clones share the gateway.
pub struct RemoteEnv<G = HttpGateway> {
    gateway: Arc<G>,
    config: ClientConfig,
    local: Arc<CallableRegistry>,
    run_locally: Predicate,
}

impl<G> Clone for RemoteEnv<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            config: self.config.clone(),
            local: self.local.clone(),
            run_locally: self.run_locally.clone(),
        }
    }
}

impl<G> fmt::Debug for RemoteEnv<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteEnv")
            .field("config", &self.config)
            .field("local", &self.local)
            .finish()
    }
}

impl RemoteEnv<HttpGateway> {
    /// Talk to the controller at `base_url`.
    pub fn connect(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Self::new(HttpGateway::new(base_url)?))
    }
}

impl<G: JobGateway> RemoteEnv<G> {
    pub fn new(gateway: G) -> Self {
        Self {
            gateway: Arc::new(gateway),
            config: ClientConfig::default(),
            local: Arc::new(CallableRegistry::new()),
            run_locally: Arc::new(|| false),
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Callables available for in-process execution.
    pub fn with_local_registry(mut self, registry: CallableRegistry) -> Self {
        self.local = Arc::new(registry);
        self
    }

    /// Run every call in-process instead of submitting it.
    pub fn run_locally(self, local: bool) -> Self {
        self.run_locally_when(move || local)
    }

    /// Decide per call whether to run in-process.
    pub fn run_locally_when(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.run_locally = Arc::new(predicate);
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// A typed handle on the remote callable `name`.
    pub fn function<R: DeserializeOwned>(&self, name: impl Into<String>) -> RemoteFn<R, G> {
        RemoteFn {
            env: self.clone(),
            name: name.into(),
            timeout_secs: None,
            on_output: None,
            _result: PhantomData,
        }
    }

    pub async fn submit(&self, payload: &JobPayload) -> Result<JobId, ClientError> {
        self.gateway.submit(payload).await
    }

    pub async fn cancel(&self, job_id: JobId) -> Result<CancelAck, ClientError> {
        self.gateway.cancel(job_id).await
    }

    /// Follow a job's events to its terminal event and return the value it
    /// produced. Disconnects resume after the last event seen.
    pub async fn wait(
        &self,
        job_id: JobId,
        on_output: Option<&(dyn Fn(&Value) + Send + Sync)>,
    ) -> Result<Value, ClientError> {
        let mut since = 0u64;
        let mut reconnects = 0u32;

        loop {
            let reason = match self.gateway.events(job_id, since).await {
                Ok(events) => match follow(events, &mut since, &mut reconnects, on_output).await {
                    Ok(outcome) => return settle(job_id, outcome),
                    Err(e) => e,
                },
                Err(e) => e,
            };

            if !reason.is_retryable() || reconnects >= self.config.max_reconnects {
                return Err(reason);
            }
            reconnects += 1;
            tracing::debug!(job_id = %job_id, since, attempt = reconnects, error = %reason, "Reconnecting to event stream");
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    async fn run_local(
        &self,
        payload: &JobPayload,
        on_output: Option<OutputCallback>,
    ) -> Result<Value, ClientError> {
        tracing::debug!(function = %payload.function, "Running call in-process");
        let sink = match on_output {
            Some(callback) => OutputSink::new(move |value| callback(&value)),
            None => OutputSink::discard(),
        };
        Ok(self.local.invoke(payload, sink).await?)
    }
}

/// Read events until the terminal one, advancing `since` past each event.
async fn follow(
    mut events: EventStream,
    since: &mut u64,
    reconnects: &mut u32,
    on_output: Option<&(dyn Fn(&Value) + Send + Sync)>,
) -> Result<Outcome, ClientError> {
    while let Some(item) = events.next().await {
        let event = item?;
        if event.sequence < *since {
            continue;
        }
        *since = event.sequence + 1;
        *reconnects = 0;

        if event.kind == EventKind::Output {
            if let Some(callback) = on_output {
                callback(&event.payload);
            }
        }
        if let Some(outcome) = event.outcome() {
            return Ok(outcome);
        }
    }
    Err(ClientError::StreamDisconnect(
        "stream ended before the terminal event".to_string(),
    ))
}

fn settle(job_id: JobId, outcome: Outcome) -> Result<Value, ClientError> {
    match outcome {
        Outcome::Succeeded(value) => Ok(value),
        Outcome::Failed(error) => Err(error.into()),
        Outcome::Cancelled(_) => Err(ClientError::Cancelled { job_id }),
    }
}

/// A remote callable bound to an environment.
///
/// [`RemoteFn::call`] is the non-blocking entry point;
/// [`RemoteFn::call_blocking`] drives the same call on a private runtime.
pub struct RemoteFn<R, G = HttpGateway> {
    env: RemoteEnv<G>,
    name: String,
    timeout_secs: Option<u64>,
    on_output: Option<OutputCallback>,
    _result: PhantomData<fn() -> R>,
}

impl<R, G> Clone for RemoteFn<R, G> {
    fn clone(&self) -> Self {
        Self {
            env: self.env.clone(),
            name: self.name.clone(),
            timeout_secs: self.timeout_secs,
            on_output: self.on_output.clone(),
            _result: PhantomData,
        }
    }
}

impl<R, G> fmt::Debug for RemoteFn<R, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFn")
            .field("name", &self.name)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl<R: DeserializeOwned, G: JobGateway> RemoteFn<R, G> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wall-clock limit for each execution of this function.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Receive the callable's incremental output as it is emitted.
    pub fn on_output(mut self, callback: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_output = Some(Arc::new(callback));
        self
    }

    pub fn payload(&self, args: CallArgs) -> JobPayload {
        let payload = JobPayload::new(self.name.clone(), args);
        match self.timeout_secs {
            Some(secs) => payload.with_timeout(secs),
            None => payload,
        }
    }

    /// Run the call and wait for its result without blocking the thread.
    pub async fn call(&self, args: CallArgs) -> Result<R, ClientError> {
        let payload = self.payload(args);

        let value = if (self.env.run_locally)() {
            self.env.run_local(&payload, self.on_output.clone()).await?
        } else {
            let job_id = self.env.submit(&payload).await?;
            tracing::debug!(job_id = %job_id, function = %self.name, "Waiting for remote result");
            self.env.wait(job_id, self.on_output.as_deref()).await?
        };

        Ok(serde_json::from_value(value)?)
    }

    /// Run the call and block the current thread until it finishes.
    ///
    /// Fails with [`ClientError::BlockingInAsyncContext`] when called from
    /// inside a tokio runtime.
    pub fn call_blocking(&self, args: CallArgs) -> Result<R, ClientError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(ClientError::BlockingInAsyncContext);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to start runtime: {e}")))?;
        runtime.block_on(self.call(args))
    }
}
