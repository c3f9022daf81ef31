//! Job executors: where a leased job's callable actually runs.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use futures_util::FutureExt;
use roam_core::{CallResult, CallableRegistry, ExecutionError, Job, OutputSink};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::{ExecMessage, ExecRequest, encode_line};

/// Errors starting or talking to an execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("failed to spawn job process: {0}")]
    Spawn(std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A running job.
pub struct Execution {
    /// Incremental output, in emission order.
    pub outputs: mpsc::UnboundedReceiver<Value>,
    /// Resolves to the call result. Aborting it stops the job.
    pub handle: JoinHandle<CallResult>,
}

/// Starts leased jobs in an isolated context.
pub trait Executor: Send + Sync + 'static {
    /// Start executing `job`. Must be called from within a tokio runtime.
    fn start(&self, job: &Job) -> Result<Execution, ExecutorError>;
}

/// Runs callables as tokio tasks inside the worker process.
///
/// A panicking callable fails its job without taking the slot down.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    registry: Arc<CallableRegistry>,
}

impl TaskExecutor {
    pub fn new(registry: CallableRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}

impl Executor for TaskExecutor {
    fn start(&self, job: &Job) -> Result<Execution, ExecutorError> {
        let (tx, outputs) = mpsc::unbounded_channel();
        let sink = OutputSink::new(move |value| {
            let _ = tx.send(value);
        });
        let registry = self.registry.clone();
        let payload = job.payload.clone();

        // Resolve inside the task so nothing the callable does runs on the slot
        let handle = tokio::spawn(async move {
            let call = async move { registry.invoke(&payload, sink).await };
            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(ExecutionError::from_panic(payload)),
            }
        });

        Ok(Execution { outputs, handle })
    }
}

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Runs every job in a fresh child process speaking the exec line protocol.
///
/// The child is killed when the execution is aborted or dropped.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: PathBuf,
    args: Vec<OsString>,
    memory_limit_bytes: Option<u64>,
}

impl ProcessExecutor {
    /// Run `program args...` for each job.
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            memory_limit_bytes: None,
        }
    }

    /// Cap the address space of each job process (unix only).
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = Some(bytes);
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        if let Some(bytes) = self.memory_limit_bytes {
            let limit_address_space = move || {
                let limit = libc::rlimit {
                    rlim_cur: bytes as libc::rlim_t,
                    rlim_max: bytes as libc::rlim_t,
                };
                // SAFETY: setrlimit is async-signal-safe and only touches the child.
                if unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) } != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            };
            // SAFETY: the hook runs between fork and exec and allocates nothing.
            unsafe {
                command.pre_exec(limit_address_space);
            }
        }

        command
    }
}

impl Executor for ProcessExecutor {
    fn start(&self, job: &Job) -> Result<Execution, ExecutorError> {
        let mut child = self.command().spawn().map_err(ExecutorError::Spawn)?;

        let request = encode_line(&ExecRequest {
            job_id: job.id,
            payload: job.payload.clone(),
        })?;
        let (Some(mut stdin), Some(stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(ExecutorError::Protocol("job process stdio not captured".into()));
        };

        let (tx, outputs) = mpsc::unbounded_channel();
        let job_id = job.id;

        let handle = tokio::spawn(async move {
            let stderr_task = tokio::spawn(async move {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text).await;
                text
            });

            if let Err(e) = async {
                stdin.write_all(&request).await?;
                stdin.shutdown().await
            }
            .await
            {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to send request to job process");
            }
            drop(stdin);

            let mut result = None;
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<ExecMessage>(&line) {
                        Ok(ExecMessage::Output { data }) => {
                            let _ = tx.send(data);
                        }
                        Ok(message) => result = message.into_result(),
                        Err(e) => {
                            tracing::debug!(job_id = %job_id, error = %e, "Ignoring malformed line from job process");
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Failed reading job process output");
                        break;
                    }
                }
            }

            let status = child.wait().await;
            let stderr_text = stderr_task.await.unwrap_or_default();

            match result {
                Some(result) => result,
                None => {
                    let status = match status {
                        Ok(status) => status.to_string(),
                        Err(e) => e.to_string(),
                    };
                    Err(ExecutionError::new(
                        "ProcessError",
                        format!(
                            "job process exited without a result ({}){}",
                            status,
                            stderr_tail(&stderr_text)
                        ),
                    ))
                }
            }
        });

        Ok(Execution { outputs, handle })
    }
}

fn stderr_tail(text: &str) -> String {
    let mut tail: VecDeque<&str> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    if tail.is_empty() {
        String::new()
    } else {
        format!(": {}", tail.into_iter().collect::<Vec<_>>().join("\n"))
    }
}
