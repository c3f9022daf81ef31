//! Line protocol between a worker and a job process.
//!
//! The worker writes one [`ExecRequest`] as a JSON line to the child's
//! stdin. The child answers with [`ExecMessage`] JSON lines on stdout: any
//! number of `output` lines followed by exactly one `return` or `error`.

use roam_core::{CallResult, CallableRegistry, ExecutionError, JobId, JobPayload, OutputSink};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::executor::ExecutorError;

/// The call a job process should run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecRequest {
    pub job_id: JobId,
    pub payload: JobPayload,
}

/// One line written by a job process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecMessage {
    Output { data: Value },
    Return { value: Value },
    Error { kind: String, message: String },
}

impl From<CallResult> for ExecMessage {
    fn from(result: CallResult) -> Self {
        match result {
            Ok(value) => ExecMessage::Return { value },
            Err(e) => ExecMessage::Error {
                kind: e.kind,
                message: e.message,
            },
        }
    }
}

impl ExecMessage {
    /// The call result carried by a final message.
    pub fn into_result(self) -> Option<CallResult> {
        match self {
            ExecMessage::Output { .. } => None,
            ExecMessage::Return { value } => Some(Ok(value)),
            ExecMessage::Error { kind, message } => Some(Err(ExecutionError::new(kind, message))),
        }
    }
}

/// Encode a message as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, ExecutorError> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}

/// Child side of the protocol: read one request, run it, stream the answer.
pub async fn serve_exec<R, W>(
    registry: &CallableRegistry,
    input: R,
    mut output: W,
) -> Result<(), ExecutorError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    let mut input = input;
    if input.read_line(&mut line).await? == 0 {
        return Err(ExecutorError::Protocol("no request on stdin".into()));
    }
    let request: ExecRequest = serde_json::from_str(line.trim_end())?;

    tracing::debug!(job_id = %request.job_id, function = %request.payload.function, "Executing request");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink = {
        let tx = tx.clone();
        OutputSink::new(move |data| {
            let _ = tx.send(ExecMessage::Output { data });
        })
    };
    let call = registry.invoke(&request.payload, sink);

    let run = async move {
        let result = call.await;
        let _ = tx.send(ExecMessage::from(result));
    };

    let write = async {
        while let Some(message) = rx.recv().await {
            output.write_all(&encode_line(&message)?).await?;
            output.flush().await?;
        }
        Ok::<(), ExecutorError>(())
    };

    let ((), written) = tokio::join!(run, write);
    written
}
