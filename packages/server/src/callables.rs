//! Callables shipped with the `roam` binary.

use std::time::Duration;

use roam_core::{CallableRegistry, ExecutionError, callable, sync_callable};
use serde_json::{Value, json};

/// Every callable the server and its job processes can run.
pub fn registry() -> CallableRegistry {
    CallableRegistry::new()
        .with(sync_callable("add", |args| {
            Ok(json!(args.get::<i64>(0)? + args.get::<i64>(1)?))
        }))
        .with(sync_callable("echo", |args| {
            let value: Value = args.get(0)?;
            Ok(value)
        }))
        .with(callable!("sleep", |args, _out| {
            let ms: u64 = args.get(0)?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!(ms))
        }))
        .with(sync_callable("fail", |args| {
            let message = args.get::<String>(0).unwrap_or_else(|_| "failed".to_string());
            let kind: Option<String> = args.kwarg_value("kind")?;
            Err(match kind {
                Some(kind) => ExecutionError::new(kind, message),
                None => ExecutionError::raised(message),
            })
        }))
        // Streams 0..n as output, then returns n
        .with(callable!("count", |args, out| {
            let n: u64 = args.get(0)?;
            let delay: u64 = args.kwarg_value("delay_ms")?.unwrap_or(0);
            for i in 0..n {
                out.emit(i);
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
            Ok(json!(n))
        }))
}
