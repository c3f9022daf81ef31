//! Named remote callables and the registry workers resolve them from.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::{CallArgs, ExecutionError, JobPayload};

/// Result type for remote callables.
pub type CallResult = Result<Value, ExecutionError>;

/// Future type for async remote callables.
pub type CallFuture = Pin<Box<dyn Future<Output = CallResult> + Send>>;

/// Where a running callable sends incremental output.
#[derive(Clone)]
pub struct OutputSink {
    emit: Arc<dyn Fn(Value) + Send + Sync>,
}

impl OutputSink {
    pub fn new(emit: impl Fn(Value) + Send + Sync + 'static) -> Self {
        Self {
            emit: Arc::new(emit),
        }
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    /// Emit one piece of output.
    pub fn emit(&self, value: impl Into<Value>) {
        (self.emit)(value.into());
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink").finish_non_exhaustive()
    }
}

/// Trait for remote callables.
///
/// Implement this trait to make a function invocable by name.
pub trait RemoteCallable: Send + Sync + 'static {
    /// The name callers use to reach this callable.
    fn name(&self) -> &str;

    /// Run the callable with decoded arguments.
    fn call(&self, args: CallArgs, output: OutputSink) -> CallFuture;
}

/// Registry for remote callables.
///
/// Maps names to callables for dynamic dispatch.
#[derive(Default, Clone)]
pub struct CallableRegistry {
    callables: HashMap<String, Arc<dyn RemoteCallable>>,
}

impl CallableRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            callables: HashMap::new(),
        }
    }

    /// Register a callable under its name, replacing any previous one.
    pub fn register<C: RemoteCallable>(&mut self, callable: C) {
        let name = callable.name().to_string();
        self.callables.insert(name, Arc::new(callable));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<C: RemoteCallable>(mut self, callable: C) -> Self {
        self.register(callable);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RemoteCallable>> {
        self.callables.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callables.contains_key(name)
    }

    /// List all registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.callables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve and start the call described by `payload`.
    ///
    /// Unknown names resolve to a future that fails with `UnknownFunction`.
    pub fn invoke(&self, payload: &JobPayload, output: OutputSink) -> CallFuture {
        match self.get(&payload.function) {
            Some(callable) => callable.call(payload.call.clone(), output),
            None => {
                let error = ExecutionError::unknown_function(&payload.function);
                Box::pin(async move { Err(error) })
            }
        }
    }
}

impl fmt::Debug for CallableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableRegistry")
            .field("callables", &self.names())
            .finish()
    }
}

/// A closure-based remote callable.
pub struct FnCallable<F>
where
    F: Fn(CallArgs, OutputSink) -> CallFuture + Send + Sync + 'static,
{
    name: String,
    handler: F,
}

impl<F> FnCallable<F>
where
    F: Fn(CallArgs, OutputSink) -> CallFuture + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> RemoteCallable for FnCallable<F>
where
    F: Fn(CallArgs, OutputSink) -> CallFuture + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: CallArgs, output: OutputSink) -> CallFuture {
        (self.handler)(args, output)
    }
}

/// Wrap a synchronous function as a remote callable.
///
/// The function runs on tokio's blocking pool when the returned future is
/// first polled, so it never stalls the caller's task. A panic becomes a
/// `Panic` error. Dropping the future detaches a call that already started.
pub fn sync_callable<G>(
    name: impl Into<String>,
    f: G,
) -> FnCallable<impl Fn(CallArgs, OutputSink) -> CallFuture + Send + Sync + 'static>
where
    G: Fn(CallArgs) -> CallResult + Send + Sync + 'static,
{
    let f = Arc::new(f);
    FnCallable::new(name, move |args, _output| {
        let f = f.clone();
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || f(args)).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(ExecutionError::from_panic(e.into_panic())),
                Err(e) => Err(ExecutionError::raised(e.to_string())),
            }
        }) as CallFuture
    })
}

/// Build a [`FnCallable`] from an async block.
///
/// ```ignore
/// let add = callable!("add", |args, _out| {
///     Ok(json!(args.get::<i64>(0)? + args.get::<i64>(1)?))
/// });
/// ```
#[macro_export]
macro_rules! callable {
    ($name:expr, |$args:ident, $out:ident| $body:expr) => {
        $crate::FnCallable::new(
            $name,
            |$args: $crate::CallArgs, $out: $crate::OutputSink| -> $crate::CallFuture {
                Box::pin(async move {
                    let result: $crate::CallResult = { $body };
                    result
                })
            },
        )
    };
}
