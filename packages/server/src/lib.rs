//! The `roam` server: configuration, telemetry and process wiring around
//! the queue, the worker pool and the HTTP controller.

mod app;
pub mod callables;
mod config;
pub mod telemetry;

pub use app::{Roam, ServerError};
pub use config::{ConfigError, ExecutorKind, LogFormat, ServerConfig};
