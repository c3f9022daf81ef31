//! Client side of remote execution.
//!
//! A [`RemoteEnv`] hands out [`RemoteFn`] handles. Calling one submits a job
//! to the controller, follows the job's event stream (reconnecting from the
//! last sequence seen) and returns the decoded result, or the remote error.
//!
//! ```ignore
//! use client::RemoteEnv;
//! use roam_core::CallArgs;
//!
//! let env = RemoteEnv::connect("http://127.0.0.1:8080")?;
//! let add = env.function::<i64>("add");
//! assert_eq!(add.call(CallArgs::new().arg(2).arg(2)).await?, 4);
//! ```

mod error;
mod gateway;
mod http;
mod proxy;
pub mod sse;

pub use error::ClientError;
pub use gateway::{EventStream, JobGateway};
pub use http::HttpGateway;
pub use proxy::{ClientConfig, RemoteEnv, RemoteFn};
