//! Core domain types for remote execution.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobPayload and JobStatus for submitted calls
//! - Lease for exclusive worker claims
//! - Event and Outcome for per-job progress logs
//! - The callable registry workers dispatch through
//! - The JSON bodies of the controller's HTTP interface

mod callable;
mod error;
mod events;
mod job;
mod lease;
mod wire;

pub use callable::{
    CallFuture, CallResult, CallableRegistry, FnCallable, OutputSink, RemoteCallable,
    sync_callable,
};
pub use error::{ExecutionError, SubmissionError};
pub use events::{Event, EventKind, Outcome};
pub use job::{CallArgs, Job, JobId, JobPayload, JobStatus, MAX_FUNCTION_NAME_LEN};
pub use lease::{Lease, LeaseStatus};
pub use wire::{CancelAck, CancelResponse, ErrorBody, SubmitResponse};
