use db::{DbError, Store};
use roam_core::{CallArgs, Job, JobPayload};

/// A fresh in-memory store, private to the calling test.
pub async fn setup_store() -> Result<Store, DbError> {
    Store::memory().await
}

pub fn add_job(a: i64, b: i64) -> Job {
    Job::new(JobPayload::new("add", CallArgs::new().arg(a).arg(b)))
}
