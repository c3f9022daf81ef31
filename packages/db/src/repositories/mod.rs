//! Repository implementations for database operations.

mod event_repo;
mod job_repo;

pub use event_repo::EventRepository;
pub use job_repo::JobRepository;
