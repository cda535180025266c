//! `taskq-core` — job lifecycle domain primitives.
//!
//! This crate contains **pure domain** types (no infrastructure concerns): the job
//! record and its state machine, priority classes and their scores, and the retry
//! policy. Stores, brokers and workers live in `taskq-infra`.

pub mod error;
pub mod id;
pub mod job;
pub mod priority;
pub mod retry;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::{JobKind, JobRecord, JobStatus};
pub use priority::{PriorityClass, Score};
pub use retry::{RetryPolicy, should_retry};
