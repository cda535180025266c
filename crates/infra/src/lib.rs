//! Infrastructure layer: stores, brokers, executors, the worker loop and config.

pub mod backends;
pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod queue;
pub mod sink;
pub mod store;
pub mod worker;


pub use backends::{BackendError, BackendKind, Backends};
pub use broker::{BrokerError, InMemoryPriorityBroker, PriorityBroker};
pub use config::{ConfigError, EngineConfig};
pub use dispatcher::{DispatchError, Dispatcher};
pub use executor::{ExecutionOutcome, ExecutorRegistry, JobHandler, JobResult};
pub use queue::{JobQueue, QueueError, QueueStats, SubmitError};
pub use sink::{FailureSink, FileFailureSink, MemoryFailureSink, TracingFailureSink};
pub use store::{InMemoryJobStore, JobStats, JobStore, PostgresJobStore, StoreError};
pub use worker::{UnknownKindPolicy, Worker, WorkerConfig, WorkerError, WorkerHandle};
