//! Priority broker boundary.
//!
//! The broker is an ordered multiset of job ids keyed by [`Score`]. The engine only
//! relies on three operations, and on `pop_min` being atomic: two concurrent callers
//! never receive the same entry.

use std::sync::Arc;

use async_trait::async_trait;

use taskq_core::{JobId, Score};

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_zset;

pub use in_memory::InMemoryPriorityBroker;
#[cfg(feature = "redis")]
pub use redis_zset::{RedisPriorityBroker, DEFAULT_QUEUE_KEY};

/// Broker operation error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),
    #[error("broker command error: {0}")]
    Command(String),
}

/// Ordered multiset of job ids.
#[async_trait]
pub trait PriorityBroker: Send + Sync {
    /// Add an entry. Inserting an id that is already present may create a second
    /// entry; consumers must tolerate it.
    async fn insert(&self, id: JobId, score: Score) -> Result<(), BrokerError>;

    /// Remove and return the entry with the smallest score, if any.
    ///
    /// Ties are broken by the broker; callers must not assume FIFO.
    async fn pop_min(&self) -> Result<Option<(JobId, Score)>, BrokerError>;

    /// Number of entries currently held.
    async fn size(&self) -> Result<usize, BrokerError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[async_trait]
impl<T: PriorityBroker + ?Sized> PriorityBroker for Arc<T> {
    async fn insert(&self, id: JobId, score: Score) -> Result<(), BrokerError> {
        (**self).insert(id, score).await
    }

    async fn pop_min(&self) -> Result<Option<(JobId, Score)>, BrokerError> {
        (**self).pop_min().await
    }

    async fn size(&self) -> Result<usize, BrokerError> {
        (**self).size().await
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        (**self).ping().await
    }
}
