//! Backend selection from [`EngineConfig`].
//!
//! `DATABASE_URL` selects the Postgres store and `REDIS_URL` the Redis broker; each
//! falls back to its in-memory adapter independently. Both binaries share this so
//! the API and the worker always agree on where jobs live.

use std::sync::Arc;

use tracing::{info, warn};

use crate::broker::{BrokerError, InMemoryPriorityBroker, PriorityBroker};
use crate::config::EngineConfig;
use crate::store::{InMemoryJobStore, JobStore, PostgresJobStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    InMemory,
    Persistent,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::InMemory => "in_memory",
            BackendKind::Persistent => "persistent",
        }
    }
}

/// Connected store and broker.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn JobStore>,
    pub broker: Arc<dyn PriorityBroker>,
    pub store_kind: BackendKind,
    pub broker_kind: BackendKind,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("store_kind", &self.store_kind)
            .field("broker_kind", &self.broker_kind)
            .finish_non_exhaustive()
    }
}

impl Backends {
    /// Fresh in-memory store and broker.
    pub fn in_memory() -> Self {
        Self {
            store: InMemoryJobStore::arc(),
            broker: InMemoryPriorityBroker::arc(),
            store_kind: BackendKind::InMemory,
            broker_kind: BackendKind::InMemory,
        }
    }

    /// Both halves live in this process only.
    pub fn is_in_memory(&self) -> bool {
        self.store_kind == BackendKind::InMemory && self.broker_kind == BackendKind::InMemory
    }

    pub async fn connect(config: &EngineConfig) -> Result<Self, BackendError> {
        let mut backends = Self::in_memory();

        if let Some(url) = config.database_url.as_deref() {
            backends.store = Arc::new(PostgresJobStore::connect(url).await?);
            backends.store_kind = BackendKind::Persistent;
            info!("using postgres job store");
        }

        if let Some(url) = config.redis_url.as_deref() {
            #[cfg(feature = "redis")]
            {
                let broker =
                    crate::broker::RedisPriorityBroker::connect(url, Some(config.queue_key.clone()))
                        .await?;
                backends.broker = Arc::new(broker);
                backends.broker_kind = BackendKind::Persistent;
                info!(queue_key = %config.queue_key, "using redis priority broker");
            }
            #[cfg(not(feature = "redis"))]
            {
                let _ = url;
                warn!("REDIS_URL set but redis feature not enabled, falling back to in-memory broker");
            }
        }

        if backends.store_kind != backends.broker_kind {
            warn!(
                store = backends.store_kind.as_str(),
                broker = backends.broker_kind.as_str(),
                "store and broker durability differ; queued entries or records may not survive a restart"
            );
        }

        Ok(backends)
    }
}
