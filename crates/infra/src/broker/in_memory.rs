use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use taskq_core::{JobId, Score};

use super::{BrokerError, PriorityBroker};

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<(Score, u64), JobId>,
    next_seq: u64,
}

/// In-memory priority broker for tests/dev.
///
/// A single mutex guards the ordered map, which makes `pop_min` atomic across
/// concurrent workers in the same process.
#[derive(Debug, Default)]
pub struct InMemoryPriorityBroker {
    inner: Mutex<Inner>,
}

impl InMemoryPriorityBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Ids currently queued, in pop order. Intended for assertions.
    pub fn snapshot(&self) -> Vec<(JobId, Score)> {
        match self.inner.lock() {
            Ok(inner) => inner
                .entries
                .iter()
                .map(|((score, _), id)| (*id, *score))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn poisoned() -> BrokerError {
    BrokerError::Command("in-memory broker lock poisoned".to_string())
}

#[async_trait]
impl PriorityBroker for InMemoryPriorityBroker {
    async fn insert(&self, id: JobId, score: Score) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert((score, seq), id);
        Ok(())
    }

    async fn pop_min(&self) -> Result<Option<(JobId, Score)>, BrokerError> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        Ok(inner
            .entries
            .pop_first()
            .map(|((score, _), id)| (id, score)))
    }

    async fn size(&self) -> Result<usize, BrokerError> {
        let inner = self.inner.lock().map_err(|_| poisoned())?;
        Ok(inner.entries.len())
    }
}
