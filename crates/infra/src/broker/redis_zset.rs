//! Redis sorted-set priority broker.
//!
//! - **Key**: a single sorted set (default `job_queue`)
//! - **Insert**: `ZADD key score id`
//! - **Pop**: `ZPOPMIN key 1`, atomic on the Redis side, so any number of workers
//!   can share one key
//! - **Size**: `ZCARD key`
//!
//! A sorted set is a set, not a multiset: re-inserting an id that is still queued
//! updates its score instead of adding a second entry.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::{instrument, warn};

use taskq_core::{JobId, Score};

use super::{BrokerError, PriorityBroker};

/// Default sorted-set key.
pub const DEFAULT_QUEUE_KEY: &str = "job_queue";

#[derive(Clone)]
pub struct RedisPriorityBroker {
    conn: MultiplexedConnection,
    key: String,
}

impl std::fmt::Debug for RedisPriorityBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPriorityBroker")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl RedisPriorityBroker {
    /// Connect to `redis_url` (e.g. `redis://localhost:6379/0`).
    ///
    /// `key` defaults to [`DEFAULT_QUEUE_KEY`].
    pub async fn connect(
        redis_url: impl AsRef<str>,
        key: Option<String>,
    ) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Self {
            conn,
            key: key.unwrap_or_else(|| DEFAULT_QUEUE_KEY.to_string()),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl PriorityBroker for RedisPriorityBroker {
    #[instrument(skip(self), fields(key = %self.key), err)]
    async fn insert(&self, id: JobId, score: Score) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(&self.key)
            .arg(score.value())
            .arg(id.to_string())
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("ZADD failed: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self), fields(key = %self.key), err)]
    async fn pop_min(&self) -> Result<Option<(JobId, Score)>, BrokerError> {
        let mut conn = self.conn.clone();
        loop {
            // Flat reply: [member, score] or [] when the set is empty.
            let reply: Vec<String> = redis::cmd("ZPOPMIN")
                .arg(&self.key)
                .arg(1)
                .query_async(&mut conn)
                .await
                .map_err(|e| BrokerError::Command(format!("ZPOPMIN failed: {e}")))?;

            let [member, score] = match <[String; 2]>::try_from(reply) {
                Ok(pair) => pair,
                Err(reply) if reply.is_empty() => return Ok(None),
                Err(reply) => {
                    return Err(BrokerError::Command(format!(
                        "unexpected ZPOPMIN reply of length {}",
                        reply.len()
                    )));
                }
            };

            // Entries written by something other than this engine are dropped.
            let Ok(id) = member.parse::<JobId>() else {
                warn!(member = %member, "dropping malformed broker entry");
                continue;
            };
            let Ok(score) = score.parse::<f64>() else {
                warn!(job_id = %id, score = %score, "dropping broker entry with malformed score");
                continue;
            };

            return Ok(Some((id, Score(score.max(0.0) as u32))));
        }
    }

    async fn size(&self) -> Result<usize, BrokerError> {
        let mut conn = self.conn.clone();
        let n: usize = redis::cmd("ZCARD")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("ZCARD failed: {e}")))?;
        Ok(n)
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Connection(format!("PING failed: {e}")))?;
        Ok(())
    }
}
