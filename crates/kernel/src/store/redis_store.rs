//! Redis-backed assignment store with an in-process Moka L1.
//!
//! Each assignment is one Redis string holding the JSON record, written with
//! a single `SET`/`SET EX` so concurrent writers cannot leave a partial
//! entry. Assignments rarely change, so reads are served from L1 for a short
//! window before going back to Redis.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use redis::AsyncCommands;
use redis::Client as RedisClient;
use tracing::{debug, warn};

use super::{Assignment, AssignmentStore, assignment_key};
use crate::error::{StoreError, StoreResult};
use crate::visitor::VisitorId;

/// L1 entry lifetime (60 seconds).
const L1_TTL_SECS: u64 = 60;

/// Maximum L1 capacity.
const L1_MAX_CAPACITY: u64 = 50_000;

/// Shared assignment store.
#[derive(Clone)]
pub struct RedisAssignmentStore {
    redis: RedisClient,
    local: Cache<String, Assignment>,
    /// Expiry forwarded to Redis; `None` keeps assignments forever.
    ttl_secs: Option<u64>,
}

impl RedisAssignmentStore {
    /// Create a store. Connections are opened lazily per operation.
    pub fn new(redis: RedisClient, ttl_secs: Option<u64>) -> Self {
        let local = Cache::builder()
            .max_capacity(L1_MAX_CAPACITY)
            .time_to_live(Duration::from_secs(L1_TTL_SECS))
            .build();

        Self {
            redis,
            local,
            ttl_secs: ttl_secs.filter(|t| *t > 0),
        }
    }
}

#[async_trait]
impl AssignmentStore for RedisAssignmentStore {
    async fn get(
        &self,
        visitor: &VisitorId,
        experiment_id: &str,
    ) -> StoreResult<Option<Assignment>> {
        let key = assignment_key(visitor, experiment_id);

        if let Some(assignment) = self.local.get(&key).await {
            debug!(key = %key, "assignment L1 hit");
            return Ok(Some(assignment));
        }

        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(&key).await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let assignment: Assignment = serde_json::from_str(&raw)?;
        if assignment.experiment_id != experiment_id {
            return Err(StoreError::Corrupt(format!(
                "key {key} holds assignment for {}",
                assignment.experiment_id
            )));
        }

        self.local.insert(key, assignment.clone()).await;
        Ok(Some(assignment))
    }

    async fn put(&self, visitor: &VisitorId, experiment_id: &str, variant: &str) -> StoreResult<()> {
        let key = assignment_key(visitor, experiment_id);
        let assignment = Assignment::new(experiment_id, variant);
        let raw = serde_json::to_string(&assignment)?;

        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        match self.ttl_secs {
            Some(ttl) => conn.set_ex::<_, _, ()>(&key, raw, ttl).await?,
            None => conn.set::<_, _, ()>(&key, raw).await?,
        }

        self.local.insert(key, assignment).await;
        Ok(())
    }

    /// Removes from both tiers.
    async fn remove(&self, visitor: &VisitorId, experiment_id: &str) -> StoreResult<()> {
        let key = assignment_key(visitor, experiment_id);
        self.local.invalidate(&key).await;

        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(&key).await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            warn!(reply = %pong, "unexpected Redis PING reply");
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisAssignmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisAssignmentStore")
            .field("ttl_secs", &self.ttl_secs)
            .field("l1_entries", &self.local.entry_count())
            .finish()
    }
}
