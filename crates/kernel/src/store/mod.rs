//! Assignment storage abstraction.
//!
//! A store maps `(visitor, experiment id)` to the variant that visitor was
//! given. Stores hold whatever they are handed: staleness checks against
//! the current registry happen in the engine, not here.
//!
//! Two backends ship with the kernel:
//! - [`MemoryAssignmentStore`]: in-process, for single instances and tests
//! - [`RedisAssignmentStore`]: shared across instances, with a Moka L1

mod memory;
mod redis_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::memory::{DEFAULT_MEMORY_CAPACITY, MemoryAssignmentStore};
pub use self::redis_store::RedisAssignmentStore;

use crate::error::StoreResult;
use crate::visitor::VisitorId;

/// A variant bound to a visitor for one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub experiment_id: String,
    pub variant: String,
    pub assigned_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(experiment_id: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            variant: variant.into(),
            assigned_at: Utc::now(),
        }
    }
}

/// Persistence for visitor assignments.
///
/// Implementations must allow concurrent access for different keys and
/// make each `put` atomic per key; concurrent writes to one key resolve as
/// last-write-wins.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Fetch the stored assignment, if any.
    async fn get(&self, visitor: &VisitorId, experiment_id: &str)
    -> StoreResult<Option<Assignment>>;

    /// Store `variant` for the pair, replacing any existing entry.
    ///
    /// Writing the same triple twice is a no-op apart from `assigned_at`.
    async fn put(&self, visitor: &VisitorId, experiment_id: &str, variant: &str)
    -> StoreResult<()>;

    /// Delete the assignment for the pair. Deleting a missing key is not an
    /// error.
    async fn remove(&self, visitor: &VisitorId, experiment_id: &str) -> StoreResult<()>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Backend name for logs and health output.
    fn backend(&self) -> &'static str;
}

/// Storage key for an assignment.
pub fn assignment_key(visitor: &VisitorId, experiment_id: &str) -> String {
    format!("exp:assign:{visitor}:{experiment_id}")
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn key_format() {
        let visitor = VisitorId::parse("abc").unwrap();
        assert_eq!(
            assignment_key(&visitor, "landing_hero_v1"),
            "exp:assign:abc:landing_hero_v1"
        );
    }

    #[test]
    fn assignment_serializes_camel_case() {
        let assignment = Assignment::new("hero", "alt");
        let json = serde_json::to_value(&assignment).unwrap();
        assert_eq!(json["experimentId"], "hero");
        assert_eq!(json["variant"], "alt");
        assert!(json["assignedAt"].is_string());
    }
}
