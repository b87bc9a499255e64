//! In-process assignment store.

use async_trait::async_trait;
use moka::sync::Cache;

use super::{Assignment, AssignmentStore};
use crate::error::StoreResult;
use crate::visitor::VisitorId;

/// Default maximum number of stored assignments.
pub const DEFAULT_MEMORY_CAPACITY: u64 = 100_000;

/// Bounded Moka cache keyed by `(visitor, experiment id)`.
///
/// Writes are atomic per key. Once full, the least valuable entries are
/// evicted and those visitors are reassigned on their next request.
#[derive(Clone)]
pub struct MemoryAssignmentStore {
    entries: Cache<(VisitorId, String), Assignment>,
    capacity: u64,
}

impl MemoryAssignmentStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    /// Create a store holding at most `capacity` assignments.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity).build(),
            capacity,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of stored assignments.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        usize::try_from(self.entries.entry_count()).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryAssignmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryAssignmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAssignmentStore")
            .field("capacity", &self.capacity)
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

#[async_trait]
impl AssignmentStore for MemoryAssignmentStore {
    async fn get(
        &self,
        visitor: &VisitorId,
        experiment_id: &str,
    ) -> StoreResult<Option<Assignment>> {
        let key = (visitor.clone(), experiment_id.to_string());
        Ok(self.entries.get(&key))
    }

    async fn put(&self, visitor: &VisitorId, experiment_id: &str, variant: &str) -> StoreResult<()> {
        self.entries.insert(
            (visitor.clone(), experiment_id.to_string()),
            Assignment::new(experiment_id, variant),
        );
        Ok(())
    }

    async fn remove(&self, visitor: &VisitorId, experiment_id: &str) -> StoreResult<()> {
        self.entries
            .invalidate(&(visitor.clone(), experiment_id.to_string()));
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
