//! In-memory instance store.

use dashmap::DashMap;
use sagaflow_core::repository::instance::InstanceStore;
use sagaflow_types::error::StoreError;
use sagaflow_types::instance::{InstanceSnapshot, InstanceStatus};
use uuid::Uuid;

/// Concurrent in-memory [`InstanceStore`], for tests and embedded use.
///
/// Snapshots are cloned on save and load so callers never observe each
/// other's mutations.
#[derive(Debug, Default)]
pub struct MemoryInstanceStore {
    snapshots: DashMap<Uuid, InstanceSnapshot>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl InstanceStore for MemoryInstanceStore {
    async fn save(&self, snapshot: &InstanceSnapshot) -> Result<(), StoreError> {
        self.snapshots.insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<InstanceSnapshot, StoreError> {
        self.snapshots
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.snapshots.remove(&id);
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .snapshots
            .iter()
            .filter(|entry| entry.status == InstanceStatus::Running)
            .map(|entry| *entry.key())
            .collect())
    }
}
