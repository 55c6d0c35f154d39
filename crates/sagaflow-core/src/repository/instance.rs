//! Instance persistence port.

use sagaflow_types::error::StoreError;
use sagaflow_types::instance::InstanceSnapshot;
use uuid::Uuid;

/// Storage port for workflow instance snapshots.
///
/// The engine saves a snapshot after every state transition, so a backend
/// sees a write-heavy stream of whole-snapshot upserts. Implementations must
/// be safe to call from multiple tasks.
pub trait InstanceStore: Send + Sync {
    /// Upsert a snapshot by instance id.
    fn save(
        &self,
        snapshot: &InstanceSnapshot,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Load a snapshot, `StoreError::NotFound` if absent.
    fn load(&self, id: Uuid) -> impl Future<Output = Result<InstanceSnapshot, StoreError>> + Send;

    /// Remove a snapshot. Removing an absent id is not an error.
    fn delete(&self, id: Uuid) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Ids of all instances whose status is `Running`, for crash recovery
    /// sweeps.
    fn list_running(&self) -> impl Future<Output = Result<Vec<Uuid>, StoreError>> + Send;
}
