//! Workflow instance state types.
//!
//! These are the serializable records that make up an instance snapshot:
//! pointer and scope state plus the data payload. The engine mutates the live
//! forms of these in `sagaflow-core`; the snapshot round-trips through any
//! `InstanceStore` backend without loss.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::path::StepPath;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Terminal and non-terminal status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Complete,
    Terminated,
    Errored,
}

impl InstanceStatus {
    /// Whether the instance will never be advanced again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, InstanceStatus::Running)
    }
}

/// Status of a single execution pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl PointerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PointerStatus::Complete | PointerStatus::Failed)
    }
}

/// State of one saga scope instance.
///
/// `Open -> Compensating -> Compensated` is the containment path;
/// `Open -> Closed` is the clean path (stack discarded, nothing executed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeState {
    Open,
    Compensating,
    Compensated,
    Closed,
}

// ---------------------------------------------------------------------------
// Pointer and scope records
// ---------------------------------------------------------------------------

/// Serialized form of one execution pointer.
///
/// Parent/child/scope relations are arena indices, not references, so the
/// record set round-trips through persistence as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointerRecord {
    /// Address of the step this pointer walks.
    pub path: StepPath,
    /// Current pointer status.
    pub status: PointerStatus,
    /// Arena index of the spawning pointer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
    /// Arena indices of pointers this one spawned.
    #[serde(default)]
    pub children: Vec<usize>,
    /// Index of the innermost enclosing saga scope, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<usize>,
    /// Set when the pointer was abandoned by containment and must not run.
    #[serde(default)]
    pub archived: bool,
}

/// The failure that triggered a scope's containment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeFailure {
    /// Step whose body (or selector) failed.
    pub step: StepPath,
    /// Captured failure message.
    pub message: String,
}

/// Serialized form of one saga scope instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeRecord {
    /// Arena index of the saga pointer that owns this scope.
    pub pointer: usize,
    /// Index of the enclosing scope, if this saga is nested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
    /// Scope state machine position.
    pub state: ScopeState,
    /// Compensation stack: paths of successfully completed compensatable
    /// steps, in registration order. Actions are resolved from the graph at
    /// unwind time, so only paths persist.
    #[serde(default)]
    pub stack: Vec<StepPath>,
    /// The original failure, once containment has begun.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ScopeFailure>,
}

// ---------------------------------------------------------------------------
// Instance snapshot
// ---------------------------------------------------------------------------

/// Complete persisted state of one workflow instance.
///
/// The step graph itself is not stored; it is referenced by definition id and
/// re-supplied at resume time (definitions hold closures and never change
/// during a run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    /// UUIDv7 instance id.
    pub id: Uuid,
    /// Id of the workflow definition this instance executes.
    pub definition_id: Uuid,
    /// Definition name (denormalized for display and logs).
    pub definition_name: String,
    /// Current instance status.
    pub status: InstanceStatus,
    /// JSON form of the mutable data payload.
    pub data: serde_json::Value,
    /// Pointer arena contents, in arena order.
    pub pointers: Vec<PointerRecord>,
    /// Saga scope table, in creation order.
    pub scopes: Vec<ScopeRecord>,
    /// When the instance started.
    pub started_at: DateTime<Utc>,
    /// When the instance reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
