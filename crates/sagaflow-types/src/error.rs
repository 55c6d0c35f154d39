//! Error types shared across the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::path::StepPath;

/// The failure a step body, decision selector, or compensation action raises.
///
/// Carries only a message: the engine treats any body failure as opaque and
/// unrecoverable (retry policy belongs to the host scheduling loop).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct StepFailure {
    pub message: String,
}

impl StepFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for StepFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for StepFailure {
    fn from(message: String) -> Self {
        Self { message }
    }
}

/// One entry in the unhandled step error log.
///
/// Appended by the error aggregator when a failure is contained by a saga
/// scope (or proves fatal); never removed during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepErrorRecord {
    /// UUIDv7 record id.
    pub id: Uuid,
    /// Instance the failure occurred in.
    pub instance_id: Uuid,
    /// Step whose execution failed.
    pub step: StepPath,
    /// Captured failure message.
    pub message: String,
    /// When the record was appended.
    pub recorded_at: DateTime<Utc>,
}

/// Errors from instance store operations (used by the port definition in
/// sagaflow-core).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("instance not found")]
    NotFound,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}
