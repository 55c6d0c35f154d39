//! Unhandled step error log.
//!
//! Append-only, keyed by instance id. A record lands here exactly once per
//! contained failure (when the owning scope finishes unwinding) or fatal
//! failure; compensation itself never appends on the way down.

use chrono::Utc;
use dashmap::DashMap;
use sagaflow_types::error::StepErrorRecord;
use sagaflow_types::path::StepPath;
use uuid::Uuid;

/// Concurrent, append-only log of unhandled step failures.
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    records: DashMap<Uuid, Vec<StepErrorRecord>>,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one failure record for an instance.
    pub fn record(&self, instance_id: Uuid, step: StepPath, message: impl Into<String>) {
        let record = StepErrorRecord {
            id: Uuid::now_v7(),
            instance_id,
            step,
            message: message.into(),
            recorded_at: Utc::now(),
        };
        self.records.entry(instance_id).or_default().push(record);
    }

    /// All records for an instance, in append order.
    pub fn records_for(&self, instance_id: Uuid) -> Vec<StepErrorRecord> {
        self.records
            .get(&instance_id)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Number of records for one instance.
    pub fn count_for(&self, instance_id: Uuid) -> usize {
        self.records.get(&instance_id).map(|r| r.len()).unwrap_or(0)
    }

    /// Total records across all instances.
    pub fn total(&self) -> usize {
        self.records.iter().map(|entry| entry.value().len()).sum()
    }
}
