//! Infrastructure backends for the saga workflow engine.
//!
//! Implements the persistence ports defined in `sagaflow-core`.

pub mod store;
pub mod telemetry;
