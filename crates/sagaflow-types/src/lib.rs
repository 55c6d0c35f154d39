//! Shared domain types for Sagaflow.
//!
//! This crate contains the serializable state types shared across the engine:
//! step paths, pointer and scope records, instance snapshots, and the error
//! types raised by step bodies and recorded by the error aggregator.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod error;
pub mod instance;
pub mod path;
