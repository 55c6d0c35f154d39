//! Persistence ports.
//!
//! The engine depends on traits defined here; backends live in
//! `sagaflow-infra`.

pub mod instance;
