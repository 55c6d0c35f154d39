//! Saga workflow engine: definitions, execution, and compensation.
//!
//! Build a definition with [`builder::WorkflowBuilder`], then drive instances
//! of it with [`engine::Engine`] against any [`repository::instance::InstanceStore`]
//! backend. Execution advances in discrete, individually-persisted
//! transitions; failures inside a saga scope are contained by unwinding that
//! scope's compensation stack, and the run continues past the saga.

pub mod aggregator;
pub mod builder;
pub mod engine;
pub mod graph;
pub mod pointer;
pub mod repository;
pub mod router;
pub mod scope;

pub use builder::WorkflowBuilder;
pub use engine::{Engine, EngineConfig, EngineError, WorkflowInstance};
pub use graph::WorkflowGraph;
