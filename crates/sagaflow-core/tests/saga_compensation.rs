//! End-to-end engine tests: an order-fulfillment workflow with a saga scope,
//! nested data-driven branching, and compensation on failure.

use std::sync::Arc;

use sagaflow_core::engine::{Engine, EngineConfig, EngineError};
use sagaflow_core::repository::instance::InstanceStore;
use sagaflow_core::{WorkflowBuilder, WorkflowGraph};
use sagaflow_infra::store::MemoryInstanceStore;
use sagaflow_types::error::StepFailure;
use sagaflow_types::instance::{InstanceStatus, ScopeState};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Fixture workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct OrderData {
    // failure injection
    fail_init: bool,
    fail_charge: bool,
    fail_express: bool,
    fail_customs: bool,
    fail_route: bool,
    fail_comp_allocate: bool,
    fail_comp_saga: bool,
    // branch selection
    route: String,
    // step effects
    init_done: bool,
    reserved: bool,
    charge_started: bool,
    charge_settled: bool,
    allocated: bool,
    express_prepared: bool,
    customs_cleared: bool,
    notified: bool,
    archived: bool,
    // compensation effects
    comp_init: bool,
    comp_reserve: bool,
    comp_charge: bool,
    comp_allocate: bool,
    comp_saga: bool,
    comp_archive: bool,
}

impl OrderData {
    fn express() -> Self {
        Self {
            route: "express".to_string(),
            ..Self::default()
        }
    }
}

/// init -> saga[ reserve -> charge -> allocate -> decide(express)
///   -> [ prepare -> book -> decide(express) -> [ clear-customs -> stamp ] ]
///   -> decide(express) -> [ notify ] ] -> archive
fn order_graph() -> WorkflowGraph<OrderData> {
    WorkflowBuilder::new("order-fulfillment")
        .start_with("init", |d: &mut OrderData| {
            if d.fail_init {
                return Err(StepFailure::new("init exploded"));
            }
            d.init_done = true;
            Ok(())
        })
        .compensate_with(|d| {
            d.comp_init = true;
            Ok(())
        })
        .saga("fulfillment", |s| {
            s.start_with("reserve", |d: &mut OrderData| {
                d.reserved = true;
                Ok(())
            })
            .compensate_with(|d| {
                d.comp_reserve = true;
                Ok(())
            })
            .then("charge", |d| {
                d.charge_started = true;
                if d.fail_charge {
                    return Err(StepFailure::new("charge declined"));
                }
                d.charge_settled = true;
                Ok(())
            })
            .compensate_with(|d| {
                d.comp_charge = true;
                Ok(())
            })
            .then("allocate", |d| {
                d.allocated = true;
                Ok(())
            })
            .compensate_with(|d| {
                if d.fail_comp_allocate {
                    return Err(StepFailure::new("deallocation rejected"));
                }
                d.comp_allocate = true;
                Ok(())
            })
            .decide("route-shipment", |d| {
                if d.fail_route {
                    return Err(StepFailure::new("routing table unavailable"));
                }
                Ok(d.route.clone())
            })
            .branch("express", |b| {
                b.start_with("prepare", |d| {
                    if d.fail_express {
                        return Err(StepFailure::new("carrier rejected booking"));
                    }
                    Ok(())
                })
                .then("book", |d| {
                    d.express_prepared = true;
                    Ok(())
                })
                .decide("customs", |d| Ok(d.route.clone()))
                .branch("express", |b| {
                    b.start_with("clear-customs", |d| {
                        if d.fail_customs {
                            return Err(StepFailure::new("customs hold"));
                        }
                        Ok(())
                    })
                    .then("stamp", |d| {
                        d.customs_cleared = true;
                        Ok(())
                    })
                })
            })
            .decide("notify-route", |d| Ok(d.route.clone()))
            .branch("express", |b| {
                b.start_with("notify", |d| {
                    d.notified = true;
                    Ok(())
                })
            })
        })
        .compensate_with(|d| {
            if d.fail_comp_saga {
                return Err(StepFailure::new("saga undo rejected"));
            }
            d.comp_saga = true;
            Ok(())
        })
        .then("archive", |d| {
            d.archived = true;
            Ok(())
        })
        .compensate_with(|d| {
            d.comp_archive = true;
            Ok(())
        })
        .build()
        .expect("valid definition")
}

fn engine() -> Engine<MemoryInstanceStore> {
    sagaflow_infra::telemetry::init_tracing("warn");
    Engine::new(MemoryInstanceStore::new())
}

async fn run(
    engine: &Engine<MemoryInstanceStore>,
    data: OrderData,
) -> (InstanceStatus, sagaflow_core::WorkflowInstance<OrderData>) {
    let graph = Arc::new(order_graph());
    let mut instance = engine.start(graph, data).await.unwrap();
    let status = engine.run_to_completion(&mut instance).await.unwrap();
    (status, instance)
}

// ---------------------------------------------------------------------------
// Clean runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_clean_run_fires_no_compensation() {
    let engine = engine();
    let (status, instance) = run(&engine, OrderData::express()).await;

    assert_eq!(status, InstanceStatus::Complete);
    assert_eq!(engine.errors().count_for(instance.id()), 0);

    let d = instance.data();
    assert!(d.init_done && d.reserved && d.charge_settled && d.allocated);
    assert!(d.express_prepared && d.customs_cleared && d.notified && d.archived);
    assert!(!d.comp_init && !d.comp_reserve && !d.comp_charge);
    assert!(!d.comp_allocate && !d.comp_saga && !d.comp_archive);

    // Clean saga closure discards the stack.
    let scopes = instance.scope_records();
    assert_eq!(scopes.len(), 1);
    assert_eq!(scopes[0].state, ScopeState::Closed);
    assert!(scopes[0].stack.is_empty());
}

#[tokio::test]
async fn test_unmatched_route_falls_through_branches() {
    let engine = engine();
    let data = OrderData {
        route: "standard".to_string(),
        ..OrderData::default()
    };
    let (status, instance) = run(&engine, data).await;

    assert_eq!(status, InstanceStatus::Complete);
    assert_eq!(engine.errors().count_for(instance.id()), 0);

    let d = instance.data();
    assert!(d.allocated && d.archived);
    assert!(!d.express_prepared && !d.customs_cleared && !d.notified);
}

// ---------------------------------------------------------------------------
// Containment: failure inside the saga body
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_charge_failure_unwinds_prior_steps_only() {
    let engine = engine();
    let data = OrderData {
        fail_charge: true,
        ..OrderData::express()
    };
    let (status, instance) = run(&engine, data).await;

    // Contained: the workflow still completes.
    assert_eq!(status, InstanceStatus::Complete);

    let d = instance.data();
    assert!(d.charge_started && !d.charge_settled);
    assert!(!d.allocated && !d.express_prepared && !d.notified);

    // Only steps that completed before the failure are compensated; the
    // failing step itself never registered an undo.
    assert!(d.comp_reserve);
    assert!(!d.comp_charge);
    assert!(!d.comp_allocate);
    // The saga's own compensation runs as the final undo.
    assert!(d.comp_saga);
    // Steps outside the scope are untouched, and the run continues past
    // the saga.
    assert!(!d.comp_init && !d.comp_archive);
    assert!(d.archived);

    let records = engine.errors().records_for(instance.id());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message, "charge declined");

    let scopes = instance.scope_records();
    assert_eq!(scopes[0].state, ScopeState::Compensated);
    assert!(scopes[0].stack.is_empty());
}

#[tokio::test]
async fn test_branch_failure_unwinds_whole_scope() {
    let engine = engine();
    let data = OrderData {
        fail_express: true,
        ..OrderData::express()
    };
    let (status, instance) = run(&engine, data).await;

    assert_eq!(status, InstanceStatus::Complete);

    let d = instance.data();
    assert!(d.reserved && d.charge_settled && d.allocated);
    assert!(!d.express_prepared && !d.customs_cleared && !d.notified);
    // LIFO unwind covers every registered step back to the scope start.
    assert!(d.comp_allocate && d.comp_charge && d.comp_reserve && d.comp_saga);
    assert!(!d.comp_init && !d.comp_archive);
    assert!(d.archived);

    assert_eq!(engine.errors().count_for(instance.id()), 1);

    // The branch's decision pointer was abandoned mid-flight.
    assert!(instance.pointer_records().iter().any(|p| p.archived));
}

#[tokio::test]
async fn test_nested_branch_failure_unwinds_whole_scope() {
    let engine = engine();
    let data = OrderData {
        fail_customs: true,
        ..OrderData::express()
    };
    let (status, instance) = run(&engine, data).await;

    assert_eq!(status, InstanceStatus::Complete);

    let d = instance.data();
    // Work in the outer branch before the nested failure did happen.
    assert!(d.express_prepared);
    assert!(!d.customs_cleared && !d.notified);
    assert!(d.comp_allocate && d.comp_charge && d.comp_reserve && d.comp_saga);
    assert!(d.archived);

    let records = engine.errors().records_for(instance.id());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message, "customs hold");
}

#[tokio::test]
async fn test_selector_failure_is_contained_like_a_step_failure() {
    let engine = engine();
    let data = OrderData {
        fail_route: true,
        ..OrderData::express()
    };
    let (status, instance) = run(&engine, data).await;

    assert_eq!(status, InstanceStatus::Complete);
    let d = instance.data();
    assert!(d.comp_allocate && d.comp_charge && d.comp_reserve && d.comp_saga);
    assert!(d.archived);

    let records = engine.errors().records_for(instance.id());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message, "routing table unavailable");
}

// ---------------------------------------------------------------------------
// Fatal failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failure_outside_any_scope_is_fatal() {
    let engine = engine();
    let data = OrderData {
        fail_init: true,
        ..OrderData::express()
    };
    let (status, instance) = run(&engine, data).await;

    assert_eq!(status, InstanceStatus::Errored);
    let d = instance.data();
    // Nothing compensates at the root level and nothing runs afterwards.
    assert!(!d.comp_init && !d.reserved && !d.archived);

    let records = engine.errors().records_for(instance.id());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message, "init exploded");
}

#[tokio::test]
async fn test_compensation_failure_halts_the_unwind() {
    let engine = engine();
    let data = OrderData {
        fail_express: true,
        fail_comp_allocate: true,
        ..OrderData::express()
    };
    let (status, instance) = run(&engine, data).await;

    assert_eq!(status, InstanceStatus::Errored);
    let d = instance.data();
    // allocate's undo fails first (LIFO), so nothing below it runs.
    assert!(!d.comp_allocate && !d.comp_charge && !d.comp_reserve && !d.comp_saga);
    assert!(!d.archived);

    let records = engine.errors().records_for(instance.id());
    assert_eq!(records.len(), 1);
    assert!(records[0].message.contains("compensation failed"));
    assert!(records[0].message.contains("deallocation rejected"));
}

#[tokio::test]
async fn test_final_undo_failure_still_logs_the_original_failure() {
    let engine = engine();
    let data = OrderData {
        fail_charge: true,
        fail_comp_saga: true,
        ..OrderData::express()
    };
    let (status, instance) = run(&engine, data).await;

    assert_eq!(status, InstanceStatus::Errored);
    let d = instance.data();
    // The stack drained before the saga's own undo failed.
    assert!(d.comp_reserve && !d.comp_saga);
    assert!(!d.archived);

    // Both the halted undo and the failure that triggered the unwind are
    // logged.
    let messages: Vec<_> = engine
        .errors()
        .records_for(instance.id())
        .into_iter()
        .map(|r| r.message)
        .collect();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().any(|m| m.contains("saga undo rejected")));
    assert!(messages.iter().any(|m| m == "charge declined"));
}

// ---------------------------------------------------------------------------
// Persistence: resume and the transition stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_resume_continues_from_snapshot() {
    let engine = engine();
    let graph = Arc::new(order_graph());
    let mut instance = engine
        .start(Arc::clone(&graph), OrderData::express())
        .await
        .unwrap();
    let id = instance.id();

    // Advance past the charge step, then drop the live instance.
    while !instance.data().charge_settled {
        engine.advance(&mut instance).await.unwrap();
    }
    drop(instance);

    let mut resumed = engine.resume::<OrderData>(graph, id).await.unwrap();
    assert_eq!(resumed.status(), InstanceStatus::Running);
    assert!(resumed.data().charge_settled);

    let status = engine.run_to_completion(&mut resumed).await.unwrap();
    assert_eq!(status, InstanceStatus::Complete);
    assert!(resumed.data().notified && resumed.data().archived);
}

#[tokio::test]
async fn test_resume_rejects_wrong_definition() {
    let engine = engine();
    let graph = Arc::new(order_graph());
    let instance = engine
        .start(Arc::clone(&graph), OrderData::express())
        .await
        .unwrap();

    let other = Arc::new(order_graph());
    let err = engine
        .resume::<OrderData>(other, instance.id())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DefinitionMismatch { .. }));
}

#[tokio::test]
async fn test_resume_unknown_instance() {
    let engine = engine();
    let graph = Arc::new(order_graph());
    let err = engine
        .resume::<OrderData>(graph, uuid::Uuid::now_v7())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InstanceNotFound(_)));
}

#[tokio::test]
async fn test_snapshot_persisted_at_every_transition() {
    let engine = engine();
    let graph = Arc::new(order_graph());
    let mut instance = engine.start(graph, OrderData::express()).await.unwrap();

    engine.advance(&mut instance).await.unwrap();
    let mid = engine.store().load(instance.id()).await.unwrap();
    assert_eq!(mid.status, InstanceStatus::Running);
    assert!(!mid.pointers.is_empty());

    engine.run_to_completion(&mut instance).await.unwrap();
    let final_snap = engine.store().load(instance.id()).await.unwrap();
    assert_eq!(final_snap.status, InstanceStatus::Complete);
    assert!(final_snap.finished_at.is_some());
}

#[tokio::test]
async fn test_advance_after_terminal_is_a_no_op() {
    let engine = engine();
    let (status, mut instance) = run(&engine, OrderData::express()).await;
    assert_eq!(status, InstanceStatus::Complete);

    let again = engine.advance(&mut instance).await.unwrap();
    assert_eq!(again, InstanceStatus::Complete);
    assert_eq!(engine.errors().count_for(instance.id()), 0);
}

// ---------------------------------------------------------------------------
// Termination and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_terminate_without_unwind_leaves_effects_in_place() {
    let engine = engine();
    let graph = Arc::new(order_graph());
    let mut instance = engine.start(graph, OrderData::express()).await.unwrap();

    while !instance.data().allocated {
        engine.advance(&mut instance).await.unwrap();
    }

    let status = engine.terminate(&mut instance).await.unwrap();
    assert_eq!(status, InstanceStatus::Terminated);
    let d = instance.data();
    assert!(!d.comp_allocate && !d.comp_charge && !d.comp_reserve && !d.comp_saga);
    assert!(!d.archived);
    assert_eq!(engine.errors().count_for(instance.id()), 0);
}

#[tokio::test]
async fn test_terminate_with_compensation_unwinds_open_scopes() {
    let engine = Engine::with_config(
        MemoryInstanceStore::new(),
        EngineConfig {
            compensate_on_terminate: true,
            ..EngineConfig::default()
        },
    );
    let graph = Arc::new(order_graph());
    let mut instance = engine.start(graph, OrderData::express()).await.unwrap();

    while !instance.data().allocated {
        engine.advance(&mut instance).await.unwrap();
    }

    let status = engine.terminate(&mut instance).await.unwrap();
    assert_eq!(status, InstanceStatus::Terminated);
    let d = instance.data();
    assert!(d.comp_allocate && d.comp_charge && d.comp_reserve && d.comp_saga);
    // A termination unwind is not a failure: the error log stays empty.
    assert_eq!(engine.errors().count_for(instance.id()), 0);
}

#[tokio::test]
async fn test_request_cancel_stops_the_run_loop() {
    let engine = engine();
    let graph = Arc::new(order_graph());
    let mut instance = engine.start(graph, OrderData::express()).await.unwrap();

    assert!(engine.request_cancel(instance.id()));
    let status = engine.run_to_completion(&mut instance).await.unwrap();
    assert_eq!(status, InstanceStatus::Terminated);
    assert!(!instance.data().archived);
}

#[tokio::test]
async fn test_instance_debug_omits_the_payload() {
    let engine = engine();
    let graph = Arc::new(order_graph());
    let instance = engine.start(graph, OrderData::express()).await.unwrap();

    let rendered = format!("{instance:?}");
    assert!(rendered.contains("order-fulfillment"));
    assert!(rendered.contains("Running"));
    assert!(!rendered.contains("express"), "payload stays out of Debug");
}

#[tokio::test]
async fn test_cancel_unknown_instance_is_rejected() {
    let engine = engine();
    assert!(!engine.request_cancel(uuid::Uuid::now_v7()));
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_transition_budget_is_enforced() {
    let engine = Engine::with_config(
        MemoryInstanceStore::new(),
        EngineConfig {
            max_transitions: 3,
            ..EngineConfig::default()
        },
    );
    let graph = Arc::new(order_graph());
    let mut instance = engine.start(graph, OrderData::express()).await.unwrap();

    let err = engine.run_to_completion(&mut instance).await.unwrap_err();
    assert!(matches!(err, EngineError::TransitionBudget(3)));
}

// ---------------------------------------------------------------------------
// Nested sagas: containment stays local
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct NestedData {
    fail_inner: bool,
    outer_done: bool,
    inner_done: bool,
    tail_done: bool,
    comp_outer_step: bool,
    comp_inner_step: bool,
    comp_inner_saga: bool,
    comp_outer_saga: bool,
}

fn nested_graph() -> WorkflowGraph<NestedData> {
    WorkflowBuilder::new("nested-sagas")
        .saga("outer", |s| {
            s.start_with("outer-step", |d: &mut NestedData| {
                d.outer_done = true;
                Ok(())
            })
            .compensate_with(|d| {
                d.comp_outer_step = true;
                Ok(())
            })
            .saga("inner", |s| {
                s.start_with("inner-step", |d: &mut NestedData| {
                    d.inner_done = true;
                    Ok(())
                })
                .compensate_with(|d| {
                    d.comp_inner_step = true;
                    Ok(())
                })
                .then("inner-risky", |d| {
                    if d.fail_inner {
                        return Err(StepFailure::new("inner collapsed"));
                    }
                    Ok(())
                })
            })
            .compensate_with(|d| {
                d.comp_inner_saga = true;
                Ok(())
            })
            .then("outer-tail", |d| {
                d.tail_done = true;
                Ok(())
            })
        })
        .compensate_with(|d| {
            d.comp_outer_saga = true;
            Ok(())
        })
        .build()
        .expect("valid definition")
}

#[tokio::test]
async fn test_inner_failure_is_contained_by_inner_scope_only() {
    let engine = engine();
    let graph = Arc::new(nested_graph());
    let mut instance = engine
        .start(
            graph,
            NestedData {
                fail_inner: true,
                ..NestedData::default()
            },
        )
        .await
        .unwrap();
    let status = engine.run_to_completion(&mut instance).await.unwrap();

    assert_eq!(status, InstanceStatus::Complete);
    let d = instance.data();
    // The inner scope unwinds: its step plus the inner saga's own undo.
    assert!(d.comp_inner_step && d.comp_inner_saga);
    // The outer scope never unwinds, and execution continues after the
    // inner saga.
    assert!(!d.comp_outer_step && !d.comp_outer_saga);
    assert!(d.tail_done);

    assert_eq!(engine.errors().count_for(instance.id()), 1);

    let scopes = instance.scope_records();
    assert_eq!(scopes.len(), 2);
    let outer = scopes.iter().find(|s| s.parent.is_none()).unwrap();
    let inner = scopes.iter().find(|s| s.parent.is_some()).unwrap();
    assert_eq!(outer.state, ScopeState::Closed);
    assert_eq!(inner.state, ScopeState::Compensated);
}

#[tokio::test]
async fn test_nested_sagas_clean_run() {
    let engine = engine();
    let graph = Arc::new(nested_graph());
    let mut instance = engine.start(graph, NestedData::default()).await.unwrap();
    let status = engine.run_to_completion(&mut instance).await.unwrap();

    assert_eq!(status, InstanceStatus::Complete);
    let d = instance.data();
    assert!(d.outer_done && d.inner_done && d.tail_done);
    assert!(!d.comp_outer_step && !d.comp_inner_step);
    assert!(!d.comp_inner_saga && !d.comp_outer_saga);
    assert_eq!(engine.errors().count_for(instance.id()), 0);
}
