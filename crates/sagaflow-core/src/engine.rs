//! The workflow engine: instance state plus the transition loop.
//!
//! Execution is a sequence of discrete transitions. Each transition either
//! runs one compensation entry (when a scope is unwinding) or dispatches one
//! pending pointer, and the engine saves a full snapshot after every
//! transition so a crashed run resumes at the last persisted state.
//!
//! Failure handling is scope-local. A failing step inside a saga flips the
//! innermost enclosing scope to `Compensating`, abandons the scope's other
//! live pointers, and unwinds the compensation stack newest-first; once the
//! scope is `Compensated` the run continues at the saga's next sibling. A
//! failure with no enclosing scope is fatal.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sagaflow_types::error::{StepFailure, StoreError};
use sagaflow_types::instance::{
    InstanceSnapshot, InstanceStatus, PointerRecord, ScopeFailure, ScopeRecord, ScopeState,
};
use sagaflow_types::path::StepPath;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::aggregator::ErrorAggregator;
use crate::graph::{GraphError, StepKind, WorkflowGraph};
use crate::pointer::PointerArena;
use crate::repository::instance::InstanceStore;
use crate::router;
use crate::scope::ScopeTable;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Engine-level errors. These are faults in the engine's inputs or
/// environment; step failures are data, handled by containment, and never
/// surface here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("instance {0} not found")]
    InstanceNotFound(Uuid),

    #[error("pointer {0} dispatched twice")]
    PointerReentry(usize),

    #[error("payload serialization failed: {0}")]
    Serialization(String),

    #[error("snapshot belongs to definition {snapshot}, not {graph}")]
    DefinitionMismatch { snapshot: Uuid, graph: Uuid },

    #[error("compensation stack references step {0} which has no compensation")]
    MissingCompensation(String),

    #[error("corrupt scope table: {0}")]
    CorruptScope(String),

    #[error("transition budget of {0} exhausted")]
    TransitionBudget(u32),
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on transitions per `run_to_completion` call. A graph is
    /// finite and acyclic, so hitting this means a definition far larger
    /// than intended.
    pub max_transitions: u32,
    /// When true, `terminate` unwinds still-open saga scopes (running their
    /// compensations) before marking the instance `Terminated`. When false,
    /// only a scope already mid-unwind is drained.
    pub compensate_on_terminate: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_transitions: 10_000,
            compensate_on_terminate: false,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowInstance
// ---------------------------------------------------------------------------

/// Live state of one workflow run: the shared graph, the mutable payload,
/// and the pointer/scope bookkeeping.
pub struct WorkflowInstance<D> {
    id: Uuid,
    graph: Arc<WorkflowGraph<D>>,
    status: InstanceStatus,
    data: D,
    pointers: PointerArena,
    scopes: ScopeTable,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl<D> WorkflowInstance<D> {
    fn new(graph: Arc<WorkflowGraph<D>>, data: D) -> Self {
        let mut pointers = PointerArena::new();
        pointers.spawn(StepPath::root(0), None, None);
        Self {
            id: Uuid::now_v7(),
            graph,
            status: InstanceStatus::Running,
            data,
            pointers,
            scopes: ScopeTable::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn definition_name(&self) -> &str {
        self.graph.name()
    }

    /// Pointer state in arena order, for inspection and assertions.
    pub fn pointer_records(&self) -> Vec<PointerRecord> {
        self.pointers.to_records()
    }

    /// Scope state in creation order.
    pub fn scope_records(&self) -> Vec<ScopeRecord> {
        self.scopes.to_records()
    }

    fn finish(&mut self, status: InstanceStatus) {
        if !self.status.is_terminal() {
            self.status = status;
            self.finished_at = Some(Utc::now());
        }
    }
}

impl<D: Serialize> WorkflowInstance<D> {
    /// Serialize the full instance state. The graph itself is referenced by
    /// definition id, not embedded.
    pub fn snapshot(&self) -> Result<InstanceSnapshot, EngineError> {
        let data = serde_json::to_value(&self.data)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        Ok(InstanceSnapshot {
            id: self.id,
            definition_id: self.graph.id(),
            definition_name: self.graph.name().to_string(),
            status: self.status,
            data,
            pointers: self.pointers.to_records(),
            scopes: self.scopes.to_records(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

// The payload and graph hold closures, so Debug shows run identity only.
impl<D> fmt::Debug for WorkflowInstance<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowInstance")
            .field("id", &self.id)
            .field("definition", &self.graph.name())
            .field("status", &self.status)
            .finish()
    }
}

impl<D: DeserializeOwned> WorkflowInstance<D> {
    /// Rebuild a live instance from a persisted snapshot and its definition.
    pub fn from_snapshot(
        graph: Arc<WorkflowGraph<D>>,
        snapshot: InstanceSnapshot,
    ) -> Result<Self, EngineError> {
        if snapshot.definition_id != graph.id() {
            return Err(EngineError::DefinitionMismatch {
                snapshot: snapshot.definition_id,
                graph: graph.id(),
            });
        }
        let data = serde_json::from_value(snapshot.data)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        Ok(Self {
            id: snapshot.id,
            graph,
            status: snapshot.status,
            data,
            pointers: PointerArena::from_records(snapshot.pointers),
            scopes: ScopeTable::from_records(snapshot.scopes),
            started_at: snapshot.started_at,
            finished_at: snapshot.finished_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Drives workflow instances against an [`InstanceStore`] backend.
///
/// The engine itself is stateless between transitions apart from the error
/// log and the cancellation registry; all run state lives in the instance
/// and its persisted snapshots.
pub struct Engine<S> {
    store: S,
    config: EngineConfig,
    errors: ErrorAggregator,
    cancellations: DashMap<Uuid, CancellationToken>,
}

impl<S: InstanceStore> Engine<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: S, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            errors: ErrorAggregator::new(),
            cancellations: DashMap::new(),
        }
    }

    /// The unhandled step error log.
    pub fn errors(&self) -> &ErrorAggregator {
        &self.errors
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create a new instance of a definition and persist its initial state.
    pub async fn start<D: Serialize>(
        &self,
        graph: Arc<WorkflowGraph<D>>,
        data: D,
    ) -> Result<WorkflowInstance<D>, EngineError> {
        let instance = WorkflowInstance::new(graph, data);
        tracing::info!(
            instance_id = %instance.id,
            definition = %instance.definition_name(),
            "starting instance"
        );
        self.cancellations.insert(instance.id, CancellationToken::new());
        self.store.save(&instance.snapshot()?).await?;
        Ok(instance)
    }

    /// Load a persisted instance so it can continue against the same
    /// definition.
    pub async fn resume<D: DeserializeOwned>(
        &self,
        graph: Arc<WorkflowGraph<D>>,
        id: Uuid,
    ) -> Result<WorkflowInstance<D>, EngineError> {
        let snapshot = self.store.load(id).await.map_err(|e| match e {
            StoreError::NotFound => EngineError::InstanceNotFound(id),
            other => EngineError::Store(other),
        })?;
        let instance = WorkflowInstance::from_snapshot(graph, snapshot)?;
        if !instance.status.is_terminal() {
            self.cancellations.insert(instance.id, CancellationToken::new());
            tracing::info!(instance_id = %instance.id, "resumed instance");
        }
        Ok(instance)
    }

    /// Apply one transition and persist the result.
    pub async fn advance<D: Serialize>(
        &self,
        instance: &mut WorkflowInstance<D>,
    ) -> Result<InstanceStatus, EngineError> {
        if instance.status.is_terminal() {
            return Ok(instance.status);
        }
        self.transition(instance)?;
        self.store.save(&instance.snapshot()?).await?;
        if instance.status.is_terminal() {
            self.cancellations.remove(&instance.id);
            tracing::info!(
                instance_id = %instance.id,
                status = ?instance.status,
                "instance finished"
            );
        }
        Ok(instance.status)
    }

    /// Advance until the instance reaches a terminal status, honoring
    /// cancellation between transitions.
    pub async fn run_to_completion<D: Serialize>(
        &self,
        instance: &mut WorkflowInstance<D>,
    ) -> Result<InstanceStatus, EngineError> {
        let mut budget = self.config.max_transitions;
        while !instance.status.is_terminal() {
            let cancelled = self
                .cancellations
                .get(&instance.id)
                .map(|token| token.is_cancelled())
                .unwrap_or(false);
            if cancelled {
                return self.terminate(instance).await;
            }
            if budget == 0 {
                return Err(EngineError::TransitionBudget(self.config.max_transitions));
            }
            budget -= 1;
            self.advance(instance).await?;
        }
        Ok(instance.status)
    }

    /// Flag an instance for cancellation. The owning run loop observes the
    /// token at its next transition boundary. Returns false when the id is
    /// not an active instance.
    pub fn request_cancel(&self, id: Uuid) -> bool {
        match self.cancellations.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop an instance. Any scope already mid-unwind is drained first, and
    /// with `compensate_on_terminate` set, open scopes are unwound
    /// innermost-first as well. The instance ends `Terminated` (or `Errored`
    /// if a compensation fails during the drain).
    pub async fn terminate<D: Serialize>(
        &self,
        instance: &mut WorkflowInstance<D>,
    ) -> Result<InstanceStatus, EngineError> {
        if instance.status.is_terminal() {
            return Ok(instance.status);
        }
        if let Some((_, token)) = self.cancellations.remove(&instance.id) {
            token.cancel();
        }
        tracing::info!(instance_id = %instance.id, "terminating instance");

        let mut targets: Vec<usize> = instance
            .scopes
            .iter()
            .filter(|(_, sc)| sc.state == ScopeState::Compensating)
            .map(|(i, _)| i)
            .collect();
        if self.config.compensate_on_terminate {
            for s in instance.scopes.open_scopes_innermost_first() {
                instance.scopes.begin_unwind(s);
                targets.push(s);
            }
        }
        for s in targets {
            if !self.drain_scope(instance, s)? {
                self.store.save(&instance.snapshot()?).await?;
                return Ok(instance.status);
            }
        }

        instance.pointers.archive_active();
        instance.finish(InstanceStatus::Terminated);
        self.store.save(&instance.snapshot()?).await?;
        Ok(instance.status)
    }

    // -----------------------------------------------------------------------
    // Transition mechanics
    // -----------------------------------------------------------------------

    /// One transition: run a compensation entry if a scope is unwinding,
    /// otherwise dispatch the next pending pointer.
    fn transition<D>(&self, instance: &mut WorkflowInstance<D>) -> Result<(), EngineError> {
        if let Some(s) = instance.scopes.compensating() {
            return self.compensate_one(instance, s);
        }
        if let Some(idx) = instance.pointers.next_pending() {
            return self.execute_pointer(instance, idx);
        }
        instance.finish(InstanceStatus::Complete);
        Ok(())
    }

    fn execute_pointer<D>(
        &self,
        instance: &mut WorkflowInstance<D>,
        idx: usize,
    ) -> Result<(), EngineError> {
        if !instance.pointers.begin(idx) {
            return Err(EngineError::PointerReentry(idx));
        }
        let (path, scope) = {
            let pointer = instance
                .pointers
                .get(idx)
                .ok_or(EngineError::PointerReentry(idx))?;
            (pointer.path.clone(), pointer.scope)
        };
        let graph = Arc::clone(&instance.graph);
        let step = graph.resolve(&path)?;
        tracing::debug!(
            instance_id = %instance.id,
            step = %path,
            name = %step.name,
            kind = step.kind_name(),
            "executing step"
        );

        match &step.kind {
            StepKind::Saga { .. } => {
                // The saga pointer stays Running while its body executes;
                // the opened scope is the body's containment boundary.
                let scope_idx = instance.scopes.open(idx, scope);
                instance.pointers.spawn(path.child(0, 0), Some(idx), Some(scope_idx));
                Ok(())
            }
            StepKind::Decision { selector, branches } => {
                match router::route(selector.as_ref(), &instance.data, branches) {
                    Ok(Some(branch)) => {
                        instance.pointers.spawn(path.child(branch, 0), Some(idx), scope);
                        Ok(())
                    }
                    // No branch matched: the decision falls through.
                    Ok(None) => self.complete_pointer(instance, idx),
                    Err(failure) => self.handle_failure(instance, idx, failure),
                }
            }
            StepKind::Action { body } => match body(&mut instance.data) {
                Ok(()) => {
                    if step.compensation.is_some() {
                        if let Some(s) = scope {
                            instance.scopes.push_compensation(s, path.clone());
                        }
                    }
                    self.complete_pointer(instance, idx)
                }
                Err(failure) => self.handle_failure(instance, idx, failure),
            },
        }
    }

    /// Mark a pointer complete and move execution forward: spawn the next
    /// sibling, or bubble up through parents (closing cleanly-finished saga
    /// scopes) until a sibling exists or the root sequence is exhausted.
    fn complete_pointer<D>(
        &self,
        instance: &mut WorkflowInstance<D>,
        start: usize,
    ) -> Result<(), EngineError> {
        let mut idx = start;
        loop {
            if !instance.pointers.complete(idx) {
                return Err(EngineError::PointerReentry(idx));
            }
            let (path, parent, scope) = {
                let pointer = instance
                    .pointers
                    .get(idx)
                    .ok_or(EngineError::PointerReentry(idx))?;
                (pointer.path.clone(), pointer.parent, pointer.scope)
            };
            let sibling = path.next_sibling();
            if sibling.last().index < instance.graph.sequence_len(&path)? {
                instance.pointers.spawn(sibling, parent, scope);
                return Ok(());
            }
            match parent {
                Some(p) => {
                    // A saga whose body ran to the end closes cleanly; the
                    // stack is discarded. After containment the scope is
                    // already Compensated and close() is a no-op.
                    if let Some(s) = instance.scopes.scope_owned_by(p) {
                        instance.scopes.close(s);
                    }
                    idx = p;
                }
                None => {
                    instance.finish(InstanceStatus::Complete);
                    return Ok(());
                }
            }
        }
    }

    /// React to a step body or selector failure at a pointer.
    fn handle_failure<D>(
        &self,
        instance: &mut WorkflowInstance<D>,
        idx: usize,
        failure: StepFailure,
    ) -> Result<(), EngineError> {
        instance.pointers.fail(idx);
        let (path, scope) = {
            let pointer = instance
                .pointers
                .get(idx)
                .ok_or(EngineError::PointerReentry(idx))?;
            (pointer.path.clone(), pointer.scope)
        };
        tracing::warn!(
            instance_id = %instance.id,
            step = %path,
            error = %failure,
            "step failed"
        );

        let Some(s) = scope else {
            // No enclosing saga: fatal.
            self.errors.record(instance.id, path, failure.message);
            instance.pointers.archive_active();
            instance.finish(InstanceStatus::Errored);
            return Ok(());
        };

        instance.scopes.begin_containment(
            s,
            ScopeFailure {
                step: path,
                message: failure.message,
            },
        );

        // Abandon everything still live inside the containing scope. The
        // saga pointer itself sits in the enclosing scope and survives.
        let doomed: Vec<usize> = instance
            .pointers
            .iter()
            .filter(|(_, p)| {
                !p.status.is_terminal()
                    && p.scope.is_some_and(|ps| instance.scopes.chain_contains(ps, s))
            })
            .map(|(i, _)| i)
            .collect();
        for i in doomed {
            instance.pointers.archive(i);
        }

        // Nested scopes that were still open are abandoned with their
        // stacks: only the containing scope unwinds.
        let nested: Vec<usize> = instance
            .scopes
            .iter()
            .filter(|&(i, sc)| {
                i != s && sc.state == ScopeState::Open && instance.scopes.chain_contains(i, s)
            })
            .map(|(i, _)| i)
            .collect();
        for i in nested {
            instance.scopes.close(i);
        }
        Ok(())
    }

    /// One unwind transition: pop and run the newest compensation entry, or
    /// finalize the scope once the stack is empty.
    fn compensate_one<D>(
        &self,
        instance: &mut WorkflowInstance<D>,
        s: usize,
    ) -> Result<(), EngineError> {
        if let Some(path) = instance.scopes.pop_compensation(s) {
            self.run_compensation(instance, &path)?;
            return Ok(());
        }
        if let Some(saga_pointer) = self.finalize_scope(instance, s)? {
            self.complete_pointer(instance, saga_pointer)?;
        }
        Ok(())
    }

    /// Run one compensation action. Returns false when the action failed:
    /// the unwind halts and the instance is already `Errored`.
    fn run_compensation<D>(
        &self,
        instance: &mut WorkflowInstance<D>,
        path: &StepPath,
    ) -> Result<bool, EngineError> {
        let graph = Arc::clone(&instance.graph);
        let step = graph.resolve(path)?;
        let compensation = step
            .compensation
            .as_ref()
            .ok_or_else(|| EngineError::MissingCompensation(path.to_string()))?;
        tracing::debug!(instance_id = %instance.id, step = %path, "running compensation");
        match compensation(&mut instance.data) {
            Ok(()) => Ok(true),
            Err(failure) => {
                tracing::error!(
                    instance_id = %instance.id,
                    step = %path,
                    error = %failure,
                    "compensation failed, halting unwind"
                );
                self.errors.record(
                    instance.id,
                    path.clone(),
                    format!("compensation failed: {}", failure.message),
                );
                instance.pointers.archive_active();
                instance.finish(InstanceStatus::Errored);
                Ok(false)
            }
        }
    }

    /// Finish an unwound scope: run the saga step's own compensation as the
    /// final undo, mark the scope `Compensated`, and log the original
    /// failure once. Returns the saga pointer to resume from, or `None` when
    /// the final undo itself failed.
    fn finalize_scope<D>(
        &self,
        instance: &mut WorkflowInstance<D>,
        s: usize,
    ) -> Result<Option<usize>, EngineError> {
        let (saga_pointer, failure) = {
            let scope = instance
                .scopes
                .get(s)
                .ok_or_else(|| EngineError::CorruptScope(format!("scope {s} missing")))?;
            (scope.pointer, scope.failure.clone())
        };
        let saga_path = instance
            .pointers
            .get(saga_pointer)
            .ok_or_else(|| EngineError::CorruptScope(format!("scope {s} owner missing")))?
            .path
            .clone();

        let has_own_compensation = {
            let graph = Arc::clone(&instance.graph);
            graph.resolve(&saga_path)?.compensation.is_some()
        };
        if has_own_compensation && !self.run_compensation(instance, &saga_path)? {
            // The unwind halted, but the failure that triggered it still
            // belongs in the log.
            if let Some(f) = failure {
                self.errors.record(instance.id, f.step, f.message);
            }
            return Ok(None);
        }

        instance.scopes.mark_compensated(s);
        if let Some(f) = failure {
            tracing::debug!(
                instance_id = %instance.id,
                step = %f.step,
                "failure contained"
            );
            self.errors.record(instance.id, f.step, f.message);
        }
        Ok(Some(saga_pointer))
    }

    /// Terminate-time drain: run a scope's remaining compensations to the
    /// bottom without resuming execution afterwards. Returns false when a
    /// compensation failed.
    fn drain_scope<D>(
        &self,
        instance: &mut WorkflowInstance<D>,
        s: usize,
    ) -> Result<bool, EngineError> {
        while let Some(path) = instance.scopes.pop_compensation(s) {
            if !self.run_compensation(instance, &path)? {
                return Ok(false);
            }
        }
        Ok(self.finalize_scope(instance, s)?.is_some())
    }
}
