//! Saga scopes and the compensation stack.
//!
//! Each execution of a saga step opens a scope: a LIFO stack of compensation
//! entries plus a small state machine. Completed compensatable steps inside
//! the scope push their paths; on failure the scope flips to `Compensating`
//! and the stack unwinds newest-first; on clean completion the scope closes
//! and the stack is discarded without running anything.
//!
//! Like pointers, scopes live in an index-addressed table so the whole set
//! serializes to `Vec<ScopeRecord>`.

use sagaflow_types::instance::{ScopeFailure, ScopeRecord, ScopeState};
use sagaflow_types::path::StepPath;

// ---------------------------------------------------------------------------
// SagaScope
// ---------------------------------------------------------------------------

/// Live state of one saga scope instance.
#[derive(Debug, Clone)]
pub struct SagaScope {
    /// Arena index of the saga pointer that owns this scope.
    pub pointer: usize,
    /// Enclosing scope index for nested sagas.
    pub parent: Option<usize>,
    pub state: ScopeState,
    /// Registered compensation entries, oldest first. Unwind pops from the
    /// back.
    pub stack: Vec<StepPath>,
    /// The failure that triggered containment, if any.
    pub failure: Option<ScopeFailure>,
}

impl SagaScope {
    fn to_record(&self) -> ScopeRecord {
        ScopeRecord {
            pointer: self.pointer,
            parent: self.parent,
            state: self.state,
            stack: self.stack.clone(),
            failure: self.failure.clone(),
        }
    }

    fn from_record(record: ScopeRecord) -> Self {
        Self {
            pointer: record.pointer,
            parent: record.parent,
            state: record.state,
            stack: record.stack,
            failure: record.failure,
        }
    }
}

// ---------------------------------------------------------------------------
// ScopeTable
// ---------------------------------------------------------------------------

/// Index-addressed table of an instance's saga scopes, in creation order.
#[derive(Debug, Default)]
pub struct ScopeTable {
    scopes: Vec<SagaScope>,
}

impl ScopeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&SagaScope> {
        self.scopes.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &SagaScope)> {
        self.scopes.iter().enumerate()
    }

    /// Open a fresh scope for a saga pointer.
    pub fn open(&mut self, pointer: usize, parent: Option<usize>) -> usize {
        let idx = self.scopes.len();
        self.scopes.push(SagaScope {
            pointer,
            parent,
            state: ScopeState::Open,
            stack: Vec::new(),
            failure: None,
        });
        idx
    }

    /// Register a completed step's compensation on an `Open` scope.
    ///
    /// Registration on a non-open scope is ignored: once containment has
    /// begun the stack contents are frozen.
    pub fn push_compensation(&mut self, idx: usize, path: StepPath) {
        if let Some(scope) = self.scopes.get_mut(idx) {
            if scope.state == ScopeState::Open {
                scope.stack.push(path);
            }
        }
    }

    /// Flip `Open -> Compensating` and record the triggering failure.
    ///
    /// Returns false if the scope was not open (containment begins at most
    /// once per scope).
    pub fn begin_containment(&mut self, idx: usize, failure: ScopeFailure) -> bool {
        match self.scopes.get_mut(idx) {
            Some(scope) if scope.state == ScopeState::Open => {
                scope.state = ScopeState::Compensating;
                scope.failure = Some(failure);
                true
            }
            _ => false,
        }
    }

    /// Flip `Open -> Compensating` with no recorded failure (termination
    /// unwind). The distinction matters to the error log: only failures
    /// produce error records.
    pub fn begin_unwind(&mut self, idx: usize) -> bool {
        match self.scopes.get_mut(idx) {
            Some(scope) if scope.state == ScopeState::Open => {
                scope.state = ScopeState::Compensating;
                true
            }
            _ => false,
        }
    }

    /// Pop the newest compensation entry off a `Compensating` scope.
    pub fn pop_compensation(&mut self, idx: usize) -> Option<StepPath> {
        match self.scopes.get_mut(idx) {
            Some(scope) if scope.state == ScopeState::Compensating => scope.stack.pop(),
            _ => None,
        }
    }

    /// Finish the unwind: `Compensating -> Compensated`.
    pub fn mark_compensated(&mut self, idx: usize) {
        if let Some(scope) = self.scopes.get_mut(idx) {
            if scope.state == ScopeState::Compensating {
                scope.state = ScopeState::Compensated;
            }
        }
    }

    /// Clean completion: `Open -> Closed`, stack discarded unexecuted.
    pub fn close(&mut self, idx: usize) {
        if let Some(scope) = self.scopes.get_mut(idx) {
            if scope.state == ScopeState::Open {
                scope.state = ScopeState::Closed;
                scope.stack.clear();
            }
        }
    }

    /// Lowest-indexed scope currently unwinding, if any.
    pub fn compensating(&self) -> Option<usize> {
        self.scopes
            .iter()
            .position(|s| s.state == ScopeState::Compensating)
    }

    /// Indices of `Open` scopes, innermost (newest) first.
    pub fn open_scopes_innermost_first(&self) -> Vec<usize> {
        self.scopes
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, s)| s.state == ScopeState::Open)
            .map(|(i, _)| i)
            .collect()
    }

    /// The scope owned by a given saga pointer, if one was opened.
    pub fn scope_owned_by(&self, pointer: usize) -> Option<usize> {
        self.scopes.iter().position(|s| s.pointer == pointer)
    }

    /// Whether `target` appears in the parent chain starting at `idx`
    /// (inclusive).
    pub fn chain_contains(&self, idx: usize, target: usize) -> bool {
        let mut cursor = Some(idx);
        while let Some(i) = cursor {
            if i == target {
                return true;
            }
            cursor = self.scopes.get(i).and_then(|s| s.parent);
        }
        false
    }

    pub fn to_records(&self) -> Vec<ScopeRecord> {
        self.scopes.iter().map(SagaScope::to_record).collect()
    }

    pub fn from_records(records: Vec<ScopeRecord>) -> Self {
        Self {
            scopes: records.into_iter().map(SagaScope::from_record).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
