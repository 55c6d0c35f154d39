//! Execution pointers and the pointer arena.
//!
//! A pointer marks one position of progress within an instance's step graph.
//! Pointers live in an arena (`Vec` indexed by spawn order) and refer to each
//! other by index, never by reference, so the whole set snapshots to
//! `Vec<PointerRecord>` and restores without fixups.
//!
//! Execution is cooperative and sequential within one instance: at any moment
//! at most one pointer is `Pending`, and dispatch order is spawn order.

use sagaflow_types::instance::{PointerRecord, PointerStatus};
use sagaflow_types::path::StepPath;

// ---------------------------------------------------------------------------
// ExecutionPointer
// ---------------------------------------------------------------------------

/// One position being walked in the step graph.
#[derive(Debug, Clone)]
pub struct ExecutionPointer {
    /// Address of the step this pointer walks.
    pub path: StepPath,
    /// Current status.
    pub status: PointerStatus,
    /// Arena index of the spawning pointer.
    pub parent: Option<usize>,
    /// Arena indices of pointers this one spawned.
    pub children: Vec<usize>,
    /// Index of the innermost enclosing saga scope, if any.
    pub scope: Option<usize>,
    /// Abandoned by containment or termination; must never execute.
    pub archived: bool,
}

impl ExecutionPointer {
    fn new(path: StepPath, parent: Option<usize>, scope: Option<usize>) -> Self {
        Self {
            path,
            status: PointerStatus::Pending,
            parent,
            children: Vec::new(),
            scope,
            archived: false,
        }
    }

    fn to_record(&self) -> PointerRecord {
        PointerRecord {
            path: self.path.clone(),
            status: self.status,
            parent: self.parent,
            children: self.children.clone(),
            scope: self.scope,
            archived: self.archived,
        }
    }

    fn from_record(record: PointerRecord) -> Self {
        Self {
            path: record.path,
            status: record.status,
            parent: record.parent,
            children: record.children,
            scope: record.scope,
            archived: record.archived,
        }
    }
}

// ---------------------------------------------------------------------------
// PointerArena
// ---------------------------------------------------------------------------

/// Arena storage for an instance's execution pointers.
#[derive(Debug, Default)]
pub struct PointerArena {
    pointers: Vec<ExecutionPointer>,
}

impl PointerArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pointers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&ExecutionPointer> {
        self.pointers.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut ExecutionPointer> {
        self.pointers.get_mut(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ExecutionPointer)> {
        self.pointers.iter().enumerate()
    }

    /// Create a `Pending` pointer and link it under its parent.
    pub fn spawn(
        &mut self,
        path: StepPath,
        parent: Option<usize>,
        scope: Option<usize>,
    ) -> usize {
        let idx = self.pointers.len();
        self.pointers.push(ExecutionPointer::new(path, parent, scope));
        if let Some(p) = parent {
            if let Some(parent_ptr) = self.pointers.get_mut(p) {
                parent_ptr.children.push(idx);
            }
        }
        idx
    }

    /// First dispatchable pointer: `Pending`, not archived, in spawn order.
    pub fn next_pending(&self) -> Option<usize> {
        self.pointers
            .iter()
            .position(|p| p.status == PointerStatus::Pending && !p.archived)
    }

    /// Transition `Pending -> Running`. Returns false on any other status:
    /// a pointer executes at most once.
    pub fn begin(&mut self, idx: usize) -> bool {
        match self.pointers.get_mut(idx) {
            Some(p) if p.status == PointerStatus::Pending => {
                p.status = PointerStatus::Running;
                true
            }
            _ => false,
        }
    }

    /// Transition to `Complete`. Returns false if the pointer was already
    /// terminal (re-entry is forbidden).
    pub fn complete(&mut self, idx: usize) -> bool {
        match self.pointers.get_mut(idx) {
            Some(p) if !p.status.is_terminal() => {
                p.status = PointerStatus::Complete;
                true
            }
            _ => false,
        }
    }

    /// Transition to `Failed`. Returns false if already terminal.
    pub fn fail(&mut self, idx: usize) -> bool {
        match self.pointers.get_mut(idx) {
            Some(p) if !p.status.is_terminal() => {
                p.status = PointerStatus::Failed;
                true
            }
            _ => false,
        }
    }

    /// Archive a pointer so it never dispatches.
    pub fn archive(&mut self, idx: usize) {
        if let Some(p) = self.pointers.get_mut(idx) {
            p.archived = true;
        }
    }

    /// Archive every non-terminal pointer (fatal errors and termination).
    pub fn archive_active(&mut self) {
        for p in &mut self.pointers {
            if !p.status.is_terminal() {
                p.archived = true;
            }
        }
    }

    pub fn to_records(&self) -> Vec<PointerRecord> {
        self.pointers.iter().map(ExecutionPointer::to_record).collect()
    }

    pub fn from_records(records: Vec<PointerRecord>) -> Self {
        Self {
            pointers: records.into_iter().map(ExecutionPointer::from_record).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
