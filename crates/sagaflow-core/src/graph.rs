//! Immutable step graph.
//!
//! A `WorkflowGraph` is the tree of steps built once per workflow definition
//! and shared read-only across all instances. Step kinds form a closed enum
//! (Action / Decision / Saga) so the executor's dispatch is exhaustive at
//! compile time. Child relationships are addressed positionally: each step
//! exposes zero or more child sequences, and a `StepPath` walks them from the
//! root, which makes lookup O(depth) and keeps the graph free of cycles by
//! construction.

use std::fmt;

use sagaflow_types::error::StepFailure;
use sagaflow_types::path::StepPath;
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while building or navigating a step graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A path does not address a step in this graph.
    #[error("unknown step: {0}")]
    UnknownStep(String),

    /// The builder finished with no steps.
    #[error("workflow must have at least one step")]
    EmptyWorkflow,

    /// A saga was declared with an empty body sequence.
    #[error("saga '{0}' must have at least one body step")]
    EmptySagaBody(String),

    /// `branch` was called when the preceding step is not a decision.
    #[error("branch '{0}' declared without a preceding decision step")]
    BranchWithoutDecision(String),

    /// Two branches of the same decision share a label.
    #[error("duplicate branch label '{label}' on decision '{decision}'")]
    DuplicateBranchLabel { decision: String, label: String },

    /// A branch was declared with an empty label.
    #[error("branch label must not be empty")]
    EmptyBranchLabel,

    /// A branch was declared with no steps.
    #[error("branch '{0}' must have at least one step")]
    EmptyBranchBody(String),

    /// `compensate_with` was called before any step was declared.
    #[error("compensation declared before any step")]
    CompensationWithoutStep,
}

// ---------------------------------------------------------------------------
// Step bodies
// ---------------------------------------------------------------------------

/// A step body or compensation action: runs against the instance payload with
/// exclusive access, succeeding or raising an opaque failure.
pub type StepBody<D> = Box<dyn Fn(&mut D) -> Result<(), StepFailure> + Send + Sync>;

/// A decision selector: reads the payload and yields the label to match
/// against the decision's case table. A selector error is treated exactly
/// like a step body failure at that position.
pub type Selector<D> = Box<dyn Fn(&D) -> Result<String, StepFailure> + Send + Sync>;

// ---------------------------------------------------------------------------
// Step kinds
// ---------------------------------------------------------------------------

/// One labeled, mutually-exclusive sub-graph of a decision step.
pub struct Branch<D> {
    /// Label matched against the selector's value.
    pub label: String,
    /// Steps executed when this branch is taken.
    pub steps: Vec<Step<D>>,
}

/// The kind of a step, a closed tagged-variant type.
pub enum StepKind<D> {
    /// Run a body against the payload and proceed to the next sibling.
    Action { body: StepBody<D> },
    /// Evaluate a selector and take at most one matching branch.
    Decision {
        selector: Selector<D>,
        branches: Vec<Branch<D>>,
    },
    /// Execute a body sequence under a compensation scope.
    Saga { body: Vec<Step<D>> },
}

/// One step in a workflow graph. Immutable once the definition is built.
pub struct Step<D> {
    /// Human-readable step name (used in logs and error records).
    pub name: String,
    /// The kind tag and kind-specific payload.
    pub kind: StepKind<D>,
    /// Optional undo action, registered on the innermost enclosing
    /// compensation stack after the step completes successfully.
    pub compensation: Option<StepBody<D>>,
}

impl<D> Step<D> {
    /// Kind tag as a static string, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            StepKind::Action { .. } => "action",
            StepKind::Decision { .. } => "decision",
            StepKind::Saga { .. } => "saga",
        }
    }

    /// The `branch`-th child sequence of this step, if it has one.
    ///
    /// A saga has exactly one child sequence (its body); a decision has one
    /// per branch in declaration order; an action has none.
    pub fn child_sequence(&self, branch: usize) -> Option<&[Step<D>]> {
        match &self.kind {
            StepKind::Action { .. } => None,
            StepKind::Saga { body } => (branch == 0).then_some(body.as_slice()),
            StepKind::Decision { branches, .. } => {
                branches.get(branch).map(|b| b.steps.as_slice())
            }
        }
    }
}

// Bodies are opaque closures, so Debug shows identity only.
impl<D> fmt::Debug for Step<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &self.kind_name())
            .field("compensation", &self.compensation.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

/// The immutable step graph for one workflow definition.
///
/// Shared via `Arc` across every instance of the definition; never mutated
/// during execution.
pub struct WorkflowGraph<D> {
    id: Uuid,
    name: String,
    steps: Vec<Step<D>>,
}

impl<D> WorkflowGraph<D> {
    pub(crate) fn new(name: String, steps: Vec<Step<D>>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name,
            steps,
        }
    }

    /// Definition id (referenced by instance snapshots).
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Definition name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of steps in the root sequence.
    pub fn root_len(&self) -> usize {
        self.steps.len()
    }

    /// Resolve a path to its step in O(depth).
    pub fn resolve(&self, path: &StepPath) -> Result<&Step<D>, GraphError> {
        let unknown = || GraphError::UnknownStep(path.to_string());
        let (first, rest) = path.segments().split_first().ok_or_else(unknown)?;
        if first.branch != 0 {
            return Err(unknown());
        }
        let mut step = self.steps.get(first.index).ok_or_else(unknown)?;
        for seg in rest {
            let seq = step.child_sequence(seg.branch).ok_or_else(unknown)?;
            step = seq.get(seg.index).ok_or_else(unknown)?;
        }
        Ok(step)
    }

    /// Length of the sequence that contains the step at `path`.
    ///
    /// Used to decide whether a completed pointer has a next sibling.
    pub fn sequence_len(&self, path: &StepPath) -> Result<usize, GraphError> {
        match path.parent() {
            None => Ok(self.steps.len()),
            Some(parent_path) => {
                let parent = self.resolve(&parent_path)?;
                parent
                    .child_sequence(path.last().branch)
                    .map(<[Step<D>]>::len)
                    .ok_or_else(|| GraphError::UnknownStep(path.to_string()))
            }
        }
    }
}

impl<D> fmt::Debug for WorkflowGraph<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowGraph")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
