//! Fluent workflow definition builder.
//!
//! Pure data construction: the builder assembles the immutable step graph and
//! carries no runtime semantics. Structural defects (branch without a
//! decision, empty saga body, duplicate branch labels) are detected as the
//! chain is built and surfaced from `build()`, so the fluent methods stay
//! infallible.
//!
//! ```
//! use sagaflow_core::builder::WorkflowBuilder;
//!
//! #[derive(Default)]
//! struct Data { shipped: bool }
//!
//! let graph = WorkflowBuilder::new("ship-order")
//!     .start_with("reserve", |_d: &mut Data| Ok(()))
//!     .saga("fulfill", |s| {
//!         s.start_with("pack", |_d| Ok(()))
//!             .compensate_with(|_d| Ok(()))
//!             .then("ship", |d: &mut Data| { d.shipped = true; Ok(()) })
//!     })
//!     .build()
//!     .unwrap();
//! assert_eq!(graph.root_len(), 2);
//! ```

use sagaflow_types::error::StepFailure;

use crate::graph::{Branch, GraphError, Step, StepKind, WorkflowGraph};

// ---------------------------------------------------------------------------
// SequenceBuilder
// ---------------------------------------------------------------------------

/// Builds one step sequence: the workflow root, a saga body, or a branch.
///
/// The first structural defect encountered is kept and reported by the
/// enclosing `WorkflowBuilder::build`.
pub struct SequenceBuilder<D> {
    steps: Vec<Step<D>>,
    error: Option<GraphError>,
}

impl<D> SequenceBuilder<D> {
    fn new() -> Self {
        Self {
            steps: Vec::new(),
            error: None,
        }
    }

    fn record(&mut self, error: GraphError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Declare the first step of the sequence. Alias of `then`, kept for
    /// readability of definition code.
    pub fn start_with(
        self,
        name: &str,
        body: impl Fn(&mut D) -> Result<(), StepFailure> + Send + Sync + 'static,
    ) -> Self {
        self.then(name, body)
    }

    /// Append an action step.
    pub fn then(
        mut self,
        name: &str,
        body: impl Fn(&mut D) -> Result<(), StepFailure> + Send + Sync + 'static,
    ) -> Self {
        self.steps.push(Step {
            name: name.to_string(),
            kind: StepKind::Action {
                body: Box::new(body),
            },
            compensation: None,
        });
        self
    }

    /// Attach an undo action to the most recently declared step.
    pub fn compensate_with(
        mut self,
        compensation: impl Fn(&mut D) -> Result<(), StepFailure> + Send + Sync + 'static,
    ) -> Self {
        match self.steps.last_mut() {
            Some(step) => step.compensation = Some(Box::new(compensation)),
            None => self.record(GraphError::CompensationWithoutStep),
        }
        self
    }

    /// Append a saga step whose body runs under a compensation scope.
    pub fn saga(
        mut self,
        name: &str,
        body: impl FnOnce(SequenceBuilder<D>) -> SequenceBuilder<D>,
    ) -> Self {
        let inner = body(SequenceBuilder::new());
        if let Some(error) = inner.error {
            self.record(error);
        } else if inner.steps.is_empty() {
            self.record(GraphError::EmptySagaBody(name.to_string()));
        }
        self.steps.push(Step {
            name: name.to_string(),
            kind: StepKind::Saga { body: inner.steps },
            compensation: None,
        });
        self
    }

    /// Append a decision step with an empty case table. Follow with one or
    /// more `branch` calls to populate it.
    pub fn decide(
        mut self,
        name: &str,
        selector: impl Fn(&D) -> Result<String, StepFailure> + Send + Sync + 'static,
    ) -> Self {
        self.steps.push(Step {
            name: name.to_string(),
            kind: StepKind::Decision {
                selector: Box::new(selector),
                branches: Vec::new(),
            },
            compensation: None,
        });
        self
    }

    /// Add a labeled branch to the most recently declared decision.
    pub fn branch(
        mut self,
        label: &str,
        steps: impl FnOnce(SequenceBuilder<D>) -> SequenceBuilder<D>,
    ) -> Self {
        if label.is_empty() {
            self.record(GraphError::EmptyBranchLabel);
            return self;
        }
        let inner = steps(SequenceBuilder::new());
        if let Some(error) = inner.error {
            self.record(error);
            return self;
        }
        if inner.steps.is_empty() {
            self.record(GraphError::EmptyBranchBody(label.to_string()));
            return self;
        }

        let mut defect = None;
        match self.steps.last_mut() {
            Some(Step {
                name,
                kind: StepKind::Decision { branches, .. },
                ..
            }) => {
                if branches.iter().any(|b| b.label == label) {
                    defect = Some(GraphError::DuplicateBranchLabel {
                        decision: name.clone(),
                        label: label.to_string(),
                    });
                } else {
                    branches.push(Branch {
                        label: label.to_string(),
                        steps: inner.steps,
                    });
                }
            }
            _ => defect = Some(GraphError::BranchWithoutDecision(label.to_string())),
        }
        if let Some(error) = defect {
            self.record(error);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// WorkflowBuilder
// ---------------------------------------------------------------------------

/// Builds a complete workflow definition (the root sequence plus a name).
pub struct WorkflowBuilder<D> {
    name: String,
    root: SequenceBuilder<D>,
}

impl<D> WorkflowBuilder<D> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            root: SequenceBuilder::new(),
        }
    }

    /// Declare the first step of the workflow.
    pub fn start_with(
        mut self,
        name: &str,
        body: impl Fn(&mut D) -> Result<(), StepFailure> + Send + Sync + 'static,
    ) -> Self {
        self.root = self.root.start_with(name, body);
        self
    }

    /// Append an action step at the root level.
    pub fn then(
        mut self,
        name: &str,
        body: impl Fn(&mut D) -> Result<(), StepFailure> + Send + Sync + 'static,
    ) -> Self {
        self.root = self.root.then(name, body);
        self
    }

    /// Attach an undo action to the most recently declared root step.
    pub fn compensate_with(
        mut self,
        compensation: impl Fn(&mut D) -> Result<(), StepFailure> + Send + Sync + 'static,
    ) -> Self {
        self.root = self.root.compensate_with(compensation);
        self
    }

    /// Append a saga step at the root level.
    pub fn saga(
        mut self,
        name: &str,
        body: impl FnOnce(SequenceBuilder<D>) -> SequenceBuilder<D>,
    ) -> Self {
        self.root = self.root.saga(name, body);
        self
    }

    /// Append a decision step at the root level.
    pub fn decide(
        mut self,
        name: &str,
        selector: impl Fn(&D) -> Result<String, StepFailure> + Send + Sync + 'static,
    ) -> Self {
        self.root = self.root.decide(name, selector);
        self
    }

    /// Add a labeled branch to the most recent root-level decision.
    pub fn branch(
        mut self,
        label: &str,
        steps: impl FnOnce(SequenceBuilder<D>) -> SequenceBuilder<D>,
    ) -> Self {
        self.root = self.root.branch(label, steps);
        self
    }

    /// Finish the definition, surfacing the first structural defect if any.
    pub fn build(self) -> Result<WorkflowGraph<D>, GraphError> {
        if let Some(error) = self.root.error {
            return Err(error);
        }
        if self.root.steps.is_empty() {
            return Err(GraphError::EmptyWorkflow);
        }
        Ok(WorkflowGraph::new(self.name, self.root.steps))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
