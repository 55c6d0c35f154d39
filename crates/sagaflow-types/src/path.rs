//! Hierarchical step addressing.
//!
//! A `StepPath` identifies one step in a workflow graph as a sequence of
//! child selections: each `PathSegment` picks a child sequence (`branch`) and
//! a position within it (`index`). Paths are indices, not references, so they
//! survive serialization and can address arbitrarily nested branches without
//! any cyclic ownership.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PathSegment
// ---------------------------------------------------------------------------

/// One child selection in a step path.
///
/// `branch` selects a child sequence of the parent step (a saga body is
/// sequence 0; a decision's branches are sequences 0..n in declaration
/// order). `index` is the position within that sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathSegment {
    /// Which child sequence of the parent step.
    pub branch: usize,
    /// Position within that sequence.
    pub index: usize,
}

impl PathSegment {
    pub fn new(branch: usize, index: usize) -> Self {
        Self { branch, index }
    }
}

// ---------------------------------------------------------------------------
// StepPath
// ---------------------------------------------------------------------------

/// Address of one step in a workflow graph.
///
/// The root sequence is addressed as branch 0 of an implicit container, so
/// top-level steps have single-segment paths `[{0, i}]`. A path is never
/// empty once it addresses a real step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepPath(Vec<PathSegment>);

impl StepPath {
    /// Path of the `index`-th step in the root sequence.
    pub fn root(index: usize) -> Self {
        Self(vec![PathSegment::new(0, index)])
    }

    /// Path of the `index`-th step in child sequence `branch` of this step.
    pub fn child(&self, branch: usize, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::new(branch, index));
        Self(segments)
    }

    /// Path of the next step in the same sequence, if the sequence is long
    /// enough. Existence is the graph's concern; this only bumps the index.
    pub fn next_sibling(&self) -> Self {
        let mut segments = self.0.clone();
        if let Some(last) = segments.last_mut() {
            last.index += 1;
        }
        Self(segments)
    }

    /// Path of the enclosing step, or `None` for top-level steps.
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// The final child selection of this path.
    pub fn last(&self) -> PathSegment {
        // Constructed paths always hold at least one segment.
        *self.0.last().unwrap_or(&PathSegment::new(0, 0))
    }

    /// Nesting depth (1 for top-level steps).
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Whether `self` addresses a step inside the subtree rooted at `other`
    /// (inclusive of `other` itself).
    pub fn starts_with(&self, other: &StepPath) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }
}

impl fmt::Display for StepPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}.{}", seg.branch, seg.index)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_and_child_addressing() {
        let saga = StepPath::root(1);
        assert_eq!(saga.depth(), 1);
        assert_eq!(saga.last(), PathSegment::new(0, 1));

        let body_step = saga.child(0, 2);
        assert_eq!(body_step.depth(), 2);
        assert_eq!(body_step.parent(), Some(saga.clone()));

        let branch_step = body_step.child(1, 0);
        assert_eq!(branch_step.parent(), Some(body_step));
    }

    #[test]
    fn test_next_sibling_bumps_index_only() {
        let p = StepPath::root(0).child(0, 3);
        let sib = p.next_sibling();
        assert_eq!(sib.last(), PathSegment::new(0, 4));
        assert_eq!(sib.parent(), p.parent());
    }

    #[test]
    fn test_parent_of_top_level_is_none() {
        assert_eq!(StepPath::root(5).parent(), None);
    }

    #[test]
    fn test_starts_with_subtree_check() {
        let saga = StepPath::root(1);
        let inner = saga.child(0, 3).child(0, 1);
        assert!(inner.starts_with(&saga));
        assert!(saga.starts_with(&saga));
        assert!(!saga.starts_with(&inner));
        assert!(!StepPath::root(2).starts_with(&saga));
    }

    #[test]
    fn test_display_form() {
        let p = StepPath::root(1).child(0, 3).child(1, 0);
        assert_eq!(p.to_string(), "0.1/0.3/1.0");
    }

    #[test]
    fn test_serde_roundtrip() {
        let p = StepPath::root(0).child(2, 4);
        let json = serde_json::to_string(&p).unwrap();
        let parsed: StepPath = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, p);
    }
}
