//! Decision routing.
//!
//! A decision step evaluates its selector against the read-only payload and
//! matches the returned label against the branch table. Exactly one branch is
//! taken per evaluation; an unmatched label is a fall-through, not an error.

use sagaflow_types::error::StepFailure;

use crate::graph::Branch;

/// Evaluate a selector against the branch table.
///
/// Returns the index of the matching branch, `None` when no label matches
/// (the decision falls through to its next sibling), or the selector's
/// failure, which the caller treats like a step body failure at the
/// decision's position.
pub fn route<D>(
    selector: &(dyn Fn(&D) -> Result<String, StepFailure> + Send + Sync),
    data: &D,
    branches: &[Branch<D>],
) -> Result<Option<usize>, StepFailure> {
    let label = selector(data)?;
    Ok(branches.iter().position(|b| b.label == label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Step, StepKind};

    struct Payload {
        route: String,
    }

    fn noop_branch(label: &str) -> Branch<Payload> {
        Branch {
            label: label.to_string(),
            steps: vec![Step {
                name: format!("{label}-step"),
                kind: StepKind::Action {
                    body: Box::new(|_d| Ok(())),
                },
                compensation: None,
            }],
        }
    }

    #[test]
    fn test_route_matches_label() {
        let branches = vec![noop_branch("standard"), noop_branch("express")];
        let data = Payload {
            route: "express".to_string(),
        };
        let taken = route(&|d: &Payload| Ok(d.route.clone()), &data, &branches);
        assert_eq!(taken.unwrap(), Some(1));
    }

    #[test]
    fn test_route_falls_through_on_unmatched_label() {
        let branches = vec![noop_branch("standard")];
        let data = Payload {
            route: "overnight".to_string(),
        };
        let taken = route(&|d: &Payload| Ok(d.route.clone()), &data, &branches);
        assert_eq!(taken.unwrap(), None);
    }

    #[test]
    fn test_route_propagates_selector_failure() {
        let branches = vec![noop_branch("standard")];
        let data = Payload {
            route: String::new(),
        };
        let err = route(
            &|_d: &Payload| Err(StepFailure::new("routing table unavailable")),
            &data,
            &branches,
        )
        .unwrap_err();
        assert_eq!(err.message, "routing table unavailable");
    }

    #[test]
    fn test_first_matching_branch_wins() {
        // Duplicate labels are rejected at build time; position() picking the
        // first match keeps routing deterministic regardless.
        let branches = vec![noop_branch("a"), noop_branch("b"), noop_branch("a")];
        let data = Payload {
            route: "a".to_string(),
        };
        let taken = route(&|d: &Payload| Ok(d.route.clone()), &data, &branches);
        assert_eq!(taken.unwrap(), Some(0));
    }
}
