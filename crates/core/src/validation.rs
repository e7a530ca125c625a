//! Structural validation of cohort definitions.
//!
//! Two levels of checking:
//! - [`check_structure`] runs before every evaluation and rejects only trees that cannot be
//!   evaluated at all: no root, a group without children, a `NOT` without exactly one child,
//!   a leaf without an atomic query. Depth and width are not limited here.
//! - [`validate_cohort`] is the eager check callers opt into when a definition is authored.
//!   It adds the [`MAX_GROUP_DEPTH`] and [`MAX_GROUP_CHILDREN`] caps.
//!
//! Both walk the tree with an explicit stack, so a very deep tree cannot exhaust the call
//! stack.

use crate::constants::{MAX_GROUP_CHILDREN, MAX_GROUP_DEPTH};
use crate::error::{CohortError, CohortResult};
use crate::model::{Cohort, CohortGroup, Operator};

/// Validates that a cohort has a root, that every node of its tree is well formed and that
/// the tree stays within the authoring caps.
///
/// # Errors
///
/// Returns `CohortError::InvalidCohort` if:
/// - the root group is missing,
/// - a group has no children or more than [`MAX_GROUP_CHILDREN`],
/// - a `NOT` group does not have exactly one child,
/// - a leaf has no atomic query,
/// - the tree is deeper than [`MAX_GROUP_DEPTH`].
pub fn validate_cohort(cohort: &Cohort) -> CohortResult<()> {
    validate_group(root_of(cohort)?)
}

/// Validates a subtree on its own, caps included.
pub fn validate_group(group: &CohortGroup) -> CohortResult<()> {
    let mut stack = vec![(group, 1usize)];
    while let Some((node, depth)) = stack.pop() {
        if depth > MAX_GROUP_DEPTH {
            return Err(CohortError::InvalidCohort(format!(
                "cohort nesting exceeds maximum depth of {}",
                MAX_GROUP_DEPTH
            )));
        }
        check_node(node)?;
        if let CohortGroup::Group { children, .. } = node {
            if children.len() > MAX_GROUP_CHILDREN {
                return Err(CohortError::InvalidCohort(format!(
                    "group has {} children, maximum is {}",
                    children.len(),
                    MAX_GROUP_CHILDREN
                )));
            }
            stack.extend(children.iter().rev().map(|child| (child, depth + 1)));
        }
    }
    Ok(())
}

/// The checks evaluation cannot do without. Size is not limited.
///
/// # Errors
///
/// Returns `CohortError::InvalidCohort` for a missing root, an empty group, a `NOT` group
/// without exactly one child or a leaf without an atomic query.
pub fn check_structure(cohort: &Cohort) -> CohortResult<()> {
    let mut stack = vec![root_of(cohort)?];
    while let Some(node) = stack.pop() {
        check_node(node)?;
        if let CohortGroup::Group { children, .. } = node {
            stack.extend(children.iter().rev());
        }
    }
    Ok(())
}

fn root_of(cohort: &Cohort) -> CohortResult<&CohortGroup> {
    cohort.root.as_ref().ok_or_else(|| {
        CohortError::InvalidCohort(format!("cohort '{}' has no root group", cohort.name))
    })
}

fn check_node(group: &CohortGroup) -> CohortResult<()> {
    match group {
        CohortGroup::Leaf { query, .. } => {
            if query.is_none() {
                return Err(CohortError::InvalidCohort(
                    "leaf has no atomic query".into(),
                ));
            }
            Ok(())
        }
        CohortGroup::Group { operator, children } => {
            if children.is_empty() {
                return Err(CohortError::InvalidCohort(format!(
                    "{operator} group has no children"
                )));
            }
            if *operator == Operator::Not && children.len() != 1 {
                return Err(CohortError::InvalidCohort(format!(
                    "NOT group must have exactly one child, found {}",
                    children.len()
                )));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AtomicQuery, Parameters};
    use cohort_types::NonEmptyText;

    fn leaf() -> CohortGroup {
        CohortGroup::leaf(AtomicQuery::new(
            NonEmptyText::new("leaf").unwrap(),
            "SELECT e/ehr_id/value FROM EHR e",
        ))
    }

    fn cohort(root: Option<CohortGroup>) -> Cohort {
        Cohort {
            id: uuid::Uuid::new_v4(),
            name: NonEmptyText::new("test").unwrap(),
            description: None,
            owner: None,
            root,
        }
    }

    fn assert_invalid(result: CohortResult<()>, fragment: &str) {
        match result {
            Err(CohortError::InvalidCohort(msg)) => {
                assert!(msg.contains(fragment), "'{msg}' should contain '{fragment}'")
            }
            other => panic!("expected InvalidCohort, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_tree() {
        let root = CohortGroup::group(
            Operator::And,
            vec![leaf(), CohortGroup::group(Operator::Not, vec![leaf()])],
        );
        assert!(validate_cohort(&cohort(Some(root))).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_root() {
        assert_invalid(validate_cohort(&cohort(None)), "no root group");
    }

    #[test]
    fn test_validate_rejects_empty_group() {
        let root = CohortGroup::group(Operator::Or, vec![]);
        assert_invalid(validate_cohort(&cohort(Some(root))), "no children");
    }

    #[test]
    fn test_validate_rejects_binary_not() {
        let root = CohortGroup::group(Operator::Not, vec![leaf(), leaf()]);
        assert_invalid(validate_cohort(&cohort(Some(root))), "exactly one child");
    }

    #[test]
    fn test_validate_rejects_leaf_without_query() {
        let root = CohortGroup::group(
            Operator::And,
            vec![
                leaf(),
                CohortGroup::Leaf {
                    query: None,
                    parameters: Parameters::new(),
                },
            ],
        );
        assert_invalid(validate_cohort(&cohort(Some(root))), "no atomic query");
    }

    #[test]
    fn test_validate_rejects_too_many_children() {
        let children = (0..=MAX_GROUP_CHILDREN).map(|_| leaf()).collect();
        let root = CohortGroup::group(Operator::Or, children);
        assert_invalid(validate_cohort(&cohort(Some(root))), "maximum is");
    }

    #[test]
    fn test_validate_rejects_excessive_depth() {
        let mut root = leaf();
        for _ in 0..MAX_GROUP_DEPTH {
            root = CohortGroup::group(Operator::Not, vec![root]);
        }
        assert_invalid(validate_cohort(&cohort(Some(root))), "maximum depth");
    }

    #[test]
    fn test_validate_accepts_maximum_depth() {
        let mut root = leaf();
        for _ in 1..MAX_GROUP_DEPTH {
            root = CohortGroup::group(Operator::Not, vec![root]);
        }
        assert!(validate_cohort(&cohort(Some(root))).is_ok());
    }

    #[test]
    fn test_structure_check_ignores_size_caps() {
        let wide = CohortGroup::group(
            Operator::Or,
            (0..=MAX_GROUP_CHILDREN).map(|_| leaf()).collect(),
        );
        assert!(check_structure(&cohort(Some(wide))).is_ok());

        let mut deep = leaf();
        for _ in 0..MAX_GROUP_DEPTH * 4 {
            deep = CohortGroup::group(Operator::Not, vec![deep]);
        }
        assert!(check_structure(&cohort(Some(deep))).is_ok());
    }

    #[test]
    fn test_structure_check_rejects_unevaluable_trees() {
        assert_invalid(check_structure(&cohort(None)), "no root group");
        assert_invalid(
            check_structure(&cohort(Some(CohortGroup::group(Operator::And, vec![])))),
            "no children",
        );
        assert_invalid(
            check_structure(&cohort(Some(CohortGroup::group(
                Operator::Not,
                vec![leaf(), leaf()],
            )))),
            "exactly one child",
        );
        assert_invalid(
            check_structure(&cohort(Some(CohortGroup::Leaf {
                query: None,
                parameters: Parameters::new(),
            }))),
            "no atomic query",
        );
    }
}
