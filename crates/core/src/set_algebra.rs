//! Boolean combination of identifier sets.

use crate::error::{CohortError, CohortResult};
use crate::model::Operator;
use std::collections::BTreeSet;

/// Combines child results with `operator`.
///
/// - `AND`: intersection of all sets; no sets at all gives the empty set.
/// - `OR`: union of all sets.
/// - `NOT`: `universe \ operand` for exactly one operand.
///
/// # Errors
///
/// Returns `CohortError::InvalidSetOperation` for a `NOT` that does not have exactly one
/// operand, has no universe, an empty universe (the store is unreachable or uninitialised)
/// or an empty operand.
pub fn combine<T>(
    operator: Operator,
    sets: Vec<BTreeSet<T>>,
    universe: Option<&BTreeSet<T>>,
) -> CohortResult<BTreeSet<T>>
where
    T: Ord + Clone,
{
    match operator {
        Operator::And => Ok(intersect(sets)),
        Operator::Or => Ok(sets.into_iter().flatten().collect()),
        Operator::Not => {
            let [operand] = <[BTreeSet<T>; 1]>::try_from(sets).map_err(|sets| {
                CohortError::InvalidSetOperation(format!(
                    "NOT takes exactly one operand, got {}",
                    sets.len()
                ))
            })?;
            let universe = universe
                .filter(|u| !u.is_empty())
                .ok_or_else(|| {
                    CohortError::InvalidSetOperation("NOT requires a non-empty universe".into())
                })?;
            if operand.is_empty() {
                return Err(CohortError::InvalidSetOperation(
                    "NOT operand is empty".into(),
                ));
            }
            Ok(universe.difference(&operand).cloned().collect())
        }
    }
}

fn intersect<T: Ord>(mut sets: Vec<BTreeSet<T>>) -> BTreeSet<T> {
    let Some(smallest) = (0..sets.len()).min_by_key(|&i| sets[i].len()) else {
        return BTreeSet::new();
    };
    let mut result = sets.swap_remove(smallest);
    for other in &sets {
        result.retain(|id| other.contains(id));
    }
    result
}
