//! Recursive cohort tree evaluation.

use crate::error::{CohortError, CohortResult};
use crate::executor::AtomicQueryExecutor;
use crate::model::{Cohort, CohortGroup, Operator};
use crate::set_algebra::combine;
use crate::validation::check_structure;
use cohort_types::EhrId;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use std::collections::BTreeSet;

/// Evaluates a cohort tree into the set of matching record ids.
///
/// Siblings are evaluated concurrently and combined once all of them have finished. The
/// first failure anywhere in the tree aborts the evaluation: outstanding sibling work is
/// dropped and no partial result is returned.
pub struct CohortEvaluator {
    executor: AtomicQueryExecutor,
}

impl CohortEvaluator {
    pub fn new(executor: AtomicQueryExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &AtomicQueryExecutor {
        &self.executor
    }

    /// # Errors
    ///
    /// - `CohortError::InvalidCohort` if `cohort` is `None` or fails [`check_structure`].
    ///   Nothing is sent to the store in that case. Tree width and depth are not capped here.
    /// - Any error raised while evaluating a leaf or combining a group.
    pub async fn evaluate(
        &self,
        cohort: Option<&Cohort>,
        consent_override: bool,
    ) -> CohortResult<BTreeSet<EhrId>> {
        let cohort =
            cohort.ok_or_else(|| CohortError::InvalidCohort("no cohort given".into()))?;
        check_structure(cohort)?;
        let root = cohort.root.as_ref().ok_or_else(|| {
            CohortError::InvalidCohort(format!("cohort '{}' has no root group", cohort.name))
        })?;

        tracing::debug!(cohort_id = %cohort.id, consent_override, "evaluating cohort");
        let ids = self.evaluate_group(root, consent_override).await?;
        tracing::info!(cohort_id = %cohort.id, size = ids.len(), "cohort evaluated");
        Ok(ids)
    }

    fn evaluate_group<'a>(
        &'a self,
        group: &'a CohortGroup,
        consent_override: bool,
    ) -> BoxFuture<'a, CohortResult<BTreeSet<EhrId>>> {
        async move {
            match group {
                CohortGroup::Leaf { query, parameters } => {
                    let query = query.as_ref().ok_or_else(|| {
                        CohortError::InvalidCohort("leaf has no atomic query".into())
                    })?;
                    self.executor
                        .execute(query, parameters, consent_override)
                        .await
                }
                CohortGroup::Group { operator, children } => {
                    let results = try_join_all(
                        children
                            .iter()
                            .map(|child| self.evaluate_group(child, consent_override)),
                    )
                    .await?;
                    let universe = match operator {
                        Operator::Not => Some(self.executor.universe().await?),
                        Operator::And | Operator::Or => None,
                    };
                    combine(*operator, results, universe.as_ref())
                }
            }
        }
        .boxed()
    }
}
