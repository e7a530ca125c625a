//! Cohort service facade.
//!
//! Bundles configuration, the evaluator and the privacy reporter behind the operations
//! callers use: evaluate a cohort, report its size, break it down by template, and inspect
//! the queries it would run.

use crate::config::CoreConfig;
use crate::constants::{TEMPLATE_ID_PARAMETER, TEMPLATE_MEMBERS_QUERY};
use crate::error::{CohortError, CohortResult};
use crate::evaluator::CohortEvaluator;
use crate::executor::AtomicQueryExecutor;
use crate::model::{AtomicQuery, Cohort, Parameters};
use crate::policy::Policy;
use crate::privacy::{Distribution, PrivacyReporter, SizeOutcome};
use crate::store::RecordStore;
use crate::validation::check_structure;
use aql::ParameterValue;
use chrono::{DateTime, Utc};
use cohort_types::{EhrId, NonEmptyText};
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Raw text of every leaf query, depth first. Borrows the cohort and never touches a store.
pub fn list_leaf_queries(cohort: &Cohort) -> impl Iterator<Item = &str> + '_ {
    cohort.leaf_queries().map(|query| query.query.as_str())
}

/// Disclosed size of a cohort at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeReport {
    pub cohort_id: Uuid,
    pub cohort_name: String,
    pub min_hits: usize,
    pub size: SizeOutcome,
    pub evaluated_at: DateTime<Utc>,
}

/// The text a leaf would send to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExplainedLeaf {
    pub name: String,
    /// `None` for a leaf without query text, which never reaches the store.
    pub query: Option<String>,
}

pub struct CohortService {
    cfg: Arc<CoreConfig>,
    evaluator: CohortEvaluator,
    reporter: PrivacyReporter,
}

impl CohortService {
    pub fn new(cfg: Arc<CoreConfig>, store: Arc<dyn RecordStore>) -> Self {
        let executor = AtomicQueryExecutor::new(store, &cfg);
        let reporter = PrivacyReporter::new(Arc::new(cfg.rounding()));
        Self {
            cfg,
            evaluator: CohortEvaluator::new(executor),
            reporter,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    /// Evaluates `cohort` into its matching record ids.
    ///
    /// # Errors
    ///
    /// See [`CohortEvaluator::evaluate`].
    pub async fn evaluate(
        &self,
        cohort: Option<&Cohort>,
        consent_override: bool,
    ) -> CohortResult<BTreeSet<EhrId>> {
        self.evaluator.evaluate(cohort, consent_override).await
    }

    /// Evaluates `cohort` and reports its size, withheld below `min_hits`.
    ///
    /// # Errors
    ///
    /// Returns `CohortError::InvalidInput` if `min_hits` is zero, or any evaluation error.
    pub async fn report_size(
        &self,
        cohort: Option<&Cohort>,
        consent_override: bool,
        min_hits: usize,
    ) -> CohortResult<SizeOutcome> {
        if min_hits == 0 {
            return Err(CohortError::InvalidInput(
                "min_hits must be at least 1".into(),
            ));
        }
        let ids = self.evaluate(cohort, consent_override).await?;
        Ok(self.reporter.report(&ids, min_hits))
    }

    /// [`Self::report_size`] stamped with the cohort and evaluation time.
    pub async fn size_report(
        &self,
        cohort: &Cohort,
        consent_override: bool,
        min_hits: usize,
    ) -> CohortResult<SizeReport> {
        let size = self
            .report_size(Some(cohort), consent_override, min_hits)
            .await?;
        Ok(SizeReport {
            cohort_id: cohort.id,
            cohort_name: cohort.name.to_string(),
            min_hits,
            size,
            evaluated_at: Utc::now(),
        })
    }

    /// Final query text for every leaf, depth first, without executing anything.
    ///
    /// # Errors
    ///
    /// Returns `CohortError::InvalidCohort` for an invalid tree, or the first rewrite error.
    pub fn explain(
        &self,
        cohort: &Cohort,
        consent_override: bool,
    ) -> CohortResult<Vec<ExplainedLeaf>> {
        check_structure(cohort)?;
        let executor = self.evaluator.executor();
        let chain = executor.policies(consent_override);
        cohort
            .leaves()
            .map(|(query, parameters)| {
                Ok(ExplainedLeaf {
                    name: query.name.to_string(),
                    query: executor.rewrite(query, parameters, &chain)?,
                })
            })
            .collect()
    }

    /// Breaks the cohort down by template: for each template id, how many cohort members
    /// hold at least one composition of it.
    ///
    /// Part counts are rounded. If the cohort is smaller than the configured threshold the
    /// whole breakdown is withheld and no per-template query is run.
    ///
    /// # Errors
    ///
    /// Any evaluation or execution error.
    pub async fn size_per_template(
        &self,
        cohort: Option<&Cohort>,
        templates: &[NonEmptyText],
        consent_override: bool,
    ) -> CohortResult<Distribution> {
        let min_hits = self.cfg.min_hits();
        let ids = self.evaluate(cohort, consent_override).await?;
        if ids.len() < min_hits {
            tracing::debug!(
                size = ids.len(),
                min_hits,
                "cohort below threshold; withholding template sizes"
            );
            return Ok(self.reporter.report_distribution(
                ids.len(),
                templates.iter().map(|t| (t.to_string(), 0)),
                min_hits,
            ));
        }

        let executor = self.evaluator.executor();
        let chain = executor
            .policies(consent_override)
            .with(Policy::Ehrs(ids.clone()));
        let members_query = AtomicQuery::new(
            NonEmptyText::new("template members").map_err(|e| {
                CohortError::InvalidInput(format!("template query name: {e}"))
            })?,
            TEMPLATE_MEMBERS_QUERY,
        );

        let counts = try_join_all(templates.iter().map(|template| {
            let parameters = Parameters::from([(
                TEMPLATE_ID_PARAMETER.to_owned(),
                Some(ParameterValue::Text(template.to_string())),
            )]);
            let chain = &chain;
            let members_query = &members_query;
            async move {
                let members = executor
                    .execute_with(members_query, &parameters, chain)
                    .await?;
                Ok::<_, CohortError>((template.to_string(), members.len()))
            }
        }))
        .await?;

        Ok(self
            .reporter
            .report_distribution(ids.len(), counts, min_hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CohortGroup, Operator};
    use crate::privacy::RoundingMode;
    use crate::store::{StaticRecordStore, StoreError};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    const A: &str = "SELECT e/ehr_id/value FROM EHR e WHERE e/a = 1";
    const B: &str = "SELECT e/ehr_id/value FROM EHR e WHERE e/b = 1";

    fn id(n: u128) -> EhrId {
        EhrId::from(Uuid::from_u128(n))
    }

    fn range(from: u128, to: u128) -> BTreeSet<EhrId> {
        (from..to).map(id).collect()
    }

    fn cfg(min_hits: usize) -> Arc<CoreConfig> {
        Arc::new(
            CoreConfig::new(
                None,
                BTreeSet::new(),
                min_hits,
                10,
                RoundingMode::Nearest,
                Duration::from_secs(1),
            )
            .unwrap(),
        )
    }

    fn leaf(name: &str, text: &str) -> CohortGroup {
        CohortGroup::leaf(AtomicQuery::new(NonEmptyText::new(name).unwrap(), text))
    }

    fn cohort(root: CohortGroup) -> Cohort {
        Cohort::new(NonEmptyText::new("test").unwrap(), root)
    }

    fn service(min_hits: usize) -> CohortService {
        let store = StaticRecordStore::new(range(0, 200))
            .with_answer(A, range(0, 12))
            .with_answer(B, range(0, 120));
        CohortService::new(cfg(min_hits), Arc::new(store))
    }

    #[tokio::test]
    async fn test_report_size_withholds_small_cohorts() {
        let service = service(50);
        let small = service
            .report_size(Some(&cohort(leaf("a", A))), true, 50)
            .await
            .unwrap();
        assert_eq!(small, SizeOutcome::Withheld);

        let large = service
            .report_size(Some(&cohort(leaf("b", B))), true, 50)
            .await
            .unwrap();
        assert_eq!(large, SizeOutcome::Exact(120));
    }

    #[tokio::test]
    async fn test_report_size_rejects_zero_threshold() {
        let err = service(50)
            .report_size(Some(&cohort(leaf("b", B))), true, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, CohortError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_size_report_carries_cohort_identity() {
        let definition = cohort(leaf("b", B));
        let report = service(50).size_report(&definition, true, 50).await.unwrap();
        assert_eq!(report.cohort_id, definition.id);
        assert_eq!(report.cohort_name, "test");
        assert_eq!(report.size, SizeOutcome::Exact(120));
    }

    #[test]
    fn test_list_leaf_queries_is_restartable() {
        let definition = cohort(CohortGroup::group(
            Operator::And,
            vec![leaf("a", A), CohortGroup::group(Operator::Not, vec![leaf("b", B)])],
        ));
        let first: Vec<_> = list_leaf_queries(&definition).collect();
        let second: Vec<_> = list_leaf_queries(&definition).collect();
        assert_eq!(first, vec![A, B]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_explain_shows_rewritten_text() {
        let definition = cohort(CohortGroup::group(
            Operator::Or,
            vec![leaf("a", A), leaf("blank", "")],
        ));
        let explained = service(50).explain(&definition, true).unwrap();
        assert_eq!(
            explained,
            vec![
                ExplainedLeaf {
                    name: "a".into(),
                    query: Some(A.into()),
                },
                ExplainedLeaf {
                    name: "blank".into(),
                    query: None,
                },
            ]
        );
    }

    #[test]
    fn test_explain_rejects_invalid_cohort() {
        let definition = cohort(CohortGroup::group(Operator::And, vec![]));
        assert!(matches!(
            service(50).explain(&definition, true),
            Err(CohortError::InvalidCohort(_))
        ));
    }

    /// Answers cohort leaves from a fixture and template queries by template id.
    struct TemplateStore {
        members: BTreeSet<EhrId>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RecordStore for TemplateStore {
        async fn run_query(&self, query: &str) -> Result<BTreeSet<EhrId>, StoreError> {
            self.seen.lock().unwrap().push(query.to_owned());
            if query.contains("'Vital signs'") {
                Ok(self.members.iter().take(87).copied().collect())
            } else if query.contains("'Lab results'") {
                Ok(self.members.iter().take(36).copied().collect())
            } else {
                Ok(self.members.clone())
            }
        }

        async fn universe(&self) -> Result<BTreeSet<EhrId>, StoreError> {
            Ok(self.members.clone())
        }
    }

    fn templates() -> Vec<NonEmptyText> {
        vec![
            NonEmptyText::new("Vital signs").unwrap(),
            NonEmptyText::new("Lab results").unwrap(),
        ]
    }

    #[tokio::test]
    async fn test_size_per_template_rounds_parts_and_scopes_to_cohort() {
        let store = Arc::new(TemplateStore {
            members: range(0, 123),
            seen: Mutex::new(Vec::new()),
        });
        let service = CohortService::new(cfg(50), store.clone());
        let distribution = service
            .size_per_template(Some(&cohort(leaf("a", A))), &templates(), true)
            .await
            .unwrap();

        assert_eq!(distribution.total, SizeOutcome::Exact(123));
        assert_eq!(distribution.parts["Vital signs"], SizeOutcome::Rounded(90));
        assert_eq!(distribution.parts["Lab results"], SizeOutcome::Rounded(40));

        let seen = store.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[1..]
            .iter()
            .all(|query| query.contains("e/ehr_id/value MATCHES {")));
    }

    #[tokio::test]
    async fn test_size_per_template_withholds_small_cohorts_without_querying() {
        let store = Arc::new(TemplateStore {
            members: range(0, 10),
            seen: Mutex::new(Vec::new()),
        });
        let service = CohortService::new(cfg(50), store.clone());
        let distribution = service
            .size_per_template(Some(&cohort(leaf("a", A))), &templates(), true)
            .await
            .unwrap();

        assert_eq!(distribution.total, SizeOutcome::Withheld);
        assert_eq!(distribution.parts.len(), 2);
        assert_eq!(store.seen.lock().unwrap().len(), 1);
    }
}
