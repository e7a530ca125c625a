//! Atomic query execution.
//!
//! Turns one leaf into an id set: strip parameters that have no value, restrict the query
//! through the policy chain, bind the remaining parameters, and hand the final text to the
//! record store under a timeout.

use crate::config::CoreConfig;
use crate::error::{CohortError, CohortResult};
use crate::model::{AtomicQuery, Parameters};
use crate::policy::{Policy, PolicyChain};
use crate::store::{RecordStore, StoreError};
use aql::{AqlError, AqlQuery};
use cohort_types::{EhrId, NonEmptyText};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct AtomicQueryExecutor {
    store: Arc<dyn RecordStore>,
    templates: BTreeSet<NonEmptyText>,
    consent_code: Option<NonEmptyText>,
    timeout: Duration,
}

impl AtomicQueryExecutor {
    pub fn new(store: Arc<dyn RecordStore>, config: &CoreConfig) -> Self {
        Self {
            store,
            templates: config.templates().clone(),
            consent_code: config.consent_code().cloned(),
            timeout: config.store_timeout(),
        }
    }

    /// The policies every leaf goes through: template restriction, then consent unless
    /// `consent_override` is set.
    pub fn policies(&self, consent_override: bool) -> PolicyChain {
        let chain = PolicyChain::new().with(Policy::Templates(self.templates.clone()));
        if consent_override {
            chain
        } else {
            chain.with(Policy::Consent(self.consent_code.clone()))
        }
    }

    /// Final query text for a leaf, or `None` when the leaf has no query text.
    ///
    /// # Errors
    ///
    /// - `CohortError::Query` if the text does not parse, a parameter without a value is used
    ///   outside `WHERE`, or a referenced parameter is missing from `parameters`.
    /// - `CohortError::Policy` if a policy rejects the query.
    pub fn rewrite(
        &self,
        query: &AtomicQuery,
        parameters: &Parameters,
        chain: &PolicyChain,
    ) -> CohortResult<Option<String>> {
        if query.is_blank() {
            return Ok(None);
        }
        let query_error = |source: AqlError| CohortError::Query {
            name: query.name.to_string(),
            source,
        };

        let mut parsed = AqlQuery::parse(&query.query).map_err(query_error)?;

        let mut bound = BTreeMap::new();
        for (name, value) in parameters {
            match value {
                Some(value) => {
                    bound.insert(name.clone(), value.clone());
                }
                None => parsed.remove_parameter(name).map_err(query_error)?,
            }
        }

        let mut restricted = chain.apply(parsed)?;
        restricted.bind_parameters(&bound).map_err(query_error)?;
        Ok(Some(restricted.to_string()))
    }

    /// Runs a leaf with the standard policies.
    pub async fn execute(
        &self,
        query: &AtomicQuery,
        parameters: &Parameters,
        consent_override: bool,
    ) -> CohortResult<BTreeSet<EhrId>> {
        self.execute_with(query, parameters, &self.policies(consent_override))
            .await
    }

    /// Runs a leaf through an explicit policy chain.
    ///
    /// A leaf without query text contributes the empty set and never reaches the store.
    pub async fn execute_with(
        &self,
        query: &AtomicQuery,
        parameters: &Parameters,
        chain: &PolicyChain,
    ) -> CohortResult<BTreeSet<EhrId>> {
        let Some(text) = self.rewrite(query, parameters, chain)? else {
            tracing::warn!(leaf = %query.name, "leaf has no query text; contributing no records");
            return Ok(BTreeSet::new());
        };

        tracing::debug!(leaf = %query.name, query = %text, "executing atomic query");
        let ids = self.within_timeout(self.store.run_query(&text)).await?;
        tracing::debug!(leaf = %query.name, matched = ids.len(), "atomic query finished");
        Ok(ids)
    }

    /// Every record id in the store.
    pub async fn universe(&self) -> CohortResult<BTreeSet<EhrId>> {
        self.within_timeout(self.store.universe()).await
    }

    async fn within_timeout<T, F>(&self, call: F) -> CohortResult<T>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "record store call timed out");
                Err(CohortError::StoreTimeout {
                    timeout: self.timeout,
                })
            }
        }
    }
}
