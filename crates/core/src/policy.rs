//! Query restriction policies.
//!
//! Each [`Policy`] is a pure rewrite of a parsed [`AqlQuery`] that can only add conjunctive
//! restrictions, so the outcome of a chain does not depend on policy order beyond which
//! rejection is reported first. A [`PolicyChain`] folds a query through its policies and
//! stops at the first rejection.

use crate::constants::{CONSENT_CODE_PATH, EHR_ID_PATH, TEMPLATE_ID_PATH};
use aql::{AqlQuery, Condition};
use cohort_types::{EhrId, NonEmptyText};
use std::collections::BTreeSet;

/// Reasons a policy refuses to rewrite a query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// Consent enforcement was requested but there is no code to enforce.
    #[error("consent enforcement requested but no consent code is configured")]
    ConsentCodeNotConfigured,

    /// An ehr restriction with no ids. "Match nothing" is never a valid restriction.
    #[error("ehr restriction requires at least one record id")]
    EmptyEhrRestriction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Policy {
    /// Every composition must use one of these templates. An empty set restricts nothing.
    Templates(BTreeSet<NonEmptyText>),
    /// Only these records may match.
    Ehrs(BTreeSet<EhrId>),
    /// Only records that granted this consent code may match.
    Consent(Option<NonEmptyText>),
}

impl Policy {
    /// Rewrites `query`, returning the restricted copy.
    ///
    /// # Errors
    ///
    /// - `PolicyError::EmptyEhrRestriction` for an `Ehrs` policy with no ids.
    /// - `PolicyError::ConsentCodeNotConfigured` for a `Consent` policy without a code.
    pub fn apply(&self, mut query: AqlQuery) -> Result<AqlQuery, PolicyError> {
        match self {
            Policy::Templates(templates) => {
                if templates.is_empty() {
                    return Ok(query);
                }
                for alias in query.ensure_composition_aliases() {
                    query.and_where(Condition::matches(
                        &format!("{alias}/{TEMPLATE_ID_PATH}"),
                        templates.iter().map(NonEmptyText::as_str),
                    ));
                }
                Ok(query)
            }
            Policy::Ehrs(ids) => {
                if ids.is_empty() {
                    return Err(PolicyError::EmptyEhrRestriction);
                }
                let alias = query.ensure_ehr_alias();
                query.and_where(Condition::matches(
                    &format!("{alias}/{EHR_ID_PATH}"),
                    ids.iter().map(EhrId::to_string),
                ));
                Ok(query)
            }
            Policy::Consent(code) => {
                let code = code
                    .as_ref()
                    .ok_or(PolicyError::ConsentCodeNotConfigured)?;
                let alias = query.ensure_ehr_alias();
                query.and_where(Condition::equals(
                    &format!("{alias}/{CONSENT_CODE_PATH}"),
                    code.as_str(),
                ));
                Ok(query)
            }
        }
    }
}

/// An ordered, reusable list of policies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyChain {
    policies: Vec<Policy>,
}

impl PolicyChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    pub fn apply(&self, query: AqlQuery) -> Result<AqlQuery, PolicyError> {
        self.policies
            .iter()
            .try_fold(query, |query, policy| policy.apply(query))
    }
}
