//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services, so
//! evaluation never reads process-wide environment variables.

use crate::constants::{DEFAULT_MIN_HITS, DEFAULT_STORE_TIMEOUT_MS};
use crate::error::{CohortError, CohortResult};
use crate::privacy::{BucketRounding, RoundingMode};
use cohort_types::NonEmptyText;
use std::collections::BTreeSet;
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    consent_code: Option<NonEmptyText>,
    templates: BTreeSet<NonEmptyText>,
    min_hits: usize,
    rounding: BucketRounding,
    store_timeout: Duration,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns `CohortError::InvalidInput` if `min_hits` or `rounding_bucket` is zero, or
    /// `store_timeout` is zero.
    pub fn new(
        consent_code: Option<NonEmptyText>,
        templates: BTreeSet<NonEmptyText>,
        min_hits: usize,
        rounding_bucket: usize,
        rounding_mode: RoundingMode,
        store_timeout: Duration,
    ) -> CohortResult<Self> {
        if min_hits == 0 {
            return Err(CohortError::InvalidInput(
                "min_hits must be at least 1".into(),
            ));
        }
        if store_timeout.is_zero() {
            return Err(CohortError::InvalidInput(
                "store timeout must be greater than zero".into(),
            ));
        }
        let rounding = BucketRounding::new(rounding_bucket, rounding_mode)?;

        Ok(Self {
            consent_code,
            templates,
            min_hits,
            rounding,
            store_timeout,
        })
    }

    /// Defaults for everything except the consent code.
    pub fn with_defaults(consent_code: Option<NonEmptyText>) -> Self {
        Self {
            consent_code,
            templates: BTreeSet::new(),
            min_hits: DEFAULT_MIN_HITS,
            rounding: BucketRounding::default(),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
        }
    }

    pub fn consent_code(&self) -> Option<&NonEmptyText> {
        self.consent_code.as_ref()
    }

    /// Allowed template ids. Empty means no template restriction.
    pub fn templates(&self) -> &BTreeSet<NonEmptyText> {
        &self.templates
    }

    pub fn min_hits(&self) -> usize {
        self.min_hits
    }

    pub fn rounding(&self) -> BucketRounding {
        self.rounding
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }
}
