//! # Cohort Core
//!
//! Cohort definition and execution engine.
//!
//! A cohort is a boolean tree of parameterised clinical-data queries. This crate:
//! - validates cohort trees and evaluates them into sets of record ids
//! - restricts every query through template, consent and record-scope policies
//! - combines child results with AND/OR/NOT set semantics
//! - withholds or rounds counts before they are disclosed
//!
//! **No storage concerns**: query execution is delegated to a [`RecordStore`] supplied by the
//! caller. The query language itself is handled by the `aql` crate.

pub mod config;
pub mod constants;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod model;
pub mod policy;
pub mod privacy;
pub mod service;
pub mod set_algebra;
pub mod store;
pub mod validation;

pub use config::CoreConfig;
pub use error::{CohortError, CohortResult};
pub use evaluator::CohortEvaluator;
pub use executor::AtomicQueryExecutor;
pub use model::{AtomicQuery, Cohort, CohortGroup, Operator, Parameters};
pub use policy::{Policy, PolicyChain, PolicyError};
pub use privacy::{
    BucketRounding, Distribution, PrivacyReporter, RoundingMode, RoundingStrategy, SizeOutcome,
};
pub use service::{list_leaf_queries, CohortService, ExplainedLeaf, SizeReport};
pub use set_algebra::combine;
pub use store::{RecordStore, StaticRecordStore, StoreError};
pub use validation::{check_structure, validate_cohort, validate_group};

pub use cohort_types::{EhrId, NonEmptyText};
