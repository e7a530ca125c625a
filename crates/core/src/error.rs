use crate::policy::PolicyError;
use crate::store::StoreError;
use std::time::Duration;

/// Failures of cohort evaluation and reporting.
///
/// The engine never recovers locally: the first error met while walking a cohort tree
/// aborts the whole evaluation and is returned as-is.
#[derive(Debug, thiserror::Error)]
pub enum CohortError {
    /// The cohort definition itself is unusable (authoring or configuration error).
    #[error("invalid cohort: {0}")]
    InvalidCohort(String),

    /// A set operation was attempted on data that makes it meaningless.
    #[error("invalid set operation: {0}")]
    InvalidSetOperation(String),

    #[error("policy rejected query: {0}")]
    Policy(#[from] PolicyError),

    #[error("malformed atomic query '{name}': {source}")]
    Query {
        name: String,
        #[source]
        source: aql::AqlError,
    },

    #[error("record store failure: {0}")]
    Store(#[from] StoreError),

    #[error("record store did not answer within {timeout:?}")]
    StoreTimeout { timeout: Duration },

    #[error("failed to read {path}: {source}")]
    FileRead {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to parse {document} at '{path}': {source}")]
    Yaml {
        document: &'static str,
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

pub type CohortResult<T> = std::result::Result<T, CohortError>;
