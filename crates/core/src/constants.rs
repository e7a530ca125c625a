//! Constants used throughout the cohort core crate.
//!
//! Paths are relative to a containment variable and are prefixed with the variable name
//! (for example `e/ehr_id/value`) when a restriction predicate is built.

/// Path of the record identifier relative to an `EHR` variable.
pub const EHR_ID_PATH: &str = "ehr_id/value";

/// Path of the template id relative to a `COMPOSITION` variable.
pub const TEMPLATE_ID_PATH: &str = "archetype_details/template_id/value";

/// Path of the granted consent code relative to an `EHR` variable.
pub const CONSENT_CODE_PATH: &str =
    "ehr_status/other_details/items[openEHR-EHR-CLUSTER.consent.v0]/items[at0001]/value/defining_code/code_string";

/// Parameter name used by the per-template size query.
pub const TEMPLATE_ID_PARAMETER: &str = "template_id";

/// Query used to count cohort members holding at least one composition of a template.
pub const TEMPLATE_MEMBERS_QUERY: &str = "SELECT e/ehr_id/value FROM EHR e CONTAINS COMPOSITION c WHERE c/archetype_details/template_id/value = $template_id";

/// Default minimum population size that may be disclosed.
pub const DEFAULT_MIN_HITS: usize = 50;

/// Default rounding bucket for distribution counts.
pub const DEFAULT_ROUNDING_BUCKET: usize = 10;

/// Default timeout for a single record-store call, in milliseconds.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 30_000;

/// Deepest nesting of groups a cohort may have.
pub const MAX_GROUP_DEPTH: usize = 32;

/// Most children a single group may have.
pub const MAX_GROUP_CHILDREN: usize = 64;
