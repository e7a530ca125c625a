//! Record store seam.
//!
//! The engine only needs two things from the clinical data repository: the id set produced
//! by a rendered query and the set of every record it holds. [`RecordStore`] is the trait the
//! evaluator is written against; [`StaticRecordStore`] is a fixture-backed implementation used
//! by the command line tool and by tests.

use crate::error::{CohortError, CohortResult};
use crate::model::from_yaml;
use async_trait::async_trait;
use cohort_types::EhrId;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Failures reported by a record store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    #[error("record store rejected query: {0}")]
    MalformedQuery(String),
}

/// Executes rendered query text against the clinical data repository.
///
/// Implementations must be safe to call concurrently; the evaluator issues sibling queries
/// at the same time.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Runs `query` and returns the ids of the matching records.
    async fn run_query(&self, query: &str) -> Result<BTreeSet<EhrId>, StoreError>;

    /// Every record id in the store.
    async fn universe(&self) -> Result<BTreeSet<EhrId>, StoreError>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoreFixture {
    #[serde(default)]
    universe: BTreeSet<EhrId>,
    #[serde(default)]
    queries: Vec<FixtureQuery>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FixtureQuery {
    query: String,
    #[serde(default)]
    ehr_ids: BTreeSet<EhrId>,
}

/// A record store answering from a fixed table of query text to id sets.
///
/// Query text is matched after normalisation, so spacing differences between a fixture and
/// the text the engine renders do not matter. Text with no entry is rejected as malformed.
///
/// Fixture format:
///
/// ```yaml
/// universe:
///   - 550e8400-e29b-41d4-a716-446655440000
/// queries:
///   - query: SELECT e/ehr_id/value FROM EHR e WHERE ...
///     ehr_ids:
///       - 550e8400-e29b-41d4-a716-446655440000
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticRecordStore {
    universe: BTreeSet<EhrId>,
    answers: BTreeMap<String, BTreeSet<EhrId>>,
}

impl StaticRecordStore {
    pub fn new(universe: impl IntoIterator<Item = EhrId>) -> Self {
        Self {
            universe: universe.into_iter().collect(),
            answers: BTreeMap::new(),
        }
    }

    /// Registers the answer for `query`, replacing any earlier one.
    pub fn with_answer(mut self, query: &str, ids: impl IntoIterator<Item = EhrId>) -> Self {
        self.answers
            .insert(normalise(query), ids.into_iter().collect());
        self
    }

    /// Builds a store from a YAML fixture.
    ///
    /// # Errors
    ///
    /// Returns `CohortError::Yaml` if the fixture is malformed.
    pub fn from_yaml_str(yaml_text: &str) -> CohortResult<Self> {
        let fixture: StoreFixture = from_yaml(yaml_text, "record store fixture")?;
        let store = fixture
            .queries
            .into_iter()
            .fold(Self::new(fixture.universe), |store, entry| {
                store.with_answer(&entry.query, entry.ehr_ids)
            });
        tracing::debug!(
            universe = store.universe.len(),
            queries = store.answers.len(),
            "loaded record store fixture"
        );
        Ok(store)
    }

    /// Reads and parses a YAML fixture file.
    ///
    /// # Errors
    ///
    /// Returns `CohortError::FileRead` if the file cannot be read, or `CohortError::Yaml` if it
    /// is malformed.
    pub fn from_path(path: &Path) -> CohortResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CohortError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }
}

#[async_trait]
impl RecordStore for StaticRecordStore {
    async fn run_query(&self, query: &str) -> Result<BTreeSet<EhrId>, StoreError> {
        self.answers
            .get(&normalise(query))
            .cloned()
            .ok_or_else(|| StoreError::MalformedQuery(format!("no fixture answer for: {query}")))
    }

    async fn universe(&self) -> Result<BTreeSet<EhrId>, StoreError> {
        Ok(self.universe.clone())
    }
}

/// Canonical spelling of query text: rendered tokens when the text tokenizes, otherwise
/// whitespace collapsed to single spaces.
fn normalise(query: &str) -> String {
    match aql::lexer::tokenize(query) {
        Ok(tokens) => aql::lexer::render(&tokens),
        Err(_) => query.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}
