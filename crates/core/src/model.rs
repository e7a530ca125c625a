//! Cohort definition model.
//!
//! A [`Cohort`] owns one root [`CohortGroup`]; groups form a parent-free tree held by value,
//! so a cohort is a plain snapshot that evaluation can borrow for as long as it runs.
//!
//! Cohorts are authored as YAML:
//!
//! ```yaml
//! name: Diabetics without insulin
//! root:
//!   type: GROUP
//!   operator: AND
//!   children:
//!     - type: LEAF
//!       query:
//!         name: Diabetes diagnosis
//!         query: SELECT e/ehr_id/value FROM EHR e CONTAINS ...
//!       parameters:
//!         code: E11
//!     - type: GROUP
//!       operator: NOT
//!       children:
//!         - type: LEAF
//!           query: { name: Insulin, query: "SELECT ..." }
//! ```

use crate::error::{CohortError, CohortResult};
use aql::ParameterValue;
use cohort_types::NonEmptyText;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Runtime parameter values of a leaf. `None` means "not bound": the parameter's predicates
/// are stripped from the query before execution.
pub type Parameters = BTreeMap<String, Option<ParameterValue>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    And,
    Or,
    Not,
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Not => "NOT",
        })
    }
}

/// A named, parameterised query. Never rewritten in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicQuery {
    pub name: NonEmptyText,
    #[serde(default)]
    pub query: String,
}

impl AtomicQuery {
    pub fn new(name: NonEmptyText, query: impl Into<String>) -> Self {
        Self {
            name,
            query: query.into(),
        }
    }

    /// True when there is no query text to run.
    pub fn is_blank(&self) -> bool {
        self.query.trim().is_empty()
    }
}

/// A node of the cohort tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum CohortGroup {
    Group {
        operator: Operator,
        #[serde(default)]
        children: Vec<CohortGroup>,
    },
    Leaf {
        #[serde(default)]
        query: Option<AtomicQuery>,
        #[serde(default)]
        parameters: Parameters,
    },
}

impl CohortGroup {
    pub fn group(operator: Operator, children: Vec<CohortGroup>) -> Self {
        CohortGroup::Group { operator, children }
    }

    pub fn leaf(query: AtomicQuery) -> Self {
        CohortGroup::Leaf {
            query: Some(query),
            parameters: Parameters::new(),
        }
    }

    pub fn leaf_with_parameters(query: AtomicQuery, parameters: Parameters) -> Self {
        CohortGroup::Leaf {
            query: Some(query),
            parameters,
        }
    }

    /// Depth-first, left-to-right iterator over the leaves of this subtree that carry a query,
    /// with their parameters.
    pub fn leaves(&self) -> Leaves<'_> {
        Leaves { stack: vec![self] }
    }

    pub fn leaf_queries(&self) -> impl Iterator<Item = &AtomicQuery> + '_ {
        self.leaves().map(|(query, _)| query)
    }
}

/// A saved population definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: NonEmptyText,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub root: Option<CohortGroup>,
}

impl Cohort {
    pub fn new(name: NonEmptyText, root: CohortGroup) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            description: None,
            owner: None,
            root: Some(root),
        }
    }

    /// Strictly parse a cohort definition from YAML text.
    ///
    /// # Errors
    ///
    /// Returns `CohortError::Yaml` if the YAML does not match the cohort schema.
    pub fn from_yaml_str(yaml_text: &str) -> CohortResult<Self> {
        from_yaml(yaml_text, "cohort definition")
    }

    /// Depth-first iterator over the leaves of the whole cohort. Restartable: each call starts
    /// a fresh traversal.
    pub fn leaves(&self) -> Leaves<'_> {
        Leaves {
            stack: self.root.iter().collect(),
        }
    }

    pub fn leaf_queries(&self) -> impl Iterator<Item = &AtomicQuery> + '_ {
        self.leaves().map(|(query, _)| query)
    }
}

/// Deserialises YAML, reporting the failing field path.
///
/// Uses `serde_path_to_error` so a malformed document names the field that did not match
/// (for example `root.children[1].operator`).
pub(crate) fn from_yaml<T: DeserializeOwned>(
    yaml_text: &str,
    document: &'static str,
) -> CohortResult<T> {
    let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
    serde_path_to_error::deserialize(deserializer).map_err(|err| {
        let path = err.path().to_string();
        let path = if path.is_empty() || path == "." {
            "<root>".to_owned()
        } else {
            path
        };
        CohortError::Yaml {
            document,
            path,
            source: err.into_inner(),
        }
    })
}

/// Iterator returned by [`Cohort::leaves`]. Leaves without a query are skipped.
#[derive(Debug, Clone)]
pub struct Leaves<'a> {
    stack: Vec<&'a CohortGroup>,
}

impl<'a> Iterator for Leaves<'a> {
    type Item = (&'a AtomicQuery, &'a Parameters);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            match node {
                CohortGroup::Group { children, .. } => {
                    self.stack.extend(children.iter().rev());
                }
                CohortGroup::Leaf { query, parameters } => {
                    if let Some(query) = query {
                        return Some((query, parameters));
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION: &str = r#"
id: 6f1c2b1e-2c59-4a51-9a0e-0a7ad1f0c001
name: Diabetics without insulin
root:
  type: GROUP
  operator: AND
  children:
    - type: LEAF
      query:
        name: Diabetes
        query: SELECT e/ehr_id/value FROM EHR e WHERE e/code = $code
      parameters:
        code: E11
        since: null
    - type: GROUP
      operator: NOT
      children:
        - type: LEAF
          query:
            name: Insulin
            query: SELECT e/ehr_id/value FROM EHR e WHERE e/drug = 'insulin'
"#;

    #[test]
    fn test_from_yaml_str_parses_tree() {
        let cohort = Cohort::from_yaml_str(DEFINITION).unwrap();
        assert_eq!(cohort.name.as_str(), "Diabetics without insulin");

        let Some(CohortGroup::Group { operator, children }) = &cohort.root else {
            panic!("expected a root group");
        };
        assert_eq!(*operator, Operator::And);
        assert_eq!(children.len(), 2);

        let CohortGroup::Leaf { parameters, .. } = &children[0] else {
            panic!("expected a leaf");
        };
        assert_eq!(
            parameters.get("code"),
            Some(&Some(ParameterValue::Text("E11".into())))
        );
        assert_eq!(parameters.get("since"), Some(&None));
    }

    #[test]
    fn test_from_yaml_str_reports_failing_path() {
        let yaml = "name: Broken\nroot:\n  type: GROUP\n  operator: XOR\n  children: []\n";
        let err = Cohort::from_yaml_str(yaml).expect_err("should reject operator");
        assert!(matches!(err, CohortError::Yaml { .. }));
    }

    #[test]
    fn test_from_yaml_str_rejects_blank_name() {
        let err = Cohort::from_yaml_str("name: '  '\n").expect_err("should reject name");
        match err {
            CohortError::Yaml { path, .. } => assert_eq!(path, "name"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_root_deserialises_as_none() {
        let cohort = Cohort::from_yaml_str("name: Empty\n").unwrap();
        assert!(cohort.root.is_none());
        assert_eq!(cohort.leaf_queries().count(), 0);
    }

    #[test]
    fn test_leaf_queries_are_depth_first_and_restartable() {
        let cohort = Cohort::from_yaml_str(DEFINITION).unwrap();
        let names: Vec<_> = cohort.leaf_queries().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["Diabetes", "Insulin"]);
        assert_eq!(cohort.leaf_queries().count(), 2);
    }

    #[test]
    fn test_leaves_carry_parameters() {
        let cohort = Cohort::from_yaml_str(DEFINITION).unwrap();
        let (query, parameters) = cohort.leaves().next().unwrap();
        assert_eq!(query.name.as_str(), "Diabetes");
        assert_eq!(parameters.len(), 2);
    }

    #[test]
    fn test_leaf_queries_skip_leaves_without_query() {
        let root = CohortGroup::group(
            Operator::Or,
            vec![
                CohortGroup::Leaf {
                    query: None,
                    parameters: Parameters::new(),
                },
                CohortGroup::leaf(AtomicQuery::new(
                    NonEmptyText::new("q").unwrap(),
                    "SELECT e/ehr_id/value FROM EHR e",
                )),
            ],
        );
        assert_eq!(root.leaf_queries().count(), 1);
    }
}
