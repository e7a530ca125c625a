//! Validated value types shared across the cohort workspace.
//!
//! - [`NonEmptyText`] for names, template ids and consent codes.
//! - [`EhrId`] for subject record identifiers returned by the record store.

use std::fmt;
use std::str::FromStr;

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
}

/// Errors that can occur when parsing an EHR identifier.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("invalid EHR id '{input}': {source}")]
    Invalid {
        input: String,
        #[source]
        source: uuid::Error,
    },
}

/// A trimmed string with at least one non-whitespace character.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText`, trimming leading and trailing whitespace.
    ///
    /// # Errors
    ///
    /// Returns `TextError::Empty` if nothing remains after trimming.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for NonEmptyText {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifier of one subject's electronic health record.
///
/// openEHR record stores expose `ehr_id/value` as a UUID. Any textual UUID form is accepted
/// on input; the value is always displayed in hyphenated lowercase form so that sets of ids
/// compare and render consistently regardless of how the store spelled them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EhrId(uuid::Uuid);

impl EhrId {
    /// Generates a fresh random id. Mostly useful for fixtures.
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parses an id from any textual UUID representation.
    ///
    /// # Errors
    ///
    /// Returns `IdError::Invalid` if the input is not a UUID.
    pub fn parse(input: &str) -> Result<Self, IdError> {
        uuid::Uuid::parse_str(input.trim())
            .map(Self)
            .map_err(|source| IdError::Invalid {
                input: input.to_owned(),
                source,
            })
    }

    pub fn uuid(&self) -> uuid::Uuid {
        self.0
    }
}

impl From<uuid::Uuid> for EhrId {
    fn from(value: uuid::Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for EhrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for EhrId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for EhrId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for EhrId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        EhrId::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty_text_trims_input() {
        let text = NonEmptyText::new("  diabetes cohort  ").unwrap();
        assert_eq!(text.as_str(), "diabetes cohort");
    }

    #[test]
    fn test_non_empty_text_rejects_whitespace() {
        assert!(matches!(NonEmptyText::new(" \t "), Err(TextError::Empty)));
    }

    #[test]
    fn test_non_empty_text_deserialize_rejects_empty() {
        let result: Result<NonEmptyText, _> = serde_yaml::from_str("''");
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_trims_text_and_normalises_ids() {
        let text: NonEmptyText = serde_yaml::from_str("'  asthma  '").unwrap();
        assert_eq!(text.as_str(), "asthma");
        let id: EhrId = serde_yaml::from_str("550E8400E29B41D4A716446655440000").unwrap();
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn test_ehr_id_normalises_display() {
        let id = EhrId::parse("550E8400E29B41D4A716446655440000").unwrap();
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn test_ehr_id_forms_compare_equal() {
        let a = EhrId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let b = EhrId::parse("550e8400e29b41d4a716446655440000").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_ehr_id_rejects_garbage() {
        let err = EhrId::parse("not-an-id").expect_err("should reject");
        assert!(err.to_string().contains("not-an-id"));
    }

    #[test]
    fn test_ehr_id_yaml_round_trip_uses_hyphenated_form() {
        let id = EhrId::parse("550e8400e29b41d4a716446655440000").unwrap();
        let yaml = serde_yaml::to_string(&id).unwrap();
        assert!(yaml.contains("550e8400-e29b-41d4-a716-446655440000"));
    }
}
