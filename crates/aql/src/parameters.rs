//! Runtime parameter values and their literal rendering.

use crate::{AqlError, AqlResult};
use serde::{Deserialize, Serialize};

/// A value bound to a `$name` parameter.
///
/// Deserialised untagged, so YAML `true`, `42`, `1.5`, `'text'` and `[a, b]` map onto the
/// matching variant. An absent value (YAML `null`) is modelled by the caller as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    List(Vec<ParameterValue>),
}

impl ParameterValue {
    /// Renders the value as a query-language literal.
    ///
    /// Lists become set literals (`{'a', 'b'}`) for use with `MATCHES`. Lists may not nest.
    ///
    /// # Errors
    ///
    /// Returns [`AqlError::InvalidParameterValue`] for non-finite reals or nested lists.
    pub fn to_literal(&self, name: &str) -> AqlResult<String> {
        match self {
            ParameterValue::Boolean(b) => Ok(b.to_string()),
            ParameterValue::Integer(i) => Ok(i.to_string()),
            ParameterValue::Real(r) => {
                if !r.is_finite() {
                    return Err(AqlError::InvalidParameterValue {
                        name: name.to_owned(),
                        reason: format!("{r} is not a finite number"),
                    });
                }
                Ok(format!("{r:?}"))
            }
            ParameterValue::Text(s) => Ok(quote_text(s)),
            ParameterValue::List(items) => {
                let mut rendered = Vec::with_capacity(items.len());
                for item in items {
                    if matches!(item, ParameterValue::List(_)) {
                        return Err(AqlError::InvalidParameterValue {
                            name: name.to_owned(),
                            reason: "lists cannot be nested".into(),
                        });
                    }
                    rendered.push(item.to_literal(name)?);
                }
                Ok(format!("{{{}}}", rendered.join(", ")))
            }
        }
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::Text(value.to_owned())
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Integer(value)
    }
}

/// Quotes text as a single-quoted literal, escaping backslashes and quotes.
pub fn quote_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        if c == '\\' || c == '\'' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}
