//! Archetype Query Language boundary support.
//!
//! This crate understands just enough of query text to rewrite it safely:
//! - tokenizing and rendering ([`lexer`])
//! - splitting `SELECT`/`FROM`/`WHERE`/trailing clauses ([`AqlQuery`])
//! - a WHERE condition tree that predicates can be removed from or conjoined to ([`Condition`])
//! - parameter values and their literal syntax ([`ParameterValue`])
//!
//! Cohort semantics (which restrictions apply, and when) live in `cohort-core`.

pub mod condition;
pub mod lexer;
pub mod parameters;
pub mod query;

pub use condition::Condition;
pub use parameters::{quote_text, ParameterValue};
pub use query::AqlQuery;

use thiserror::Error;

/// Errors returned by the `aql` boundary crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AqlError {
    #[error("lexical error at byte {position}: {message}")]
    Lex { position: usize, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("parameter ${0} has no value")]
    UnboundParameter(String),

    #[error("parameter ${0} is used outside the WHERE clause and cannot be removed")]
    ParameterOutsideWhere(String),

    #[error("invalid value for parameter ${name}: {reason}")]
    InvalidParameterValue { name: String, reason: String },
}

pub type AqlResult<T> = std::result::Result<T, AqlError>;
