//! WHERE-clause condition tree.
//!
//! Precedence follows the usual boolean order: `NOT` binds tightest, then `AND`, then `OR`.
//! Anything between logical operators is kept as an opaque [`Condition::Predicate`] token
//! run, so comparison syntax never needs to be understood here.

use crate::lexer::{render, Token};
use crate::parameters::quote_text;
use crate::{AqlError, AqlResult};
use std::collections::BTreeSet;
use std::fmt;

/// Deepest run of `NOT`s and parentheses a WHERE clause may nest.
pub const MAX_NESTING: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Predicate(Vec<Token>),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// `path MATCHES {'v1', 'v2', ...}`
    pub fn matches<I, S>(path: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tokens = vec![
            Token::word(path),
            Token::word("MATCHES"),
            Token::Punct('{'),
        ];
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                tokens.push(Token::Punct(','));
            }
            tokens.push(Token::Literal(quote_text(value.as_ref())));
        }
        tokens.push(Token::Punct('}'));
        Condition::Predicate(tokens)
    }

    /// `path = 'value'`
    pub fn equals(path: &str, value: &str) -> Self {
        Condition::Predicate(vec![
            Token::word(path),
            Token::Operator("="),
            Token::Literal(quote_text(value)),
        ])
    }

    /// Conjoins two conditions, flattening nested `AND`s.
    pub fn and(self, other: Condition) -> Condition {
        let mut terms = match self {
            Condition::And(terms) => terms,
            c => vec![c],
        };
        match other {
            Condition::And(more) => terms.extend(more),
            c => terms.push(c),
        }
        Condition::And(terms)
    }

    pub fn references_parameter(&self, name: &str) -> bool {
        match self {
            Condition::Predicate(tokens) => tokens.iter().any(|t| t.is_parameter(name)),
            Condition::And(terms) | Condition::Or(terms) => {
                terms.iter().any(|t| t.references_parameter(name))
            }
            Condition::Not(inner) => inner.references_parameter(name),
        }
    }

    pub fn parameters(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_parameters(&mut names);
        names
    }

    fn collect_parameters(&self, names: &mut BTreeSet<String>) {
        match self {
            Condition::Predicate(tokens) => {
                for token in tokens {
                    if let Token::Parameter(name) = token {
                        names.insert(name.clone());
                    }
                }
            }
            Condition::And(terms) | Condition::Or(terms) => {
                for term in terms {
                    term.collect_parameters(names);
                }
            }
            Condition::Not(inner) => inner.collect_parameters(names),
        }
    }

    /// Drops every predicate referencing `$name`.
    ///
    /// Empty `AND`/`OR` groups collapse, single-term groups unwrap, and a `NOT` whose operand
    /// vanished vanishes with it. Returns `None` when nothing is left.
    ///
    /// Pruning happens beneath a `NOT` too, so `NOT (a AND b > $p)` becomes `NOT a`: the
    /// negated restriction gets stricter and the overall condition matches fewer records.
    pub fn without_parameter(self, name: &str) -> Option<Condition> {
        match self {
            Condition::Predicate(tokens) => {
                if tokens.iter().any(|t| t.is_parameter(name)) {
                    None
                } else {
                    Some(Condition::Predicate(tokens))
                }
            }
            Condition::And(terms) => prune(terms, name, Condition::And),
            Condition::Or(terms) => prune(terms, name, Condition::Or),
            Condition::Not(inner) => inner
                .without_parameter(name)
                .map(|c| Condition::Not(Box::new(c))),
        }
    }

    pub(crate) fn try_for_each_token_mut<F>(&mut self, f: &mut F) -> AqlResult<()>
    where
        F: FnMut(&mut Token) -> AqlResult<()>,
    {
        match self {
            Condition::Predicate(tokens) => tokens.iter_mut().try_for_each(|t| f(t)),
            Condition::And(terms) | Condition::Or(terms) => terms
                .iter_mut()
                .try_for_each(|t| t.try_for_each_token_mut(&mut *f)),
            Condition::Not(inner) => inner.try_for_each_token_mut(f),
        }
    }

    pub(crate) fn for_each_token<F: FnMut(&Token)>(&self, f: &mut F) {
        match self {
            Condition::Predicate(tokens) => tokens.iter().for_each(|t| f(t)),
            Condition::And(terms) | Condition::Or(terms) => {
                terms.iter().for_each(|t| t.for_each_token(&mut *f))
            }
            Condition::Not(inner) => inner.for_each_token(f),
        }
    }

    pub fn to_tokens(&self) -> Vec<Token> {
        let mut out = Vec::new();
        self.write_tokens(&mut out);
        out
    }

    fn write_tokens(&self, out: &mut Vec<Token>) {
        match self {
            Condition::Predicate(tokens) => out.extend(tokens.iter().cloned()),
            Condition::And(terms) => write_joined(terms, "AND", out),
            Condition::Or(terms) => write_joined(terms, "OR", out),
            Condition::Not(inner) => {
                out.push(Token::word("NOT"));
                inner.write_grouped(out);
            }
        }
    }

    fn write_grouped(&self, out: &mut Vec<Token>) {
        match self {
            Condition::Predicate(_) | Condition::Not(_) => self.write_tokens(out),
            Condition::And(_) | Condition::Or(_) => {
                out.push(Token::Punct('('));
                self.write_tokens(out);
                out.push(Token::Punct(')'));
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(&self.to_tokens()))
    }
}

fn prune(
    terms: Vec<Condition>,
    name: &str,
    rebuild: fn(Vec<Condition>) -> Condition,
) -> Option<Condition> {
    let mut kept: Vec<Condition> = terms
        .into_iter()
        .filter_map(|t| t.without_parameter(name))
        .collect();
    match kept.len() {
        0 => None,
        1 => kept.pop(),
        _ => Some(rebuild(kept)),
    }
}

fn write_joined(terms: &[Condition], op: &str, out: &mut Vec<Token>) {
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            out.push(Token::word(op));
        }
        term.write_grouped(out);
    }
}

/// Parses the tokens of a WHERE clause (without the `WHERE` keyword).
pub(crate) fn parse(tokens: &[Token]) -> AqlResult<Condition> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let condition = parser.parse_or()?;
    if let Some(token) = tokens.get(parser.pos) {
        return Err(AqlError::Parse(format!(
            "unexpected '{token}' in WHERE clause"
        )));
    }
    Ok(condition)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn enter(&mut self) -> AqlResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(AqlError::Parse("WHERE clause nested too deeply".into()));
        }
        Ok(())
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.tokens.get(self.pos) {
            Some(t) if t.is_keyword(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn parse_or(&mut self) -> AqlResult<Condition> {
        let mut terms = vec![self.parse_and()?];
        while self.eat_keyword("OR") {
            terms.push(self.parse_and()?);
        }
        Ok(collapse(terms, Condition::Or))
    }

    fn parse_and(&mut self) -> AqlResult<Condition> {
        let mut terms = vec![self.parse_unary()?];
        while self.eat_keyword("AND") {
            terms.push(self.parse_unary()?);
        }
        Ok(collapse(terms, Condition::And))
    }

    fn parse_unary(&mut self) -> AqlResult<Condition> {
        if self.eat_keyword("NOT") {
            self.enter()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Condition::Not(Box::new(inner)));
        }
        if matches!(self.tokens.get(self.pos), Some(Token::Punct('('))) {
            self.pos += 1;
            self.enter()?;
            let inner = self.parse_or()?;
            if !matches!(self.tokens.get(self.pos), Some(Token::Punct(')'))) {
                return Err(AqlError::Parse("missing ')' in WHERE clause".into()));
            }
            self.pos += 1;
            self.depth -= 1;
            return Ok(inner);
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> AqlResult<Condition> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(token) = self.tokens.get(self.pos) {
            if token.opens() {
                depth += 1;
            } else if token.closes() {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            } else if depth == 0 && (token.is_keyword("AND") || token.is_keyword("OR")) {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(AqlError::Parse("expected a condition".into()));
        }
        Ok(Condition::Predicate(self.tokens[start..self.pos].to_vec()))
    }
}

fn collapse(mut terms: Vec<Condition>, rebuild: fn(Vec<Condition>) -> Condition) -> Condition {
    if terms.len() == 1 {
        terms.remove(0)
    } else {
        rebuild(terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_str(text: &str) -> Condition {
        parse(&tokenize(text).unwrap()).unwrap()
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let condition = parse_str("a = 1 OR b = 2 AND c = 3");
        match condition {
            Condition::Or(terms) => {
                assert_eq!(terms.len(), 2);
                assert!(matches!(terms[1], Condition::And(_)));
            }
            other => panic!("expected OR, got {other:?}"),
        }
    }

    #[test]
    fn test_parentheses_group_and_render_back() {
        let condition = parse_str("(a = 1 OR b = 2) AND NOT c = 3");
        assert_eq!(condition.to_string(), "(a = 1 OR b = 2) AND NOT c = 3");
    }

    #[test]
    fn test_braces_do_not_split_predicates() {
        let condition = parse_str("c MATCHES {'AND', 'OR'} AND d > 1");
        match condition {
            Condition::And(terms) => assert_eq!(terms.len(), 2),
            other => panic!("expected AND, got {other:?}"),
        }
    }

    #[test]
    fn test_without_parameter_prunes_and_unwraps() {
        let condition = parse_str("a = $x AND (b = $y OR c = 3)");
        let pruned = condition.without_parameter("y").unwrap();
        assert_eq!(pruned.to_string(), "a = $x AND c = 3");
    }

    #[test]
    fn test_without_parameter_drops_negation_of_removed_operand() {
        let condition = parse_str("NOT a = $x AND b = 1");
        let pruned = condition.without_parameter("x").unwrap();
        assert_eq!(pruned.to_string(), "b = 1");
    }

    #[test]
    fn test_without_parameter_prunes_inside_negation() {
        let condition = parse_str("NOT (a = 1 AND b > $p)");
        let pruned = condition.without_parameter("p").unwrap();
        assert_eq!(pruned.to_string(), "NOT a = 1");
    }

    #[test]
    fn test_deep_negation_is_rejected() {
        let text = format!("{}e/x = 1", "NOT ".repeat(20_000));
        let err = parse(&tokenize(&text).unwrap()).unwrap_err();
        assert_eq!(err, AqlError::Parse("WHERE clause nested too deeply".into()));
    }

    #[test]
    fn test_deep_parentheses_are_rejected() {
        let text = format!("{}e/x = 1{}", "(".repeat(5_000), ")".repeat(5_000));
        assert!(matches!(
            parse(&tokenize(&text).unwrap()),
            Err(AqlError::Parse(msg)) if msg.contains("nested too deeply")
        ));
    }

    #[test]
    fn test_nesting_up_to_the_limit_parses() {
        let text = format!(
            "{}e/x = 1{}",
            "(NOT ".repeat(MAX_NESTING / 2),
            ")".repeat(MAX_NESTING / 2)
        );
        assert!(parse(&tokenize(&text).unwrap()).is_ok());
    }

    #[test]
    fn test_without_parameter_can_empty_the_tree() {
        let condition = parse_str("a > $x OR b < $x");
        assert!(condition.without_parameter("x").is_none());
    }

    #[test]
    fn test_parameters_are_collected() {
        let condition = parse_str("a > $min AND (b < $max OR NOT c = $min)");
        let names: Vec<_> = condition.parameters().into_iter().collect();
        assert_eq!(names, vec!["max".to_string(), "min".to_string()]);
    }

    #[test]
    fn test_missing_close_paren_is_an_error() {
        let tokens = tokenize("(a = 1 AND b = 2").unwrap();
        assert!(matches!(parse(&tokens), Err(AqlError::Parse(_))));
    }

    #[test]
    fn test_matches_builder_renders_set() {
        let condition = Condition::matches("e/ehr_id/value", ["a", "b"]);
        assert_eq!(condition.to_string(), "e/ehr_id/value MATCHES {'a', 'b'}");
    }

    #[test]
    fn test_and_flattens() {
        let combined = Condition::equals("a", "1")
            .and(Condition::equals("b", "2"))
            .and(Condition::equals("c", "3"));
        assert!(matches!(combined, Condition::And(ref terms) if terms.len() == 3));
    }
}
