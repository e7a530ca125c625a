//! Parsed query: clause split plus the rewrite operations restriction policies rely on.

use crate::condition::{self, Condition};
use crate::lexer::{render, tokenize, Token};
use crate::parameters::ParameterValue;
use crate::{AqlError, AqlResult};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Keywords that can never be a containment variable name.
const RESERVED: &[&str] = &["CONTAINS", "AND", "OR", "XOR", "NOT", "WHERE", "ORDER", "LIMIT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Select,
    From,
    Where,
    Tail,
}

/// A query split into `SELECT`, `FROM`, `WHERE` and trailing clauses.
///
/// The WHERE clause is held as a [`Condition`] tree so predicates can be removed or conjoined.
/// Everything else stays as tokens and renders back verbatim apart from whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AqlQuery {
    select: Vec<Token>,
    from: Vec<Token>,
    condition: Option<Condition>,
    tail: Vec<Token>,
}

impl AqlQuery {
    /// Parses query text.
    ///
    /// # Errors
    ///
    /// Returns [`AqlError::Lex`] for lexical problems and [`AqlError::Parse`] when the text
    /// does not start with `SELECT`, has no `FROM`, has an empty clause or unbalanced brackets.
    pub fn parse(text: &str) -> AqlResult<Self> {
        let tokens = tokenize(text)?;
        let mut iter = tokens.into_iter();

        match iter.next() {
            Some(t) if t.is_keyword("SELECT") => {}
            _ => return Err(AqlError::Parse("query must start with SELECT".into())),
        }

        let mut section = Section::Select;
        let mut depth = 0usize;
        let mut select = Vec::new();
        let mut from = Vec::new();
        let mut where_tokens = Vec::new();
        let mut tail = Vec::new();
        let mut saw_where = false;

        for token in iter {
            if depth == 0 {
                let next = if token.is_keyword("FROM") && section == Section::Select {
                    Some(Section::From)
                } else if token.is_keyword("WHERE") && section == Section::From {
                    saw_where = true;
                    Some(Section::Where)
                } else if (token.is_keyword("ORDER")
                    || token.is_keyword("LIMIT")
                    || token.is_keyword("OFFSET"))
                    && matches!(section, Section::From | Section::Where)
                {
                    Some(Section::Tail)
                } else {
                    None
                };

                if let Some(next) = next {
                    let keep_keyword = next == Section::Tail;
                    section = next;
                    if !keep_keyword {
                        continue;
                    }
                }
            }

            if token.opens() {
                depth += 1;
            } else if token.closes() {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| AqlError::Parse(format!("unbalanced '{token}'")))?;
            }

            match section {
                Section::Select => select.push(token),
                Section::From => from.push(token),
                Section::Where => where_tokens.push(token),
                Section::Tail => tail.push(token),
            }
        }

        if depth != 0 {
            return Err(AqlError::Parse("unbalanced brackets".into()));
        }
        if select.is_empty() {
            return Err(AqlError::Parse("empty SELECT clause".into()));
        }
        if from.is_empty() {
            return Err(AqlError::Parse("missing FROM clause".into()));
        }

        let condition = if saw_where {
            if where_tokens.is_empty() {
                return Err(AqlError::Parse("empty WHERE clause".into()));
            }
            Some(condition::parse(&where_tokens)?)
        } else {
            None
        };

        Ok(Self {
            select,
            from,
            condition,
            tail,
        })
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    /// Conjoins `restriction` with the existing WHERE clause, creating one if needed.
    pub fn and_where(&mut self, restriction: Condition) {
        self.condition = Some(match self.condition.take() {
            Some(existing) => existing.and(restriction),
            None => restriction,
        });
    }

    /// Names of every parameter referenced anywhere in the query.
    pub fn parameters(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.for_each_token(&mut |token| {
            if let Token::Parameter(name) = token {
                names.insert(name.clone());
            }
        });
        names
    }

    /// Removes every WHERE predicate that references `$name`.
    ///
    /// A no-op if the parameter is not referenced.
    ///
    /// # Errors
    ///
    /// Returns [`AqlError::ParameterOutsideWhere`] if the parameter also appears in the
    /// `SELECT`, `FROM` or trailing clauses, where there is no predicate to remove.
    pub fn remove_parameter(&mut self, name: &str) -> AqlResult<()> {
        let outside = self
            .select
            .iter()
            .chain(&self.from)
            .chain(&self.tail)
            .any(|t| t.is_parameter(name));
        if outside {
            return Err(AqlError::ParameterOutsideWhere(name.to_owned()));
        }
        self.condition = self
            .condition
            .take()
            .and_then(|c| c.without_parameter(name));
        Ok(())
    }

    /// Replaces every `$name` with the literal rendering of its value.
    ///
    /// Values for parameters the query does not reference are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`AqlError::UnboundParameter`] for a referenced parameter missing from
    /// `values`, or [`AqlError::InvalidParameterValue`] if a value cannot be rendered.
    pub fn bind_parameters(&mut self, values: &BTreeMap<String, ParameterValue>) -> AqlResult<()> {
        let mut bind = |token: &mut Token| -> AqlResult<()> {
            if let Token::Parameter(name) = token {
                let value = values
                    .get(name.as_str())
                    .ok_or_else(|| AqlError::UnboundParameter(name.clone()))?;
                *token = Token::Literal(value.to_literal(name)?);
            }
            Ok(())
        };

        for token in self
            .select
            .iter_mut()
            .chain(self.from.iter_mut())
            .chain(self.tail.iter_mut())
        {
            bind(token)?;
        }
        if let Some(condition) = self.condition.as_mut() {
            condition.try_for_each_token_mut(&mut bind)?;
        }
        Ok(())
    }

    /// Variable bound to the `EHR` class in the FROM clause, if any.
    pub fn ehr_alias(&self) -> Option<String> {
        self.class_positions("EHR")
            .first()
            .and_then(|&idx| self.alias_at(idx))
    }

    /// Returns the `EHR` variable, adding one to the FROM clause if necessary.
    ///
    /// An unnamed `EHR` gets a fresh variable; a FROM clause without `EHR` is wrapped as
    /// `EHR <alias> CONTAINS <original containment>`.
    pub fn ensure_ehr_alias(&mut self) -> String {
        if let Some(&idx) = self.class_positions("EHR").first() {
            if let Some(alias) = self.alias_at(idx) {
                return alias;
            }
            let alias = self.fresh_alias("e");
            self.from.insert(idx + 1, Token::word(alias.clone()));
            return alias;
        }

        let alias = self.fresh_alias("e");
        let rest = std::mem::take(&mut self.from);
        self.from = vec![
            Token::word("EHR"),
            Token::word(alias.clone()),
            Token::word("CONTAINS"),
        ];
        self.from.extend(wrap_compound(rest));
        alias
    }

    /// Variables bound to every `COMPOSITION` class in the FROM clause, in order.
    pub fn composition_aliases(&self) -> Vec<String> {
        self.class_positions("COMPOSITION")
            .into_iter()
            .filter_map(|idx| self.alias_at(idx))
            .collect()
    }

    /// Returns the variables of every `COMPOSITION`, naming unnamed ones and adding a
    /// `COMPOSITION` containment when the query has none.
    pub fn ensure_composition_aliases(&mut self) -> Vec<String> {
        let positions = self.class_positions("COMPOSITION");

        if positions.is_empty() {
            let alias = self.fresh_alias("c");
            let composition = [
                Token::word("COMPOSITION"),
                Token::word(alias.clone()),
            ];

            match self.class_positions("EHR").first() {
                Some(&ehr) => {
                    let after = self.end_of_class(ehr);
                    if self.from.get(after).is_some_and(|t| t.is_keyword("CONTAINS")) {
                        let rest = self.from.split_off(after + 1);
                        self.from.extend(composition);
                        self.from.push(Token::word("CONTAINS"));
                        self.from.extend(wrap_compound(rest));
                    } else {
                        let mut inserted = vec![Token::word("CONTAINS")];
                        inserted.extend(composition);
                        self.from.splice(after..after, inserted);
                    }
                }
                None => {
                    let rest = std::mem::take(&mut self.from);
                    self.from.extend(composition);
                    self.from.push(Token::word("CONTAINS"));
                    self.from.extend(wrap_compound(rest));
                }
            }
            return vec![alias];
        }

        let mut aliases = Vec::with_capacity(positions.len());
        for &idx in positions.iter().rev() {
            match self.alias_at(idx) {
                Some(alias) => aliases.push(alias),
                None => {
                    let alias = self.fresh_alias("c");
                    self.from.insert(idx + 1, Token::word(alias.clone()));
                    aliases.push(alias);
                }
            }
        }
        aliases.reverse();
        aliases
    }

    /// Indices in the FROM clause of class names equal to `class`, skipping archetype
    /// predicates inside brackets.
    fn class_positions(&self, class: &str) -> Vec<usize> {
        let mut positions = Vec::new();
        let mut bracket_depth = 0usize;
        for (idx, token) in self.from.iter().enumerate() {
            match token {
                Token::Punct('[') => bracket_depth += 1,
                Token::Punct(']') => bracket_depth = bracket_depth.saturating_sub(1),
                t if bracket_depth == 0 && t.is_keyword(class) => positions.push(idx),
                _ => {}
            }
        }
        positions
    }

    fn alias_at(&self, class_idx: usize) -> Option<String> {
        match self.from.get(class_idx + 1) {
            Some(Token::Word(w)) if !is_reserved(w) => Some(w.clone()),
            _ => None,
        }
    }

    /// Index just past a class node: its name, optional variable and optional predicate.
    fn end_of_class(&self, class_idx: usize) -> usize {
        let mut idx = class_idx + 1;
        if self.alias_at(class_idx).is_some() {
            idx += 1;
        }
        if matches!(self.from.get(idx), Some(Token::Punct('['))) {
            let mut depth = 0usize;
            while let Some(token) = self.from.get(idx) {
                idx += 1;
                match token {
                    Token::Punct('[') => depth += 1,
                    Token::Punct(']') => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
        idx
    }

    /// A variable name starting with `prefix` that no word in the query uses.
    fn fresh_alias(&self, prefix: &str) -> String {
        let mut taken = BTreeSet::new();
        self.for_each_token(&mut |token| {
            if let Token::Word(w) = token {
                let head = w.split('/').next().unwrap_or(w);
                taken.insert(head.to_owned());
            }
        });

        if !taken.contains(prefix) {
            return prefix.to_owned();
        }
        (0usize..)
            .map(|n| format!("{prefix}{n}"))
            .find(|candidate| !taken.contains(candidate))
            .unwrap_or_else(|| prefix.to_owned())
    }

    fn for_each_token<F: FnMut(&Token)>(&self, f: &mut F) {
        self.select
            .iter()
            .chain(&self.from)
            .chain(&self.tail)
            .for_each(|t| f(t));
        if let Some(condition) = &self.condition {
            condition.for_each_token(f);
        }
    }
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|k| word.eq_ignore_ascii_case(k))
}

/// Parenthesises a containment expression that has a top-level logical operator.
fn wrap_compound(tokens: Vec<Token>) -> Vec<Token> {
    let mut depth = 0usize;
    let compound = tokens.iter().any(|t| {
        if t.opens() {
            depth += 1;
        } else if t.closes() {
            depth = depth.saturating_sub(1);
        }
        depth == 0 && (t.is_keyword("AND") || t.is_keyword("OR") || t.is_keyword("XOR"))
    });
    if !compound {
        return tokens;
    }
    let mut wrapped = Vec::with_capacity(tokens.len() + 2);
    wrapped.push(Token::Punct('('));
    wrapped.extend(tokens);
    wrapped.push(Token::Punct(')'));
    wrapped
}

impl fmt::Display for AqlQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT {} FROM {}", render(&self.select), render(&self.from))?;
        if let Some(condition) = &self.condition {
            write!(f, " WHERE {condition}")?;
        }
        if !self.tail.is_empty() {
            write!(f, " {}", render(&self.tail))?;
        }
        Ok(())
    }
}

impl FromStr for AqlQuery {
    type Err = AqlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
