//! Tokenizer and renderer for query text.
//!
//! The token stream is deliberately coarse: paths such as `o/data[at0001]/events` are split
//! only at brackets, and keywords are plain [`Token::Word`]s compared case-insensitively.
//! That is enough structure to locate clauses, containment classes, parameters and logical
//! operators without committing to a full grammar.

use crate::{AqlError, AqlResult};
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

/// One lexical unit of query text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identifier, keyword, path fragment or number.
    Word(String),
    /// A literal exactly as it appears in query text, quotes included.
    Literal(String),
    /// A named parameter, stored without the leading `$`.
    Parameter(String),
    /// One of `( ) { } [ ] ,`.
    Punct(char),
    /// Comparison operator.
    Operator(&'static str),
}

impl Token {
    pub fn word(text: impl Into<String>) -> Self {
        Token::Word(text.into())
    }

    /// Returns true if this is a word equal to `keyword`, ignoring ASCII case.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }

    pub fn is_parameter(&self, name: &str) -> bool {
        matches!(self, Token::Parameter(p) if p == name)
    }

    pub(crate) fn opens(&self) -> bool {
        matches!(self, Token::Punct('(' | '{' | '['))
    }

    pub(crate) fn closes(&self) -> bool {
        matches!(self, Token::Punct(')' | '}' | ']'))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => f.write_str(w),
            Token::Literal(l) => f.write_str(l),
            Token::Parameter(p) => write!(f, "${p}"),
            Token::Punct(c) => write!(f, "{c}"),
            Token::Operator(op) => f.write_str(op),
        }
    }
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || "(){}[],'\"$=!<>".contains(c)
}

/// Splits query text into tokens.
///
/// # Errors
///
/// Returns [`AqlError::Lex`] for an unterminated string literal, a `$` without a
/// parameter name, or a stray `!`.
pub fn tokenize(input: &str) -> AqlResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        match c {
            '(' | ')' | '{' | '}' | '[' | ']' | ',' => {
                chars.next();
                tokens.push(Token::Punct(c));
            }
            '\'' | '"' => {
                let end = read_string(&mut chars, start)?;
                tokens.push(Token::Literal(input[start..end].to_owned()));
            }
            '$' => {
                chars.next();
                let mut name = String::new();
                while let Some(&(_, n)) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        name.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    return Err(AqlError::Lex {
                        position: start,
                        message: "expected a parameter name after '$'".into(),
                    });
                }
                tokens.push(Token::Parameter(name));
            }
            '=' => {
                chars.next();
                tokens.push(Token::Operator("="));
            }
            '!' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '=')) => {
                        chars.next();
                        tokens.push(Token::Operator("!="));
                    }
                    _ => {
                        return Err(AqlError::Lex {
                            position: start,
                            message: "expected '=' after '!'".into(),
                        })
                    }
                }
            }
            '<' => {
                chars.next();
                let op = match chars.peek() {
                    Some(&(_, '=')) => "<=",
                    Some(&(_, '>')) => "<>",
                    _ => "<",
                };
                if op.len() == 2 {
                    chars.next();
                }
                tokens.push(Token::Operator(op));
            }
            '>' => {
                chars.next();
                let op = if matches!(chars.peek(), Some(&(_, '='))) {
                    chars.next();
                    ">="
                } else {
                    ">"
                };
                tokens.push(Token::Operator(op));
            }
            _ => {
                let mut end = start;
                while let Some(&(idx, n)) = chars.peek() {
                    if is_delimiter(n) {
                        break;
                    }
                    end = idx + n.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Word(input[start..end].to_owned()));
            }
        }
    }

    Ok(tokens)
}

/// Consumes a quoted literal starting at `start` and returns the byte offset just past the
/// closing quote.
fn read_string(chars: &mut Peekable<CharIndices<'_>>, start: usize) -> AqlResult<usize> {
    let Some((_, quote)) = chars.next() else {
        return Err(AqlError::Lex {
            position: start,
            message: "expected a string literal".into(),
        });
    };

    while let Some((idx, c)) = chars.next() {
        if c == '\\' {
            chars.next();
            continue;
        }
        if c == quote {
            return Ok(idx + c.len_utf8());
        }
    }

    Err(AqlError::Lex {
        position: start,
        message: "unterminated string literal".into(),
    })
}

fn needs_space(prev: &Token, next: &Token) -> bool {
    match (prev, next) {
        (Token::Punct('(' | '{' | '['), _) => false,
        (_, Token::Punct(')' | '}' | ']' | ',' | '[')) => false,
        (Token::Punct(']'), Token::Word(w)) if w.starts_with('/') => false,
        _ => true,
    }
}

/// Joins tokens back into query text with normalised spacing.
pub fn render(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut prev: Option<&Token> = None;
    for token in tokens {
        if let Some(p) = prev {
            if needs_space(p, token) {
                out.push(' ');
            }
        }
        out.push_str(&token.to_string());
        prev = Some(token);
    }
    out
}
