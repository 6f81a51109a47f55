//! Tag expressions
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or      := and ("or" and)*
//! and     := not ("and" not)*
//! not     := "not" not | primary
//! primary := "(" or ")" | TAG
//! ```
//!
//! A tag is `@name` or a bare word, which is read as `@word`. Keywords and tags
//! compare case-insensitively.

use std::fmt;
use thiserror::Error;

use crate::models::WorkItem;

/// Malformed tag expression
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagExprError {
    #[error("Tag expression is empty")]
    Empty,

    #[error("Unexpected '{token}' at token {position} in tag expression")]
    UnexpectedToken { token: String, position: usize },

    #[error("Tag expression ended unexpectedly")]
    UnexpectedEnd,

    #[error("Unclosed '(' in tag expression")]
    UnclosedParen,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Tag(String),
    And,
    Or,
    Not,
    Open,
    Close,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Tag(tag) => f.write_str(tag),
            Token::And => f.write_str("and"),
            Token::Or => f.write_str("or"),
            Token::Not => f.write_str("not"),
            Token::Open => f.write_str("("),
            Token::Close => f.write_str(")"),
        }
    }
}

/// Parsed tag expression
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagExpr {
    Tag(String),
    Not(Box<TagExpr>),
    And(Box<TagExpr>, Box<TagExpr>),
    Or(Box<TagExpr>, Box<TagExpr>),
}

impl TagExpr {
    pub fn parse(input: &str) -> Result<Self, TagExprError> {
        let tokens = tokenize(input);
        if tokens.is_empty() {
            return Err(TagExprError::Empty);
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(TagExprError::UnexpectedToken {
                token: token.to_string(),
                position: parser.pos,
            }),
        }
    }

    /// Evaluate against an item; untagged items never match
    pub fn matches(&self, item: &WorkItem) -> bool {
        match item.tags.as_deref() {
            Some(tags) if !tags.is_empty() => {
                let normalized: Vec<String> = tags.iter().map(|t| normalize_tag(t)).collect();
                self.eval(&normalized)
            }
            _ => false,
        }
    }

    fn eval(&self, tags: &[String]) -> bool {
        match self {
            TagExpr::Tag(tag) => tags.iter().any(|t| t == tag),
            TagExpr::Not(inner) => !inner.eval(tags),
            TagExpr::And(lhs, rhs) => lhs.eval(tags) && rhs.eval(tags),
            TagExpr::Or(lhs, rhs) => lhs.eval(tags) || rhs.eval(tags),
        }
    }
}

impl fmt::Display for TagExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagExpr::Tag(tag) => f.write_str(tag),
            TagExpr::Not(inner) => write!(f, "not {}", inner),
            TagExpr::And(lhs, rhs) => write!(f, "({} and {})", lhs, rhs),
            TagExpr::Or(lhs, rhs) => write!(f, "({} or {})", lhs, rhs),
        }
    }
}

fn normalize_tag(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    if lower.starts_with('@') {
        lower
    } else {
        format!("@{lower}")
    }
}

fn tokenize(input: &str) -> Vec<Token> {
    let spaced = input.replace('(', " ( ").replace(')', " ) ");
    spaced
        .split_whitespace()
        .map(|word| match word.to_lowercase().as_str() {
            "(" => Token::Open,
            ")" => Token::Close,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            _ => Token::Tag(normalize_tag(word)),
        })
        .collect()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<TagExpr, TagExprError> {
        let mut expr = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            expr = TagExpr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<TagExpr, TagExprError> {
        let mut expr = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_not()?;
            expr = TagExpr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> Result<TagExpr, TagExprError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let inner = self.parse_not()?;
            return Ok(TagExpr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<TagExpr, TagExprError> {
        let position = self.pos;
        match self.next() {
            Some(Token::Tag(tag)) => Ok(TagExpr::Tag(tag)),
            Some(Token::Open) => {
                let expr = self.parse_or()?;
                match self.next() {
                    Some(Token::Close) => Ok(expr),
                    Some(token) => Err(TagExprError::UnexpectedToken {
                        token: token.to_string(),
                        position: self.pos - 1,
                    }),
                    None => Err(TagExprError::UnclosedParen),
                }
            }
            Some(token) => Err(TagExprError::UnexpectedToken {
                token: token.to_string(),
                position,
            }),
            None => Err(TagExprError::UnexpectedEnd),
        }
    }
}
