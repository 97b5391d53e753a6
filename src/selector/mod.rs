//! Message selectors
//!
//! A selector is a boolean expression over header fields and properties,
//! written in a subset of SQL92 conditional syntax:
//!
//! ```text
//! color = 'red' AND weight BETWEEN 10 AND 20 AND NOT (JMSPriority < 4)
//! ```
//!
//! Expressions are parsed and type-checked once, when the consumer or
//! subscription is created; evaluation never fails and yields a [`Tri`].
//! Only messages for which the selector is `True` are delivered.

mod eval;
mod lexer;
mod parser;

use std::fmt;

use crate::message::Message;
use crate::utils::{JmsError, Result};

pub use eval::Tri;

#[derive(Debug, Clone)]
pub struct Selector {
    source: String,
    expr: parser::Expr,
}

impl Selector {
    /// Parses and validates `source`.
    pub fn parse(source: &str) -> Result<Self> {
        let invalid = |reason: String| JmsError::InvalidSelector {
            selector: source.to_string(),
            reason,
        };
        if source.trim().is_empty() {
            return Err(invalid("empty selector".to_string()));
        }
        let tokens = lexer::tokenize(source).map_err(invalid)?;
        let expr = parser::parse(tokens).map_err(invalid)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// A missing or blank selector selects everything.
    pub fn optional(source: Option<&str>) -> Result<Option<Self>> {
        match source {
            Some(s) if !s.trim().is_empty() => Self::parse(s).map(Some),
            _ => Ok(None),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, message: &Message) -> Tri {
        eval::truth(&self.expr, message)
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.evaluate(message).is_true()
    }
}

/// Two selectors are the same when their source text is.
impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Selector {}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Evaluates an optional selector; no selector matches every message.
pub(crate) fn accepts(selector: Option<&Selector>, message: &Message) -> bool {
    selector.is_none_or(|s| s.matches(message))
}

#[cfg(test)]
mod tests;
