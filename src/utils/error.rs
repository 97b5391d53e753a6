//! The `error` module defines the single error type returned by every fallible
//! operation in `popmq`.
//!
//! Errors are grouped into four kinds (see [`ErrorKind`]): validation errors are
//! raised by the call that introduces bad input, state errors by a call made at
//! the wrong point of an object's lifecycle, format errors by typed accessors
//! that cannot convert a stored value, and internal errors by the engine itself.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, JmsError>;

/// Coarse classification of a [`JmsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    State,
    Format,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JmsError {
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid property name '{0}'")]
    InvalidPropertyName(String),

    #[error("invalid client id: {0}")]
    InvalidClientId(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("message format error: {0}")]
    MessageFormat(String),

    #[error("message body is write-only")]
    MessageNotReadable,

    #[error("message is read-only")]
    MessageNotWriteable,

    #[error("unexpected end of message body")]
    MessageEof,

    #[error("transaction rolled back: {0}")]
    TransactionRolledBack(String),

    #[error("provider error: {0}")]
    Internal(String),
}

impl JmsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JmsError::InvalidDestination(_)
            | JmsError::InvalidSelector { .. }
            | JmsError::InvalidPropertyName(_)
            | JmsError::InvalidClientId(_)
            | JmsError::InvalidArgument(_)
            | JmsError::UnsupportedOperation(_) => ErrorKind::Validation,
            JmsError::IllegalState(_)
            | JmsError::MessageNotReadable
            | JmsError::MessageNotWriteable
            | JmsError::TransactionRolledBack(_) => ErrorKind::State,
            JmsError::MessageFormat(_) | JmsError::MessageEof => ErrorKind::Format,
            JmsError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn illegal_state(reason: impl Into<String>) -> Self {
        JmsError::IllegalState(reason.into())
    }

    pub(crate) fn format(reason: impl Into<String>) -> Self {
        JmsError::MessageFormat(reason.into())
    }
}
