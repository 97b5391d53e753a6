//! The `utils` module provides the pieces shared by every other part of
//! `popmq`: the error taxonomy, the logging bootstrap and the wall clock.

pub mod error;
pub mod logging;

pub use error::{ErrorKind, JmsError, Result};

/// Milliseconds since the Unix epoch, the unit of every header timestamp.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
