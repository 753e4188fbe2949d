//! Error types for the session store.

use sea_orm::DbErr;
use thiserror::Error;

/// Result type for runtime session operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while a store or manager is in use.
///
/// Cookie-derived input never produces one of these: an identifier that fails to decrypt
/// or a payload that fails to decode falls back to an empty session instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The database rejected or failed a query.
    #[error("database error: {0}")]
    Backend(#[from] DbErr),

    /// A raw session identifier could not be wrapped for the cookie.
    #[error("failed to encrypt session id: {0}")]
    Encrypt(String),

    /// Session attributes could not be serialized into a payload.
    #[error("failed to encode session payload: {0}")]
    Encode(String),
}

/// Errors raised while building a store. A store is never handed out after one of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required option was missing or empty.
    #[error("the '{0}' option cannot be empty")]
    Missing(&'static str),

    /// An option had the wrong type or an unusable value.
    #[error("the '{option}' option is invalid: {reason}")]
    Invalid {
        option: &'static str,
        reason: String,
    },

    /// An option was outside its enumerated set of values.
    #[error("the '{option}' option can only be one of: {allowed}")]
    NotAllowed {
        option: &'static str,
        allowed: String,
    },

    /// The configured sessions table is absent from the database.
    #[error("the table '{0}' does not exist in the database")]
    TableMissing(String),

    /// The schema could not be inspected.
    #[error("failed to inspect the database schema: {0}")]
    Backend(#[from] DbErr),
}

impl ConfigError {
    pub(crate) fn invalid(option: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            option,
            reason: reason.into(),
        }
    }
}
