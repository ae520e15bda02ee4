mod context;
mod exit_codes;
mod format;

pub use context::ErrorContext;
pub use exit_codes::get_exit_code;
pub use format::{format_error_chain, format_error_with_color};

use crate::db::DatabaseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableLockError {
    #[error("Invalid lock mode '{value}'. Valid modes are: {}", valid.join(", "))]
    InvalidLockMode { value: String, valid: Vec<String> },

    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Table collection must contain at least one table")]
    EmptyTableCollection,

    #[error("Tables in a collection must share one lock mode, found: {}", modes.join(", "))]
    MixedLockModes { modes: Vec<String> },

    #[error(
        "Nested lock detected! Cannot acquire lock on {requested} while {held} is locked."
    )]
    NestedLock { requested: String, held: String },

    #[error(
        "Lock escalation detected! Cannot change lock level from {held_mode} to {requested_mode} \
         for {tables}."
    )]
    LockEscalation {
        tables: String,
        held_mode: String,
        requested_mode: String,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TableLockError {
    /// Errors that indicate a bug in the calling migration rather than server state.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            TableLockError::NestedLock { .. } | TableLockError::LockEscalation { .. }
        )
    }
}

impl From<config::ConfigError> for TableLockError {
    fn from(err: config::ConfigError) -> Self {
        TableLockError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TableLockError>;
