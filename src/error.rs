//! Error types for the data layer

use thiserror::Error;

/// Result type alias for data layer operations
pub type Result<T> = std::result::Result<T, DataLayerError>;

#[derive(Debug, Error)]
pub enum DataLayerError {
    /// A required field was missing or empty before a save
    #[error("Validation error: {0}")]
    Validation(String),

    /// The store rejected the statement
    #[error("Execution error: {0}")]
    Execution(#[from] rusqlite::Error),

    /// A named placeholder had no bound value
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// A saved row could not be read back
    #[error("Not found after save: {0}")]
    NotFound(String),

    /// A terminal method was called before `find`
    #[error("No pending statement, call find() first")]
    NoStatement,

    /// The shared connection could not be opened or used
    #[error("Connection error: {0}")]
    Connection(String),
}

impl DataLayerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }
}
