//! Error types for circlenet core.

use thiserror::Error;

/// Errors raised while parsing or validating core vocabulary.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid identity name: {0}")]
    InvalidOdinId(String),

    #[error("invalid circle definition: {0}")]
    InvalidCircleDefinition(String),

    #[error("invalid drive grant: {0}")]
    InvalidDriveGrant(String),

    #[error("unknown connection status: {0}")]
    UnknownConnectionStatus(i32),

    #[error("unknown permission key: {0}")]
    UnknownPermissionKey(i32),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
