//! Error types for the circle network.

use std::fmt;

use circlenet_core::CoreError;
use circlenet_keys::KeysError;
use circlenet_store::StoreError;
use thiserror::Error;

/// Stable codes for requests that were understood but cannot be honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientErrorCode {
    IdentityAlreadyMemberOfCircle,
    CannotGrantAutoConnectedMoreCircles,
    CannotDeleteCircleWithMembers,
    IdentityMustBeConnected,
    NotAnAutoConnection,
    InvalidCircleDefinition,
    UnknownCircle,
    UnknownDrive,
    InvalidConnectionKeys,
}

impl fmt::Display for ClientErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What the caller should take away from a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller is not allowed to do this. Not retryable.
    Unauthorized,
    /// The request was invalid. Retryable after fixing the input.
    InvalidRequest,
    /// Something failed on our side.
    Internal,
}

/// Errors that can occur during circle network operations.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Access denied.
    #[error("security error: {0}")]
    Security(String),

    /// Invalid request, with a stable code.
    #[error("client error {code}: {message}")]
    Client {
        code: ClientErrorCode,
        message: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Key handling error.
    #[error("key error: {0}")]
    Keys(#[from] KeysError),

    /// Validation error from core vocabulary.
    #[error("validation error: {0}")]
    Core(#[from] CoreError),

    /// Persisted payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A collaborator (circle definitions, drives, apps) failed.
    #[error("collaborator error: {0}")]
    Collaborator(#[from] anyhow::Error),
}

impl NetworkError {
    pub fn security(message: impl Into<String>) -> Self {
        NetworkError::Security(message.into())
    }

    pub fn client(code: ClientErrorCode, message: impl Into<String>) -> Self {
        NetworkError::Client {
            code,
            message: message.into(),
        }
    }

    /// The client error code, if this is a client error.
    pub fn client_code(&self) -> Option<ClientErrorCode> {
        match self {
            NetworkError::Client { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NetworkError::Security(_) => ErrorKind::Unauthorized,
            NetworkError::Keys(KeysError::InvalidRemoteKey | KeysError::Revoked) => {
                ErrorKind::Unauthorized
            }
            NetworkError::Client { .. } | NetworkError::Core(_) => ErrorKind::InvalidRequest,
            NetworkError::Keys(KeysError::InvalidGrant(_)) => ErrorKind::InvalidRequest,
            NetworkError::Keys(_)
            | NetworkError::Store(_)
            | NetworkError::Serialization(_)
            | NetworkError::Collaborator(_) => ErrorKind::Internal,
        }
    }

    pub fn is_security(&self) -> bool {
        self.kind() == ErrorKind::Unauthorized
    }
}

/// Result type for circle network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;
