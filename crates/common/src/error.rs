//! Error types for the common crate
//!
//! This module defines the error taxonomy shared by the credential resolver,
//! the inventory service and the copy orchestrator.

use thiserror::Error;

/// Result type for copier operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for copier operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No identity could be established, or the secret store refused the secret
    #[error("Credential error: {0}")]
    Credential(String),

    /// The resource rejected the API key
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The identity lacks permission for the operation
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// The target resource refused to authorize a copy
    #[error("Copy authorization rejected: {0}")]
    AuthorizationRequest(String),

    /// The source resource refused to start a copy
    #[error("Copy initiation rejected: {0}")]
    Initiation(String),

    /// Querying the status of an in-flight copy failed
    #[error("Poll error: {0}")]
    Poll(String),

    /// Network failure or a throttled/unavailable service
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Invalid argument error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// External service error
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if the error is worth retrying locally
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Poll(_) | Error::ServiceUnavailable(_))
    }

    /// Returns true if the error is a credential error
    pub fn is_credential(&self) -> bool {
        matches!(self, Error::Credential(_))
    }

    /// Returns true if the error is an authentication error
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication(_))
    }

    /// Returns true if the error is an authorization error
    pub fn is_authorization(&self) -> bool {
        matches!(self, Error::Authorization(_))
    }

    /// Returns true if the error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
