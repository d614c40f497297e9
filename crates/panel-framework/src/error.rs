//! # Panel Errors
//!
//! This module defines the error taxonomy shared by every layer of the panel.
//! Terminal failures (authorization, not-found, validation) are never retried;
//! they carry the HTTP-equivalent status the caller should surface.

/// Errors that can occur anywhere in the panel runtime.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum PanelError {
    /// The caller may not perform this operation (403).
    #[error("This action is unauthorized")]
    AuthorizationDenied,

    /// The addressed resource, metric or record does not exist (404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage rejected the mutation (422).
    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    /// A transactional unit failed outside of the caller's own work.
    #[error("Transaction failed: {0}")]
    TransactionFailure(String),

    /// The server answered a request with a non-success status.
    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// A state-store dispatch was rejected.
    #[error("Store rejected dispatch: {0}")]
    StoreRejected(String),

    /// A mutation is already awaiting settlement on this modal.
    #[error("A mutation is already in flight")]
    MutationInFlight,

    #[error("Storage closed")]
    StorageClosed,

    #[error("Storage dropped response channel")]
    StorageDropped,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PanelError {
    /// The HTTP-equivalent status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            PanelError::AuthorizationDenied => 403,
            PanelError::NotFound(_) => 404,
            PanelError::MutationInFlight => 409,
            PanelError::ValidationFailure(_) => 422,
            PanelError::Rejected { status, .. } => *status,
            _ => 500,
        }
    }

    /// Builds the error a transport reports for a non-success response.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            403 => PanelError::AuthorizationDenied,
            404 => PanelError::NotFound(message),
            422 => PanelError::ValidationFailure(message),
            _ => PanelError::Rejected { status, message },
        }
    }
}
