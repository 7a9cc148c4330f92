//! Domain errors
//!
//! Backend failures are translated into this small taxonomy by the
//! container. Only the categories the container understands are
//! translated; everything else surfaces unchanged as [`Error::Backend`].

use thiserror::Error;

use crate::backend::{BackendError, FailureKind};

/// Errors returned by container operations
#[derive(Error, Debug)]
pub enum Error {
    /// Duplicate key on create, or version token mismatch on upsert
    #[error("Conflict: {0}")]
    ConflictingResource(String),

    /// The requested record does not exist
    #[error("Not found: {0}")]
    ResourceNotFound(String),

    /// Malformed connection string or collection name
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A cancellable operation was cancelled before it finished
    #[error("Operation cancelled")]
    Cancelled,

    /// Unclassified backend failure
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl Error {
    /// Check if this error is one of the domain categories (as opposed to an
    /// infrastructure failure)
    pub fn is_domain_error(&self) -> bool {
        !matches!(self, Error::Backend(_) | Error::Cancelled)
    }

    /// Status code an API layer would answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Error::ConflictingResource(_) => 409,
            Error::ResourceNotFound(_) => 404,
            Error::InvalidConfiguration(_) => 500,
            Error::Cancelled => 499,
            Error::Backend(e) => match e.kind() {
                FailureKind::Other if e.status() >= 400 => e.status(),
                _ => 500,
            },
        }
    }
}

/// Result type for container operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors() {
        assert!(Error::ConflictingResource("dup".into()).is_domain_error());
        assert!(Error::ResourceNotFound("gone".into()).is_domain_error());
        assert!(!Error::Cancelled.is_domain_error());
        assert!(!Error::Backend(BackendError::internal("boom")).is_domain_error());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::ConflictingResource("dup".into()).status_code(), 409);
        assert_eq!(Error::ResourceNotFound("gone".into()).status_code(), 404);
        assert_eq!(
            Error::Backend(BackendError::unavailable("down")).status_code(),
            503
        );
    }

    #[test]
    fn test_backend_error_is_transparent() {
        let err: Error = BackendError::internal("disk on fire").into();
        assert_eq!(err.to_string(), BackendError::internal("disk on fire").to_string());
    }
}
