//! Backend failure reporting and classification
//!
//! Every table backend reports failures as a [`BackendError`] carrying the
//! HTTP-style status code the table service would answer with. The
//! container never looks at message text: [`classify`] maps the status
//! code onto a closed set of [`FailureKind`]s and anything it does not
//! recognise stays [`FailureKind::Other`].

use std::error::Error as StdError;
use thiserror::Error;

/// Status codes used by the table service protocol
pub mod status {
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const CONFLICT: u16 = 409;
    pub const PRECONDITION_FAILED: u16 = 412;
    pub const INTERNAL_ERROR: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// Error codes reported alongside the status
pub mod codes {
    pub const ENTITY_ALREADY_EXISTS: &str = "EntityAlreadyExists";
    pub const RESOURCE_NOT_FOUND: &str = "ResourceNotFound";
    pub const TABLE_NOT_FOUND: &str = "TableNotFound";
    pub const UPDATE_CONDITION_NOT_SATISFIED: &str = "UpdateConditionNotSatisfied";
    pub const INVALID_RESOURCE_NAME: &str = "InvalidResourceName";
    pub const INVALID_INPUT: &str = "InvalidInput";
    pub const INTERNAL_ERROR: &str = "InternalError";
    pub const SERVER_BUSY: &str = "ServerBusy";
}

/// A raw failure reported by a table backend
#[derive(Error, Debug)]
#[error("{message} (status {status}, {code})")]
pub struct BackendError {
    status: u16,
    code: String,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl BackendError {
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(status::CONFLICT, codes::ENTITY_ALREADY_EXISTS, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(status::NOT_FOUND, codes::RESOURCE_NOT_FOUND, message)
    }

    pub fn table_not_found(table: &str) -> Self {
        Self::new(
            status::NOT_FOUND,
            codes::TABLE_NOT_FOUND,
            format!("Table '{}' does not exist", table),
        )
    }

    pub fn condition_not_satisfied(message: impl Into<String>) -> Self {
        Self::new(
            status::PRECONDITION_FAILED,
            codes::UPDATE_CONDITION_NOT_SATISFIED,
            message,
        )
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(status::SERVICE_UNAVAILABLE, codes::SERVER_BUSY, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(status::INTERNAL_ERROR, codes::INTERNAL_ERROR, message)
    }

    /// HTTP-style status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Service error code (e.g. `EntityAlreadyExists`)
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Classify this failure by its status code
    pub fn kind(&self) -> FailureKind {
        classify(self.status)
    }
}

/// Failure categories the container knows how to translate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Duplicate key on insert
    Conflict,
    /// Version token mismatch on a conditional write
    PreconditionFailed,
    /// Record or table does not exist
    NotFound,
    /// Anything else; passed through unchanged
    Other,
}

/// Map a backend status code to a failure kind
pub fn classify(status: u16) -> FailureKind {
    match status {
        status::CONFLICT => FailureKind::Conflict,
        status::PRECONDITION_FAILED => FailureKind::PreconditionFailed,
        status::NOT_FOUND => FailureKind::NotFound,
        _ => FailureKind::Other,
    }
}

/// Result type for backend calls
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_statuses() {
        assert_eq!(classify(409), FailureKind::Conflict);
        assert_eq!(classify(412), FailureKind::PreconditionFailed);
        assert_eq!(classify(404), FailureKind::NotFound);
    }

    #[test]
    fn test_classify_unknown_status_is_other() {
        for code in [200, 400, 403, 500, 503] {
            assert_eq!(classify(code), FailureKind::Other, "status {}", code);
        }
    }

    #[test]
    fn test_kind_ignores_message_text() {
        // Message mentions a conflict but the status says otherwise
        let err = BackendError::new(500, codes::INTERNAL_ERROR, "conflict while writing");
        assert_eq!(err.kind(), FailureKind::Other);

        let err = BackendError::already_exists("duplicate");
        assert_eq!(err.kind(), FailureKind::Conflict);
        assert_eq!(err.code(), codes::ENTITY_ALREADY_EXISTS);
    }

    #[test]
    fn test_error_display() {
        let err = BackendError::table_not_found("values");
        let msg = err.to_string();
        assert!(msg.contains("values"));
        assert!(msg.contains("404"));
        assert!(msg.contains(codes::TABLE_NOT_FOUND));
    }

    #[test]
    fn test_source_is_preserved() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = BackendError::internal("write failed").with_source(io);
        let source = err.source().expect("source should be attached");
        assert_eq!(source.to_string(), "disk gone");
    }
}
