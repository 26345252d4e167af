//! Error types for notebridge.

use thiserror::Error;

/// Result type alias using notebridge's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for notebridge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote note store has no note with this guid
    #[error("Note not found: {0}")]
    NoteNotFound(String),

    /// No user record for this id
    #[error("User not found: {0}")]
    UserNotFound(i64),

    /// No content handler is registered for the request type
    #[error("Unsupported request type: {0}")]
    UnsupportedRequestType(String),

    /// Remote note store rejected or failed the call
    #[error("Note store error: {0}")]
    NoteStore(String),

    /// Chat platform call failed
    #[error("Chat error: {0}")]
    Chat(String),

    /// A remote call exceeded its deadline
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure is expected to clear up on a later pass.
    ///
    /// The dealer backs off and retries on transient errors and treats
    /// everything else coming out of the claim path as fatal.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(e) => !matches!(
                e,
                sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::Decode(_)
                    | sqlx::Error::TypeNotFound { .. }
                    | sqlx::Error::Configuration(_)
            ),
            Error::NoteStore(_) | Error::Chat(_) | Error::Timeout(_) | Error::Request(_) => true,
            Error::NotFound(_)
            | Error::NoteNotFound(_)
            | Error::UserNotFound(_)
            | Error::UnsupportedRequestType(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::InvalidInput(_)
            | Error::Internal(_) => false,
        }
    }

    /// Whether this is the remote store's "note is gone" condition.
    pub fn is_note_not_found(&self) -> bool {
        matches!(self, Error::NoteNotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        // Request URLs can carry credentials (the Bot API puts the token in the path).
        let e = e.without_url();
        if e.is_timeout() {
            Error::Request(format!("timed out: {}", e))
        } else {
            Error::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_note_not_found() {
        let err = Error::NoteNotFound("abc-123".to_string());
        assert_eq!(err.to_string(), "Note not found: abc-123");
    }

    #[test]
    fn test_error_display_user_not_found() {
        let err = Error::UserNotFound(42);
        assert_eq!(err.to_string(), "User not found: 42");
    }

    #[test]
    fn test_error_display_unsupported_request_type() {
        let err = Error::UnsupportedRequestType("photo".to_string());
        assert_eq!(err.to_string(), "Unsupported request type: photo");
    }

    #[test]
    fn test_error_display_timeout() {
        let err = Error::Timeout(30);
        assert_eq!(err.to_string(), "Timed out after 30s");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Timeout(1).is_transient());
        assert!(Error::NoteStore("502".into()).is_transient());
        assert!(Error::Chat("flood wait".into()).is_transient());
        assert!(Error::Request("connection reset".into()).is_transient());
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_transient());

        assert!(!Error::UnsupportedRequestType("photo".into()).is_transient());
        assert!(!Error::Config("missing token".into()).is_transient());
        assert!(!Error::Internal("bug".into()).is_transient());
        assert!(!Error::Database(sqlx::Error::ColumnNotFound("x".into())).is_transient());
    }

    #[test]
    fn test_is_note_not_found() {
        assert!(Error::NoteNotFound("g".into()).is_note_not_found());
        assert!(!Error::NotFound("g".into()).is_note_not_found());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
