//! Error types for the Matchpoint coordination engine

use thiserror::Error;

/// Result type alias for coordination operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating sessions, streams and links
#[derive(Debug, Error)]
pub enum Error {
    /// Stream or server parameters failed validation (no state change)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A stream with this id already exists for the session
    #[error("Stream already exists: {0}")]
    DuplicateStream(String),

    /// Stream not found
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// Stream exists but is not accepting chunks
    #[error("Stream not active: {0}")]
    StreamNotActive(String),

    /// Link request pairs the wrong modalities or unknown streams
    #[error("Link mismatch: {0}")]
    LinkMismatch(String),

    /// Link not found
    #[error("Link not found: {0}")]
    LinkNotFound(String),

    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// External collaborator did not answer within its deadline
    #[error("Collaborator timeout after {timeout_ms}ms: {collaborator}")]
    CollaboratorTimeout {
        /// Collaborator name (speech, detection)
        collaborator: String,
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// External collaborator returned an error
    #[error("Collaborator failure ({collaborator}): {message}")]
    CollaboratorFailure {
        /// Collaborator name (speech, detection)
        collaborator: String,
        /// Failure detail
        message: String,
    },

    /// Parameter value outside [0, 100]
    #[error("Invalid parameter value for {name}: {value} (expected 0-100)")]
    InvalidParameterValue {
        /// Parameter name
        name: String,
        /// Rejected value
        value: f64,
    },

    /// Unknown parameter name
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    /// Session lacks the capability required for the request
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Inbound message could not be decoded
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Send to a session transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Too many concurrent sessions or streams
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Internal channel closed (component shut down)
    #[error("Component shut down: {0}")]
    Shutdown(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file parse error
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl Error {
    /// Stable wire code carried in outbound `error` messages
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidConfig(_) => "invalid_config",
            Error::DuplicateStream(_) => "duplicate_stream",
            Error::StreamNotFound(_) => "stream_not_found",
            Error::StreamNotActive(_) => "stream_not_active",
            Error::LinkMismatch(_) => "link_mismatch",
            Error::LinkNotFound(_) => "link_not_found",
            Error::SessionNotFound(_) => "session_not_found",
            Error::CollaboratorTimeout { .. } => "collaborator_timeout",
            Error::CollaboratorFailure { .. } => "collaborator_failure",
            Error::InvalidParameterValue { .. } => "invalid_parameter_value",
            Error::UnknownParameter(_) => "unknown_parameter",
            Error::PermissionDenied(_) => "permission_denied",
            Error::InvalidMessage(_) | Error::Serialization(_) => "invalid_message",
            Error::Transport(_) => "transport_error",
            Error::CapacityExceeded(_) => "capacity_exceeded",
            Error::Shutdown(_) => "shutdown",
            Error::Io(_) => "io_error",
            Error::ConfigParse(_) => "invalid_config",
        }
    }

    /// Per-chunk failures: the chunk is dropped, the stream keeps running
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CollaboratorTimeout { .. } | Error::CollaboratorFailure { .. }
        )
    }

    /// Lifecycle misuse by the client (rejected without state change)
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            Error::DuplicateStream(_)
                | Error::StreamNotFound(_)
                | Error::StreamNotActive(_)
                | Error::LinkMismatch(_)
                | Error::LinkNotFound(_)
        )
    }

    /// Errors that require tearing down the session
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("sample_rate missing".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: sample_rate missing");

        let err = Error::CollaboratorTimeout {
            collaborator: "speech".to_string(),
            timeout_ms: 2000,
        };
        assert_eq!(err.to_string(), "Collaborator timeout after 2000ms: speech");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::StreamNotActive("a1".into()).code(), "stream_not_active");
        assert_eq!(Error::LinkMismatch("x".into()).code(), "link_mismatch");
        assert_eq!(
            Error::InvalidParameterValue {
                name: "sensitivity".into(),
                value: 120.0
            }
            .code(),
            "invalid_parameter_value"
        );
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::CollaboratorFailure {
            collaborator: "detection".into(),
            message: "503".into()
        }
        .is_recoverable());
        assert!(!Error::StreamNotFound("v1".into()).is_recoverable());
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::DuplicateStream("a1".into()).is_lifecycle_error());
        assert!(!Error::InvalidConfig("x".into()).is_lifecycle_error());
        assert!(Error::Transport("closed".into()).is_session_fatal());
        assert!(!Error::StreamNotActive("a1".into()).is_session_fatal());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "config.toml");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.code(), "io_error");
    }
}
