//! Custom error types for Lumen
//!
//! One error enum covers the whole core. The variants mirror the failure
//! classes of the host: manifests, activation, the LSP wire protocol,
//! request timeouts and language server processes. None of them is fatal to
//! the host process; callers log them and degrade to "feature unavailable".

use thiserror::Error;

/// Main error type for Lumen operations
#[derive(Error, Debug)]
pub enum LumenError {
    /// Unparsable or incomplete extension manifest
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// An extension's own activation code failed
    #[error("Activation error in {extension}: {message}")]
    Activation { extension: String, message: String },

    /// Malformed LSP frame or JSON-RPC payload
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No response within the request deadline
    #[error("Request '{method}' timed out after {millis}ms")]
    Timeout { method: String, millis: u64 },

    /// Language server failed to spawn or exited
    #[error("Process error: {0}")]
    Process(String),

    /// IO-related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Entity not found errors
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// General errors with a message
    #[error("{0}")]
    General(String),
}

impl LumenError {
    /// Create a manifest error
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    /// Create an activation error
    pub fn activation(extension: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Activation {
            extension: extension.into(),
            message: msg.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(method: impl Into<String>, millis: u64) -> Self {
        Self::Timeout {
            method: method.into(),
            millis,
        }
    }

    /// Create a process error
    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process(msg.into())
    }

    /// Create a not found error
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Convert LumenError to String for the IPC boundary
impl From<LumenError> for String {
    fn from(err: LumenError) -> Self {
        err.to_string()
    }
}

impl From<String> for LumenError {
    fn from(s: String) -> Self {
        Self::General(s)
    }
}

impl From<&str> for LumenError {
    fn from(s: &str) -> Self {
        Self::General(s.to_string())
    }
}

/// Result type alias using LumenError
pub type Result<T> = std::result::Result<T, LumenError>;

/// Serialize LumenError as its message
impl serde::Serialize for LumenError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = LumenError::timeout("textDocument/hover", 30_000);
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "Request 'textDocument/hover' timed out after 30000ms"
        );
    }

    #[test]
    fn test_serializes_as_message() {
        let err = LumenError::not_found("Extension", "acme.tools");
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Extension not found: acme.tools\"");
    }
}
