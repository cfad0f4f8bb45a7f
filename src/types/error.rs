//! Error types for the handshake layer
//!
//! Every variant has a defined degraded state; nothing here is meant to
//! reach a top-level crash handler.

/// Main error type for handshake operations
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// Malformed, expired, or disallowed payload. Callers treat this as absence.
    #[error("Validation failure: {0}")]
    Validation(String),

    /// No local signing key. Aborts the current handshake step only.
    #[error("Signing unavailable: {0}")]
    SigningUnavailable(String),

    /// Network, HTTP, or parse error while talking to the remote authority.
    #[error("Remote authority failure: {0}")]
    RemoteAuth(String),

    /// Callback URL could not be opened after all retries.
    #[error("Callback delivery failed: {0}")]
    Delivery(String),

    /// No identity address is loaded.
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HandshakeError {
    /// Whether the error aborts the current handshake step.
    ///
    /// Validation failures never do (the message is simply absent), remote
    /// failures degrade to "not authenticated" and are retried on the next
    /// trigger, and delivery failures fall back to a manual return.
    pub fn is_fatal_to_handshake(&self) -> bool {
        matches!(
            self,
            Self::SigningUnavailable(_) | Self::NotAuthenticated(_) | Self::Crypto(_)
        )
    }

    /// Whether the caller may simply re-invoke the operation later.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::RemoteAuth(_) | Self::Delivery(_) | Self::Store(_)
        )
    }
}

impl From<std::io::Error> for HandshakeError {
    fn from(err: std::io::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for HandshakeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for HandshakeError {
    fn from(err: reqwest::Error) -> Self {
        Self::RemoteAuth(err.to_string())
    }
}

impl From<k256::ecdsa::Error> for HandshakeError {
    fn from(err: k256::ecdsa::Error) -> Self {
        Self::Crypto(format!("ECDSA error: {}", err))
    }
}

/// Result type alias for handshake operations
pub type Result<T> = std::result::Result<T, HandshakeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(HandshakeError::SigningUnavailable("no key".into()).is_fatal_to_handshake());
        assert!(!HandshakeError::RemoteAuth("503".into()).is_fatal_to_handshake());
        assert!(HandshakeError::RemoteAuth("503".into()).is_recoverable());
        assert!(HandshakeError::Delivery("open failed".into()).is_recoverable());
        assert!(!HandshakeError::Config("bad".into()).is_recoverable());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: HandshakeError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, HandshakeError::Serialization(_)));
    }
}
