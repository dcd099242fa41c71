//! Error types for session tokens.

use chrono::{DateTime, Utc};
use roam_core::ConfigError;
use thiserror::Error;

/// Errors that can occur while creating, loading or serializing a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Missing or malformed configuration or key material.
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// A signing operation was attempted on a node without a private key.
    #[error("cannot change secure session attributes; we are not an authority")]
    NoAuthority,

    /// A value cannot be represented in the session.
    #[error("unserializable type: {0}")]
    UnserializableType(String),

    /// The attribute is not part of the configured schema.
    #[error("attribute '{0}' is not specified in global session configuration")]
    UnknownAttribute(String),

    /// The session has been revoked, or is an invalid placeholder.
    #[error("global session has been invalidated")]
    InvalidSession,

    /// The session expired.
    #[error("session expired at {expired_at}")]
    ExpiredSession { expired_at: DateTime<Utc> },

    /// The session carries a not-before claim in the future.
    #[error("session not valid before {not_before}")]
    PrematureSession { not_before: DateTime<Utc> },

    /// The cookie could not be decoded.
    #[error("(data[0..4]: '{excerpt}') - {message}")]
    MalformedCookie { excerpt: String, message: String },

    /// Untrusted authority or signature mismatch.
    #[error("{0}")]
    InvalidSignature(String),

    /// IO error (reading keys).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// How the request layer should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caused by untrustworthy client input; recovered locally.
    Client,
    /// Trust or signature failure; recovered like a client error.
    Security,
    /// Configuration or programmer mistake.
    Configuration,
    /// Anything else; never swallowed.
    Unexpected,
}

impl SessionError {
    /// Build a `MalformedCookie` error echoing the first few characters of `cookie`.
    pub fn malformed(cookie: &str, message: impl std::fmt::Display) -> Self {
        SessionError::MalformedCookie {
            excerpt: cookie.chars().take(5).collect(),
            message: message.to_string(),
        }
    }

    /// Build a configuration error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        SessionError::Configuration(ConfigError::Invalid(message.into()))
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            SessionError::InvalidSession
            | SessionError::ExpiredSession { .. }
            | SessionError::PrematureSession { .. }
            | SessionError::MalformedCookie { .. } => ErrorClass::Client,
            SessionError::InvalidSignature(_) => ErrorClass::Security,
            SessionError::Configuration(_)
            | SessionError::NoAuthority
            | SessionError::UnserializableType(_)
            | SessionError::UnknownAttribute(_) => ErrorClass::Configuration,
            SessionError::Io(_) | SessionError::Internal(_) => ErrorClass::Unexpected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_cookie_excerpt() {
        let err = SessionError::malformed("#$(%*#@%^&", "invalid base64");
        assert_eq!(err.to_string(), "(data[0..4]: '#$(%*') - invalid base64");
        assert_eq!(err.class(), ErrorClass::Client);
    }

    #[test]
    fn test_classes() {
        assert_eq!(SessionError::NoAuthority.class(), ErrorClass::Configuration);
        assert_eq!(
            SessionError::InvalidSignature("mismatch".into()).class(),
            ErrorClass::Security
        );
        assert_eq!(
            SessionError::Internal(anyhow::anyhow!("boom")).class(),
            ErrorClass::Unexpected
        );
        assert_eq!(SessionError::config("bad").class(), ErrorClass::Configuration);
    }
}
