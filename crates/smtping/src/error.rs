//! Error types for SMTP operations.

use std::io;
use std::time::Duration;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Connection could not be established (dial failure or bad greeting).
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Server returned an unexpected reply code.
    #[error("SMTP error {code}: {message}")]
    SmtpError {
        /// Reply code (e.g., 550).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Protocol error (malformed or unexpected data).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Authentication mechanism rejected the exchange.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Server challenge was not valid base64.
    #[error("Invalid base64 challenge: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Invalid state for operation.
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp_error(code: u16, message: impl Into<String>) -> Self {
        Self::SmtpError {
            code,
            message: message.into(),
        }
    }

    /// Returns the server reply code carried by this error, if any.
    #[must_use]
    pub const fn reply_code(&self) -> Option<u16> {
        match self {
            Self::SmtpError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 500 && *code < 600)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 400 && *code < 500)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_smtp_error_display() {
        let err = Error::smtp_error(550, "No such user");
        assert_eq!(err.to_string(), "SMTP error 550: No such user");
        assert_eq!(err.reply_code(), Some(550));
    }

    #[test]
    fn test_classification() {
        assert!(Error::smtp_error(554, "rejected").is_permanent());
        assert!(Error::smtp_error(451, "try later").is_transient());
        assert!(!Error::Protocol("bad".into()).is_permanent());
        assert_eq!(Error::Protocol("bad".into()).reply_code(), None);
    }
}
