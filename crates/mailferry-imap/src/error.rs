//! Error types for the IMAP layer.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Server certificate was rejected during verification.
    ///
    /// Never retried: reconnecting would only fail the same way.
    #[error("TLS certificate verification failed: {0}")]
    TlsVerify(String),

    /// Malformed IMAP URI.
    #[error("Invalid IMAP URI: {0}")]
    InvalidUri(String),

    /// Protocol parsing error.
    #[error("Protocol error at position {position}: {message}")]
    Parse {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Every advertised authentication method was refused.
    #[error("Authentication failed (tried {}): {message}", methods.join(", "))]
    Auth {
        /// Methods attempted, in order.
        methods: Vec<String>,
        /// Text of the last refusal.
        message: String,
    },

    /// Server returned NO for a command.
    #[error("Server returned NO: {0}")]
    No(String),

    /// Server returned BAD for a command.
    #[error("Server returned BAD: {0}")]
    Bad(String),

    /// Server sent BYE (disconnecting).
    #[error("Server sent BYE: {0}")]
    Bye(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// An operation was issued before `connect`.
    #[error("Not connected")]
    NotConnected,

    /// An operation was issued before authentication.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The mailbox does not exist on the server.
    #[error("Mailbox not found: {0}")]
    MailboxNotFound(String),

    /// Operation on a mailbox handle that is no longer open.
    #[error("Mailbox is closed: {0}")]
    MailboxClosed(String),

    /// No pooled session became available in time.
    #[error("No session available within {0:?}")]
    PoolTimeout(Duration),

    /// Protocol violation or unexpected data.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// True for errors that warrant dropping the socket and reconnecting.
    #[must_use]
    pub fn needs_reconnect(&self) -> bool {
        match self {
            Self::Io(_) | Self::Bye(_) | Self::Timeout(_) => true,
            Self::Tls(e) => !is_certificate_error(e),
            _ => false,
        }
    }

    /// True for transient server errors that may be retried on the same
    /// connection (NO, BAD, short parse failures).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::No(_) | Self::Bad(_) | Self::Parse { .. })
    }

    /// True when no retry policy applies at all.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::TlsVerify(_)
            | Self::Auth { .. }
            | Self::InvalidUri(_)
            | Self::NotConnected
            | Self::NotAuthenticated
            | Self::MailboxClosed(_) => true,
            Self::Tls(e) => is_certificate_error(e),
            _ => false,
        }
    }
}

/// Certificate chain rejections surface as `rustls::Error` variants that
/// must never be retried.
fn is_certificate_error(e: &rustls::Error) -> bool {
    matches!(
        e,
        rustls::Error::InvalidCertificate(_) | rustls::Error::InvalidCertRevocationList(_)
    )
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_reconnect() {
        let err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(err.needs_reconnect());
        assert!(!err.is_fatal());
    }

    #[test]
    fn no_and_bad_are_transient() {
        assert!(Error::No("try later".into()).is_transient());
        assert!(Error::Bad("syntax".into()).is_transient());
        assert!(!Error::No("try later".into()).needs_reconnect());
    }

    #[test]
    fn certificate_rejection_is_fatal() {
        let err = Error::Tls(rustls::Error::InvalidCertificate(
            rustls::CertificateError::UnknownIssuer,
        ));
        assert!(err.is_fatal());
        assert!(!err.needs_reconnect());
    }

    #[test]
    fn auth_error_names_methods() {
        let err = Error::Auth {
            methods: vec!["PLAIN".into(), "LOGIN".into(), "CRAM-MD5".into()],
            message: "credentials rejected".into(),
        };
        let text = err.to_string();
        assert!(text.contains("PLAIN"));
        assert!(text.contains("LOGIN"));
        assert!(text.contains("CRAM-MD5"));
        assert!(err.is_fatal());
    }
}
