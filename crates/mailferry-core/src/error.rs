//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// IMAP operation failed.
    #[error("IMAP error: {0}")]
    Imap(#[from] mailferry_imap::Error),

    /// Catalog database operation failed.
    #[error("Catalog error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration problem; fatal before any work starts.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid exclusion pattern.
    #[error("Bad exclusion pattern {pattern:?}: {message}")]
    Pattern {
        /// The offending pattern.
        pattern: String,
        /// Compiler message.
        message: String,
    },
}

impl Error {
    /// True when the underlying failure is scoped to a single message and
    /// the copy loop should count it and continue.
    #[must_use]
    pub const fn is_single_message(&self) -> bool {
        matches!(
            self,
            Self::Imap(mailferry_imap::Error::No(_) | mailferry_imap::Error::Bad(_))
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
