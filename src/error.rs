//! Error types for tollgate

use std::io;

use thiserror::Error;

/// Result type alias for tollgate
pub type Result<T> = std::result::Result<T, Error>;

/// Tollgate errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid routing pattern in a service descriptor
    #[error("Invalid pattern for service {service}: {source}")]
    Pattern {
        /// Service name
        service: String,
        /// Underlying regex error
        #[source]
        source: regex::Error,
    },

    /// Backend certificate could not be loaded or parsed
    #[error("Certificate error for {path}: {reason}")]
    Certificate {
        /// Path to the offending certificate file
        path: String,
        /// What went wrong
        reason: String,
    },

    /// Authenticator could not produce a challenge
    #[error("Challenge error: {0}")]
    Challenge(String),

    /// Free-quota tracker failure
    #[error("Freebie DB error: {0}")]
    Freebie(String),

    /// Price lookup failure
    #[error("Price lookup error: {0}")]
    Price(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
