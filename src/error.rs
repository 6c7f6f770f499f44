//! Error types for Detour

use std::io;
use thiserror::Error;

/// Result type for Detour operations
pub type Result<T> = std::result::Result<T, DetourError>;

/// Errors that can occur in Detour
#[derive(Debug, Error)]
pub enum DetourError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A URL could not be parsed
    #[error("Invalid URL '{input}': {reason}")]
    InvalidUrl {
        /// Offending input
        input: String,
        /// Parser message
        reason: String,
    },

    /// A path does not follow the replay namespace convention
    #[error("Not a replay namespace path: {0}")]
    InvalidNamespace(String),

    /// Installing the interception layer failed
    #[error("Registration failed: {0}")]
    Registration(String),

    /// The replacement request to the backend failed
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    /// Request/response too large
    #[error("Data too large: {size} bytes exceeds limit of {limit} bytes")]
    DataTooLarge {
        /// Actual size
        size: usize,
        /// Size limit
        limit: usize,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl DetourError {
    pub(crate) fn invalid_url(input: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidUrl {
            input: input.to_string(),
            reason: reason.to_string(),
        }
    }
}
