//! Error types for pbs-query.
//!
//! This module defines custom error types using `thiserror` for structured
//! error handling throughout the application.

use thiserror::Error;

/// Main error type for pbs-query operations.
#[derive(Debug, Error)]
pub enum PbsError {
    /// Error communicating with the PBS API
    #[error("PBS API error: {0}")]
    Api(#[from] reqwest::Error),

    /// Error parsing a PBS API response
    #[error("Failed to parse PBS API response: {0}")]
    ParseError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias for PBS operations.
pub type Result<T> = std::result::Result<T, PbsError>;
