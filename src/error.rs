//! Error types for stampede
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for stampede operations
///
/// This enum encompasses all possible errors that can occur while loading
/// a traffic script, opening the HTTP/2 session, or writing statistics
/// artifacts. Per-request failures are not errors in this sense: they are
/// recorded into statistics and never abort the run.
#[derive(Error, Debug)]
pub enum StampedeError {
    /// Traffic script errors (missing fields, schema violations, reserved
    /// names, duplicated identifiers)
    #[error("Script error: {0}")]
    Script(String),

    /// JSON document access errors (wrong type or missing path)
    #[error("JSON error: {0}")]
    Json(String),

    /// Connection establishment errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Statistics artifact errors
    #[error("Stats error: {0}")]
    Stats(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for stampede operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
