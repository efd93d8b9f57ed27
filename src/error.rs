// src/error.rs
use thiserror::Error;

use crate::resolver::SolverError;

/// Core error types for hyperpkg
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying filesystem or mapping failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O failure described by a message
    #[error("I/O error: {0}")]
    IoError(String),

    /// A feed line could not be parsed
    #[error("Malformed feed {feed} at line {line}: {reason}")]
    MalformedFeed {
        feed: String,
        line: usize,
        reason: String,
    },

    /// A feed failed verification
    #[error("Feed rejected by verifier: {0}")]
    UntrustedFeed(String),

    /// A feed digest did not match its checksum file
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// A value inside an otherwise valid line could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// No database tables exist at the given path
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// A table file could not be memory-mapped
    #[error("Failed to map table {table}: {reason}")]
    MapError { table: String, reason: String },

    /// A table failed validation at open
    #[error("Corrupt table {table}: {reason}")]
    CorruptTable { table: String, reason: String },

    /// Mutation attempted on a read-only database
    #[error("Database was opened read-only")]
    ReadOnly,

    /// No package matches the given name, index or pattern
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// A name pattern or regular expression was rejected
    #[error("Invalid name pattern: {0}")]
    InvalidPattern(String),

    /// The solver could not satisfy a request
    #[error("Resolution failed: {0}")]
    Resolution(#[from] SolverError),

    /// A choice index outside the pending alternatives
    #[error("Choice {index} out of range ({count} alternatives)")]
    InvalidChoice { index: usize, count: usize },

    /// A choice was given while no choice was pending
    #[error("No choice is pending")]
    NoPendingChoice,

    /// The configuration file is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization or deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
