//! Error types for mediadup.
//!
//! Errors are split by layer: configuration, the metadata store, and the
//! computation pipeline. Each variant carries the path or key it concerns so
//! callers can report precisely which file or row failed.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for mediadup operations.
#[derive(Error, Debug)]
pub enum MediadupError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Metadata store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Hashing / fingerprinting errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration (includes unknown keys)
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Metadata store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying SQLite failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A path that is already tracked was inserted again
    #[error("Path is already tracked: {path}")]
    DuplicatePath { path: String },

    /// A record without a quick hash cannot be stored
    #[error("Record has no quick hash: {path}")]
    MissingQuickHash { path: String },

    /// A known-difference pair that cannot be stored
    #[error("Invalid known-difference pair ({first}, {second}): {reason}")]
    InvalidKnownDifference {
        first: String,
        second: String,
        reason: String,
    },

    /// Destructive reset attempted without an affirmative confirmation
    #[error("Reset was not confirmed; store left untouched")]
    ResetNotConfirmed,

    /// The store was created with a different hashing/fingerprint layout
    #[error("Store was created with {key} = {stored}, but configuration says {configured}")]
    ConfigMismatch {
        key: String,
        stored: String,
        configured: String,
    },

    /// A stored blob could not be decoded back into its typed array
    #[error("Malformed blob for {path}: {message}")]
    MalformedBlob { path: String, message: String },

    /// The `type` column holds a value outside the known kinds
    #[error("Unknown media kind {kind} for {path}")]
    UnknownKind { path: String, kind: i64 },

    /// Filesystem error while maintaining the signature cache
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-file computation errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Reading the file for hashing failed
    #[error("Hashing failed for {path}: {source}")]
    Hash {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Image or video frame decoding failed
    #[error("Decode error for {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// Probing video resolution/duration failed
    #[error("Probe error for {path}: {message}")]
    Probe { path: PathBuf, message: String },

    /// Writing or reading the frame side cache failed
    #[error("Frame cache error for {path}: {message}")]
    FrameCache { path: PathBuf, message: String },

    /// A worker task panicked or was aborted while processing `path`
    #[error("Worker failed on {path}: {message}")]
    Worker { path: PathBuf, message: String },
}

/// Convenience type alias for mediadup results.
pub type Result<T> = std::result::Result<T, MediadupError>;

/// Convenience type alias for store results.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Convenience type alias for pipeline-specific results.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
