//! Error types for CaskDB
//!
//! Provides a unified error type for all store operations.

use thiserror::Error;

/// Result type alias using CaskError
pub type Result<T> = std::result::Result<T, CaskError>;

/// Unified error type for CaskDB operations
#[derive(Debug, Error)]
pub enum CaskError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    KeyNotFound,

    #[error("Invalid range: start key sorts after end key")]
    InvalidRange,

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    /// The bytes at a known location no longer match their stored checksum.
    #[error("Checksum mismatch in segment {segment_id} at offset {offset}")]
    ChecksumMismatch { segment_id: u32, offset: u64 },

    /// A record header or length is structurally impossible.
    #[error("Corrupt record: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Validation Errors (raised at staging time, never reach disk)
    // -------------------------------------------------------------------------
    #[error("Key must not be empty")]
    EmptyKey,

    #[error("Key too large: {size} bytes (max {max})")]
    KeyTooLarge { size: usize, max: u32 },

    #[error("Value too large: {size} bytes (max {max})")]
    ValueTooLarge { size: usize, max: u64 },

    // -------------------------------------------------------------------------
    // Store State Errors
    // -------------------------------------------------------------------------
    #[error("Database is opened read-only")]
    DatabaseReadonly,

    #[error("Database is locked by another process")]
    DatabaseLocked,

    #[error("Merge already in progress")]
    MergeInProgress,

    /// Internal rotation signal from the active segment. The store catches it
    /// and rotates; public operations never return it.
    #[error("Segment full")]
    SegmentFull,

    // -------------------------------------------------------------------------
    // Sidecar / Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Bad config file: {0}")]
    BadConfig(String),

    #[error("Bad metadata file: {0}")]
    BadMetadata(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for CaskError {
    fn from(e: bincode::Error) -> Self {
        CaskError::Serialization(e.to_string())
    }
}
