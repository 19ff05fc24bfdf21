use std::io;
use thiserror::Error;

/// Result type for package operations
pub type Result<T> = std::result::Result<T, PackError>;

/// Unified error type for all package operations
#[derive(Debug, Error)]
pub enum PackError {
    // Lifecycle errors
    #[error("Archive already opened")]
    AlreadyOpened,

    #[error("Archive not opened")]
    NotOpened,

    #[error("Archive already closed")]
    AlreadyClosed,

    #[error("Archive is read-only")]
    ReadOnly,

    // Structural errors detected at mount
    #[error("Invalid archive header")]
    HeaderInvalid,

    #[error("Invalid block table")]
    BlockTableInvalid,

    #[error("Invalid file name list")]
    FileListInvalid,

    // Path lookup errors
    #[error("File not found in archive: {0}")]
    FileNotFound(String),

    #[error("File already exists in archive: {0}")]
    FileAlreadyExists(String),

    // Block read errors
    #[error("Block deleted or never written")]
    BlockDisposed,

    #[error("Invalid block offset: {actual}, expected {expected}")]
    BlockOffsetError { actual: i64, expected: i64 },

    #[error("Block data out of bounds: {actual}, expected {expected}")]
    StreamDataError { actual: i64, expected: i64 },

    #[error("Decoded length mismatch: {actual}, expected {expected}")]
    StreamDataLengthMismatch { actual: i64, expected: i64 },

    #[error("Block data too large: {0} bytes")]
    BlockDataTooLarge(i64),

    // Codec errors
    #[error("Invalid compression method: {0}")]
    InvalidCompression(i64),

    #[error("Invalid encryption method: {0}")]
    InvalidEncryption(i64),

    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    // Internal faults
    #[error("Application fault: {0}")]
    ApplicationFault(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
