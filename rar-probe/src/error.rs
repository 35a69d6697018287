//! Error types for the rar-probe library.

use std::io;
use thiserror::Error;

/// The main error type for archive scanning operations.
///
/// Errors abandon the archive being scanned; the caller decides whether to
/// continue with the next one. Per-entry conditions (solid, directory,
/// unencrypted) are not errors and never surface here.
#[derive(Debug, Error)]
pub enum RarError {
    /// An I/O error occurred while reading the archive.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The input does not carry any recognized RAR signature.
    #[error("Not a RAR file")]
    NotArchive,

    /// The archive carries the pre-1.5 signature.
    #[error("too old RAR file version (pre 1.50), not supported")]
    OldVersion,

    /// The RAR5 crypt block declares an encryption version newer than we
    /// know how to describe.
    #[error("unsupported RAR5 encryption version {0}")]
    UnsupportedCryptVersion(u64),

    /// The declared PBKDF2 iteration exponent is out of range.
    #[error("PBKDF2 iteration count 2^{0} too large")]
    KdfCountTooLarge(u8),

    /// The archive declares 64-bit sizes this build cannot index.
    #[error("file contains 64-bit sizes but this build does not support them")]
    Unsupported64BitSizes,

    /// A variable-length integer ran past its maximum width.
    #[error("malformed variable-length integer")]
    MalformedVarint,

    /// The archive is corrupt or truncated.
    #[error("archive is corrupt or truncated: {0}")]
    Corrupt(String),
}

/// A specialized `Result` type for scanning operations.
pub type Result<T> = std::result::Result<T, RarError>;
