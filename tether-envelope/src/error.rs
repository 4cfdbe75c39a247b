//! Error types for sealed envelopes

use thiserror::Error;

/// Result type alias for envelope operations
pub type Result<T> = std::result::Result<T, EnvelopeError>;

/// Errors raised while sealing or opening envelopes
///
/// Structural problems are reported precisely because they are detected
/// before any key material is touched. Every cryptographic failure collapses
/// into [`EnvelopeError::Open`] so callers cannot learn why it failed.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Envelope is not valid base64url / JSON or misses a field
    #[error("malformed sealed input: {0}")]
    Malformed(String),

    /// Envelope version is not supported
    #[error("unsupported sealed input version: {0}")]
    UnsupportedVersion(u32),

    /// Algorithm id does not match the expected one
    #[error("sealed input algorithm mismatch")]
    AlgorithmMismatch,

    /// Envelope was sealed for a different key than the job declares
    #[error("sealed input key id mismatch")]
    KeyIdMismatch,

    /// No private key with this id is loaded
    #[error("no private key for key id {0}")]
    UnknownKey(String),

    /// Payload exceeds the sealing limit
    #[error("sealed input payload too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },

    /// Decryption or authentication failed
    #[error("sealed input could not be opened")]
    Open,

    /// Encryption failed
    #[error("failed to seal input")]
    Seal,

    /// A binding field is empty or contains the AAD separator
    #[error("invalid AAD field: {0}")]
    InvalidAad(String),

    /// Plaintext was decrypted but is not a JSON document
    #[error("sealed input is not valid JSON")]
    InvalidPayload,

    /// Key material could not be generated, parsed or encoded
    #[error("key error: {0}")]
    Key(String),

    /// Reading or writing a key file failed
    #[error("key file error: {0}")]
    Io(#[from] std::io::Error),
}
