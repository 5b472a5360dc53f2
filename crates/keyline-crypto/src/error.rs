//! Crypto error types.

use thiserror::Error;

/// Errors from cryptographic operations.
///
/// Decryption and verification failures carry no detail beyond the variant.
/// Anything more would help an attacker probing with forged inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key bytes have the wrong length or are not a valid point.
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// What was wrong
        reason: String,
    },

    /// Signature has the wrong length or does not verify.
    #[error("signature verification failed")]
    BadSignature,

    /// Sealed box could not be opened: wrong recipient, tampered, or
    /// truncated.
    #[error("sealed box could not be opened")]
    OpenFailed,

    /// AEAD authentication failed.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Password hashing parameters were rejected.
    #[error("invalid password hashing parameters: {reason}")]
    InvalidParams {
        /// What was wrong
        reason: String,
    },
}
