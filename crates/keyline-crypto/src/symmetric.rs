//! Symmetric encryption using `XChaCha20-Poly1305`.
//!
//! Used for chat messages (conversation key) and local transcripts (save
//! key). The 24-byte nonce is caller-provided random bytes; with `XChaCha20`
//! random nonces are safe for any realistic message count.
//!
//! Wire layout: `nonce (24) || ciphertext || tag (16)`.

use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{ct::constant_time_eq, error::CryptoError};

/// Symmetric key size.
pub const KEY_SIZE: usize = 32;

/// `XChaCha20` nonce size.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size.
const TAG_SIZE: usize = 16;

/// A 256-bit symmetric key.
///
/// # Security
///
/// Zeroized on drop. Equality is constant time. `Debug` never prints the key
/// bytes; use [`SymmetricKey::fingerprint`] to correlate keys in tests.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Wrap caller-supplied random bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// One-way fingerprint, safe to compare and display.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"keyline key fingerprint v1");
        hasher.update(self.0);
        hasher.finalize().into()
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl Eq for SymmetricKey {}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// Encrypt `plaintext` bound to `aad`.
pub fn encrypt(
    key: &SymmetricKey,
    plaintext: &[u8],
    aad: &[u8],
    nonce: [u8; NONCE_SIZE],
) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let Ok(ciphertext) =
        cipher.encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad })
    else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypt `nonce || ciphertext` produced by [`encrypt`] with the same `aad`.
///
/// # Errors
///
/// - `DecryptionFailed`: wrong key, wrong `aad`, tampered or truncated input
pub fn decrypt(key: &SymmetricKey, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    let (nonce, ciphertext) = data.split_at(NONCE_SIZE);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptionFailed)
}
