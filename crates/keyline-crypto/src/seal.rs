//! Sealed boxes: anonymous public-key encryption to a [`PublicIdentity`].
//!
//! Used to wrap conversation keys for a peer, to wrap a user's own save keys
//! for local storage, and for the server's registration welcome.
//!
//! # Construction
//!
//! ```text
//! e      = X25519 secret from caller randomness
//! shared = X25519(e, recipient)
//! key    = HKDF-SHA256(ikm = shared, info = LABEL || E || R)
//! box    = E || XChaCha20-Poly1305(key, nonce, msg, aad = E || R)
//! ```
//!
//! `E` and `R` are the ephemeral and recipient public keys. Binding both into
//! the key and the AEAD prevents re-targeting a box at another recipient.
//! A non-contributory shared secret (small-order point) is rejected on both
//! sides.

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::{
    error::CryptoError,
    identity::{IdentityKeyPair, PublicIdentity},
    symmetric::{self, KEY_SIZE, NONCE_SIZE, SymmetricKey},
};

/// Random bytes consumed by one seal: ephemeral secret then nonce.
pub const SEAL_RANDOM_SIZE: usize = 32 + NONCE_SIZE;

/// Bytes a sealed box adds to its plaintext.
pub const SEAL_OVERHEAD: usize = 32 + NONCE_SIZE + 16;

const SEAL_LABEL: &[u8] = b"keyline sealed box v1";

/// Seal `plaintext` to `recipient`.
///
/// # Errors
///
/// - `InvalidKey`: recipient encryption key is a small-order point
pub fn seal(
    recipient: &PublicIdentity,
    plaintext: &[u8],
    random: [u8; SEAL_RANDOM_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let mut ephemeral_bytes = [0u8; 32];
    ephemeral_bytes.copy_from_slice(&random[..32]);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&random[32..]);

    let ephemeral = StaticSecret::from(ephemeral_bytes);
    let ephemeral_public = X25519PublicKey::from(&ephemeral);
    let recipient_key = recipient.encryption_key();

    let shared = ephemeral.diffie_hellman(recipient_key);
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey {
            reason: "recipient encryption key has small order".to_string(),
        });
    }

    let aad = binding(&ephemeral_public, recipient_key);
    let key = derive_box_key(shared.as_bytes(), &aad);

    let mut out = Vec::with_capacity(SEAL_OVERHEAD + plaintext.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&symmetric::encrypt(&key, plaintext, &aad, nonce));
    Ok(out)
}

/// Open a box sealed to `identity`.
///
/// # Errors
///
/// - `OpenFailed`: truncated, tampered, or sealed to someone else
pub fn open(identity: &IdentityKeyPair, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CryptoError::OpenFailed);
    }
    let (ephemeral_bytes, body) = sealed.split_at(32);
    let mut ephemeral = [0u8; 32];
    ephemeral.copy_from_slice(ephemeral_bytes);
    let ephemeral_public = X25519PublicKey::from(ephemeral);

    let shared = identity.encryption_secret().diffie_hellman(&ephemeral_public);
    if !shared.was_contributory() {
        return Err(CryptoError::OpenFailed);
    }

    let public = identity.public();
    let aad = binding(&ephemeral_public, public.encryption_key());
    let key = derive_box_key(shared.as_bytes(), &aad);

    symmetric::decrypt(&key, body, &aad)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::OpenFailed)
}

/// Seal a symmetric key to `recipient`.
pub fn wrap_key(
    recipient: &PublicIdentity,
    key: &SymmetricKey,
    random: [u8; SEAL_RANDOM_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    seal(recipient, key.as_bytes(), random)
}

/// Recover a symmetric key sealed with [`wrap_key`].
///
/// A box that opens but does not hold exactly one key is treated as a failed
/// open, never as a shorter or longer key.
pub fn unwrap_key(identity: &IdentityKeyPair, wrapped: &[u8]) -> Result<SymmetricKey, CryptoError> {
    let plaintext = open(identity, wrapped)?;
    let bytes: [u8; KEY_SIZE] =
        plaintext.as_slice().try_into().map_err(|_| CryptoError::OpenFailed)?;
    Ok(SymmetricKey::from_bytes(bytes))
}

fn binding(ephemeral: &X25519PublicKey, recipient: &X25519PublicKey) -> [u8; 64] {
    let mut out = [0u8; 64];
    out[..32].copy_from_slice(ephemeral.as_bytes());
    out[32..].copy_from_slice(recipient.as_bytes());
    out
}

fn derive_box_key(shared: &[u8; 32], binding: &[u8; 64]) -> SymmetricKey {
    let hkdf = Hkdf::<Sha256>::new(None, shared);

    let mut info = Vec::with_capacity(SEAL_LABEL.len() + binding.len());
    info.extend_from_slice(SEAL_LABEL);
    info.extend_from_slice(binding);

    let mut okm = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(&info, &mut okm) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    SymmetricKey::from_bytes(okm)
}
