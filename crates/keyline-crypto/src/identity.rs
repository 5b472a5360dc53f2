//! User identity keys.
//!
//! Each user holds one Ed25519 signing key and one X25519 static secret. The
//! public half of both is registered with the server as a 64-byte
//! [`PublicIdentity`] and serves as the user's "certificate".

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Serialized secret size: signing seed then X25519 secret.
pub const IDENTITY_SECRET_SIZE: usize = 64;

/// Serialized public identity size: verifying key then X25519 public key.
pub const PUBLIC_IDENTITY_SIZE: usize = 64;

/// Ed25519 signature size.
pub const SIGNATURE_SIZE: usize = 64;

/// A user's private identity.
///
/// # Security
///
/// Both halves zeroize on drop. `Debug` prints only the public identity.
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing: SigningKey,
    encryption: StaticSecret,
}

impl IdentityKeyPair {
    /// Build an identity from 64 bytes of caller-supplied entropy.
    ///
    /// The first 32 bytes seed the signing key, the last 32 become the
    /// X25519 secret. Callers MUST use a cryptographically secure source.
    pub fn from_secret_bytes(bytes: &[u8; IDENTITY_SECRET_SIZE]) -> Self {
        let (signing_seed, encryption_secret) = split_halves(bytes);

        Self {
            signing: SigningKey::from_bytes(&signing_seed),
            encryption: StaticSecret::from(encryption_secret),
        }
    }

    /// Serialize the secret halves. The caller owns persistence.
    pub fn to_secret_bytes(&self) -> Zeroizing<[u8; IDENTITY_SECRET_SIZE]> {
        let mut out = Zeroizing::new([0u8; IDENTITY_SECRET_SIZE]);
        out[..32].copy_from_slice(self.signing.as_bytes());
        out[32..].copy_from_slice(self.encryption.as_bytes());
        out
    }

    /// Public half, as registered with the server.
    pub fn public(&self) -> PublicIdentity {
        PublicIdentity {
            verifying: self.signing.verifying_key(),
            encryption: X25519PublicKey::from(&self.encryption),
        }
    }

    /// Sign `message` (a challenge nonce).
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing.sign(message).to_bytes()
    }

    pub(crate) fn encryption_secret(&self) -> &StaticSecret {
        &self.encryption
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public())
            .finish_non_exhaustive()
    }
}

/// A user's public identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicIdentity {
    verifying: VerifyingKey,
    encryption: X25519PublicKey,
}

impl PublicIdentity {
    /// Parse a 64-byte serialized identity.
    ///
    /// Rejects wrong lengths, invalid curve points and weak (small-order)
    /// verifying keys.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: &[u8; PUBLIC_IDENTITY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKey {
                reason: format!(
                    "public identity must be {PUBLIC_IDENTITY_SIZE} bytes, got {}",
                    bytes.len()
                ),
            })?;
        let (verifying, encryption) = split_halves(bytes);

        let verifying = VerifyingKey::from_bytes(&verifying)
            .map_err(|e| CryptoError::InvalidKey { reason: e.to_string() })?;
        if verifying.is_weak() {
            return Err(CryptoError::InvalidKey { reason: "weak verifying key".to_string() });
        }

        Ok(Self { verifying, encryption: X25519PublicKey::from(encryption) })
    }

    /// Serialize as `verifying_key || x25519_public_key`.
    pub fn to_bytes(&self) -> [u8; PUBLIC_IDENTITY_SIZE] {
        let mut out = [0u8; PUBLIC_IDENTITY_SIZE];
        out[..32].copy_from_slice(self.verifying.as_bytes());
        out[32..].copy_from_slice(self.encryption.as_bytes());
        out
    }

    /// Verify a signature over exactly `message`.
    ///
    /// Uses strict verification, rejecting malleable and small-order
    /// signatures.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let signature = Signature::from_slice(signature).map_err(|_| CryptoError::BadSignature)?;
        self.verifying
            .verify_strict(message, &signature)
            .map_err(|_| CryptoError::BadSignature)
    }

    pub(crate) fn encryption_key(&self) -> &X25519PublicKey {
        &self.encryption
    }
}

fn split_halves(bytes: &[u8; 64]) -> ([u8; 32], [u8; 32]) {
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&bytes[..32]);
    second.copy_from_slice(&bytes[32..]);
    (first, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(seed: u8) -> IdentityKeyPair {
        IdentityKeyPair::from_secret_bytes(&[seed; IDENTITY_SECRET_SIZE])
    }

    #[test]
    fn signature_verifies_over_exact_bytes() {
        let alice = identity(1);
        let nonce = [0x42; 32];
        let signature = alice.sign(&nonce);

        assert!(alice.public().verify(&nonce, &signature).is_ok());

        let mut tampered = nonce;
        tampered[0] ^= 1;
        assert_eq!(alice.public().verify(&tampered, &signature), Err(CryptoError::BadSignature));
    }

    #[test]
    fn signature_from_other_key_rejected() {
        let alice = identity(1);
        let mallory = identity(2);
        let signature = mallory.sign(b"nonce");

        assert_eq!(alice.public().verify(b"nonce", &signature), Err(CryptoError::BadSignature));
    }

    #[test]
    fn short_signature_rejected() {
        assert_eq!(identity(1).public().verify(b"nonce", &[0; 10]), Err(CryptoError::BadSignature));
    }

    #[test]
    fn public_identity_round_trips() {
        let public = identity(3).public();
        assert_eq!(PublicIdentity::from_bytes(&public.to_bytes()).unwrap(), public);
    }

    #[test]
    fn secret_bytes_round_trip() {
        let original = identity(4);
        let restored = IdentityKeyPair::from_secret_bytes(&original.to_secret_bytes());
        assert_eq!(restored.public(), original.public());
    }

    #[test]
    fn wrong_length_identity_rejected() {
        assert!(matches!(
            PublicIdentity::from_bytes(&[0; 63]),
            Err(CryptoError::InvalidKey { .. })
        ));
    }

    #[test]
    fn debug_does_not_print_secrets() {
        let alice = identity(9);
        let rendered = format!("{alice:?}");
        assert!(rendered.contains("public"));
        assert!(!rendered.contains("signing"));
    }
}
