//! keyline cryptographic primitives.
//!
//! Pure functions with deterministic outputs. Callers provide random bytes so
//! that simulation tests are reproducible from a seed.
//!
//! # Key hierarchy
//!
//! ```text
//! IdentityKeyPair (per user)
//!   ├─ Ed25519 signing key ──────► certificate-login signatures
//!   └─ X25519 static secret ─────► opens sealed boxes addressed to the user
//!
//! Conversation key (per user pair, 32 random bytes)
//!   ├─ sealed to the peer ───────► first mailbox message (key wrap)
//!   └─ XChaCha20-Poly1305 ───────► every text message
//!
//! Save key (per owner and peer, 32 random bytes)
//!   ├─ sealed to the owner ──────► `<peer>.key` on disk
//!   └─ XChaCha20-Poly1305 ───────► `<peer>.chat` transcript
//! ```
//!
//! # Security
//!
//! - Sealed boxes use a fresh ephemeral X25519 key per seal. The symmetric key
//!   is derived with HKDF-SHA256 over the shared secret and both public keys,
//!   so a box cannot be replayed under a different recipient.
//! - Secret comparisons go through [`constant_time_eq`].
//! - Secret types zeroize on drop and redact themselves in `Debug`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod ct;
pub mod error;
pub mod identity;
pub mod password;
pub mod seal;
pub mod symmetric;

pub use ct::constant_time_eq;
pub use error::CryptoError;
pub use identity::{
    IDENTITY_SECRET_SIZE, IdentityKeyPair, PUBLIC_IDENTITY_SIZE, PublicIdentity, SIGNATURE_SIZE,
};
pub use password::{PASSWORD_HASH_SIZE, PasswordParams, SALT_SIZE, hash_password, verify_password};
pub use seal::{SEAL_RANDOM_SIZE, SEAL_OVERHEAD, open, seal, unwrap_key, wrap_key};
pub use symmetric::{KEY_SIZE, NONCE_SIZE, SymmetricKey, decrypt, encrypt};
