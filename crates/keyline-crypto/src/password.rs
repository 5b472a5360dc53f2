//! Password hashing with Argon2id.
//!
//! The work factor is explicit in [`PasswordParams`] so operators can tune it
//! and tests can drop it to the minimum. Changing parameters invalidates
//! every stored hash; they are not recorded alongside the hash.

use argon2::{Algorithm, Argon2, Params, Version};

use crate::{ct::constant_time_eq, error::CryptoError};

/// Salt size in bytes.
pub const SALT_SIZE: usize = 16;

/// Derived hash size in bytes.
pub const PASSWORD_HASH_SIZE: usize = 32;

/// Argon2id work factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism (lanes)
    pub parallelism: u32,
}

impl Default for PasswordParams {
    fn default() -> Self {
        Self { memory_kib: 32 * 1024, iterations: 3, parallelism: 4 }
    }
}

impl PasswordParams {
    /// Smallest parameters Argon2 accepts. Only for tests.
    pub const fn minimal() -> Self {
        Self { memory_kib: 8, iterations: 1, parallelism: 1 }
    }

    fn argon2(self) -> Result<Argon2<'static>, CryptoError> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(PASSWORD_HASH_SIZE),
        )
        .map_err(|e| CryptoError::InvalidParams { reason: e.to_string() })?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Derive the password hash for `password` under `salt`.
pub fn hash_password(
    password: &[u8],
    salt: &[u8; SALT_SIZE],
    params: PasswordParams,
) -> Result<[u8; PASSWORD_HASH_SIZE], CryptoError> {
    let mut output = [0u8; PASSWORD_HASH_SIZE];
    params
        .argon2()?
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| CryptoError::InvalidParams { reason: e.to_string() })?;
    Ok(output)
}

/// Recompute the hash and compare it in constant time with `expected`.
pub fn verify_password(
    password: &[u8],
    salt: &[u8; SALT_SIZE],
    expected: &[u8],
    params: PasswordParams,
) -> Result<bool, CryptoError> {
    let computed = hash_password(password, salt, params)?;
    Ok(constant_time_eq(&computed, expected))
}
