//! Argon2 work split out of request handling.
//!
//! Hashing is the only expensive step of authentication. The driver never
//! runs it: register and login requests come back as a [`PasswordJob`], the
//! runtime runs the job without holding the driver, and feeds the
//! [`HashedPassword`] back in a follow-up event. Everything that reads or
//! writes the credential store happens on either side of the hash, under the
//! driver's lock.

use keyline_crypto::{CryptoError, PASSWORD_HASH_SIZE, PasswordParams, SALT_SIZE, hash_password};

/// What the hash is for, carried through the job untouched.
#[derive(Clone)]
pub(crate) enum PasswordWork {
    /// New account: the hash becomes the stored credential
    Register { username: String, public_key: Vec<u8>, salt: [u8; SALT_SIZE] },
    /// Known account: the hash is compared against the stored one
    Login { username: String, salt: [u8; SALT_SIZE], expected: [u8; PASSWORD_HASH_SIZE] },
    /// Unknown account: hashed under a dummy salt and always rejected
    UnknownUser { username: String, salt: [u8; SALT_SIZE] },
}

impl PasswordWork {
    pub(crate) fn username(&self) -> &str {
        match self {
            Self::Register { username, .. }
            | Self::Login { username, .. }
            | Self::UnknownUser { username, .. } => username,
        }
    }

    /// Request name this work belongs to.
    pub(crate) fn operation(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Login { .. } | Self::UnknownUser { .. } => "login",
        }
    }

    fn salt(&self) -> &[u8; SALT_SIZE] {
        match self {
            Self::Register { salt, .. }
            | Self::Login { salt, .. }
            | Self::UnknownUser { salt, .. } => salt,
        }
    }
}

/// Argon2 work for one register or login request.
///
/// Built by the authenticator, run by whoever executes the driver's actions.
/// CPU-bound: an async runtime should run it on a blocking thread.
#[derive(Clone)]
pub struct PasswordJob {
    password: String,
    params: PasswordParams,
    work: PasswordWork,
}

impl PasswordJob {
    pub(crate) fn new(password: &str, params: PasswordParams, work: PasswordWork) -> Self {
        Self { password: password.to_string(), params, work }
    }

    /// Account the job is for.
    pub fn username(&self) -> &str {
        self.work.username()
    }

    /// Derive the hash. The password is dropped with the job.
    pub fn run(self) -> HashedPassword {
        let derived = hash_password(self.password.as_bytes(), self.work.salt(), self.params);
        HashedPassword { work: self.work, derived }
    }
}

impl std::fmt::Debug for PasswordJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordJob")
            .field("operation", &self.work.operation())
            .field("username", &self.work.username())
            .finish_non_exhaustive()
    }
}

/// Output of [`PasswordJob::run`], handed back to the driver.
#[derive(Clone)]
pub struct HashedPassword {
    pub(crate) work: PasswordWork,
    pub(crate) derived: Result<[u8; PASSWORD_HASH_SIZE], CryptoError>,
}

impl HashedPassword {
    /// Account the hash was computed for.
    pub fn username(&self) -> &str {
        self.work.username()
    }
}

impl std::fmt::Debug for HashedPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashedPassword")
            .field("operation", &self.work.operation())
            .field("username", &self.work.username())
            .field("derived", &self.derived.is_ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_password() {
        let job = PasswordJob::new(
            "correct horse",
            PasswordParams::minimal(),
            PasswordWork::UnknownUser { username: "ghost".to_string(), salt: [0; SALT_SIZE] },
        );
        let rendered = format!("{job:?}");
        assert!(rendered.contains("ghost"));
        assert!(!rendered.contains("horse"));

        let hashed = job.run();
        assert!(hashed.derived.is_ok());
        assert!(!format!("{hashed:?}").contains("horse"));
    }

    #[test]
    fn same_password_and_salt_derive_the_same_hash() {
        let work = |username: &str| PasswordWork::Register {
            username: username.to_string(),
            public_key: Vec::new(),
            salt: [3; SALT_SIZE],
        };
        let a = PasswordJob::new("pw", PasswordParams::minimal(), work("a")).run();
        let b = PasswordJob::new("pw", PasswordParams::minimal(), work("b")).run();
        assert_eq!(a.derived, b.derived);
    }
}
