//! Error types for the keyline core state machines.

use thiserror::Error;

/// Username validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsernameError {
    /// Empty username
    #[error("username is empty")]
    Empty,

    /// Longer than [`crate::MAX_USERNAME_LEN`] bytes
    #[error("username exceeds {max} bytes")]
    TooLong {
        /// Maximum length
        max: usize,
    },

    /// Contains a character outside `[A-Za-z0-9_.-]`
    #[error("username contains invalid character {0:?}")]
    InvalidCharacter(char),

    /// Starts with `.`, which would alias hidden or parent paths on disk
    #[error("username must not start with '.'")]
    LeadingDot,
}

/// Certificate-login challenge failures.
///
/// Deliberately coarse: a late signature and a signature for a user who never
/// requested a challenge look the same to the caller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeError {
    /// No pending challenge, or it outlived its lifetime
    #[error("no pending challenge or challenge expired")]
    Expired,
}

/// Session token validation failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// Token missing, malformed, or not the user's current token
    #[error("session token invalid")]
    TokenInvalid,

    /// Token matches but the session window has passed
    #[error("session token expired")]
    TokenExpired,

    /// Token matches but the account is blocked
    #[error("user blocked")]
    UserBlocked,
}
