//! Session tokens and their validation.
//!
//! A token is 32 random bytes issued on every successful login. It is an
//! opaque bearer credential: the server compares it in constant time against
//! the single token stored on the user record, then checks the block flag and
//! the session window.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{error::SessionError, user::UserRecord};

/// Token size in bytes.
pub const SESSION_TOKEN_SIZE: usize = 32;

/// Default session window measured from last-seen.
pub const DEFAULT_SESSION_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Opaque bearer credential.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct SessionToken([u8; SESSION_TOKEN_SIZE]);

impl SessionToken {
    /// Wrap caller-supplied random bytes.
    pub fn from_bytes(bytes: [u8; SESSION_TOKEN_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a token received over the wire. `None` on wrong length.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Raw bytes for the `authorization` header.
    pub fn as_bytes(&self) -> &[u8; SESSION_TOKEN_SIZE] {
        &self.0
    }

    /// Constant-time comparison against presented bytes.
    pub fn matches(&self, presented: &[u8]) -> bool {
        self.0.as_slice().ct_eq(presented).into()
    }
}

impl PartialEq for SessionToken {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.0)
    }
}

impl Eq for SessionToken {}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// Check a presented token against a user record.
///
/// Order matters: a token that does not match yields `TokenInvalid` before
/// anything about the account (blocked, last activity) is revealed.
///
/// The window is fixed from last-seen, which only advances on login; a token
/// is expired once more than `lifetime` has passed.
pub fn validate_session(
    record: &UserRecord,
    presented: &[u8],
    now_secs: u64,
    lifetime: Duration,
) -> Result<(), SessionError> {
    let Some(token) = &record.token else {
        return Err(SessionError::TokenInvalid);
    };
    if !token.matches(presented) {
        return Err(SessionError::TokenInvalid);
    }
    if record.blocked {
        return Err(SessionError::UserBlocked);
    }
    if now_secs.saturating_sub(record.last_seen) > lifetime.as_secs() {
        return Err(SessionError::TokenExpired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use keyline_proto::Role;

    use super::*;

    fn record_with_token(token: [u8; 32], last_seen: u64) -> UserRecord {
        let mut record = UserRecord::new("alice", [0; 16], [0; 32], vec![], Role::User);
        record.start_session(SessionToken::from_bytes(token), last_seen);
        record
    }

    #[test]
    fn current_token_within_window_is_valid() {
        let record = record_with_token([1; 32], 1_000);
        assert_eq!(
            validate_session(&record, &[1; 32], 1_000 + 3_600, DEFAULT_SESSION_LIFETIME),
            Ok(())
        );
    }

    #[test]
    fn token_expires_after_window() {
        let record = record_with_token([1; 32], 1_000);
        assert_eq!(
            validate_session(&record, &[1; 32], 1_000 + 3_601, DEFAULT_SESSION_LIFETIME),
            Err(SessionError::TokenExpired)
        );
    }

    #[test]
    fn wrong_token_is_invalid_even_when_expired() {
        let record = record_with_token([1; 32], 0);
        assert_eq!(
            validate_session(&record, &[2; 32], 1_000_000, DEFAULT_SESSION_LIFETIME),
            Err(SessionError::TokenInvalid)
        );
    }

    #[test]
    fn truncated_token_is_invalid() {
        let record = record_with_token([1; 32], 0);
        assert_eq!(
            validate_session(&record, &[1; 31], 0, DEFAULT_SESSION_LIFETIME),
            Err(SessionError::TokenInvalid)
        );
    }

    #[test]
    fn user_without_session_rejects_everything() {
        let record = UserRecord::new("alice", [0; 16], [0; 32], vec![], Role::User);
        assert_eq!(
            validate_session(&record, &[0; 32], 0, DEFAULT_SESSION_LIFETIME),
            Err(SessionError::TokenInvalid)
        );
    }

    #[test]
    fn blocked_user_with_valid_token() {
        let mut record = record_with_token([1; 32], 0);
        record.blocked = true;
        assert_eq!(
            validate_session(&record, &[1; 32], 0, DEFAULT_SESSION_LIFETIME),
            Err(SessionError::UserBlocked)
        );
    }

    #[test]
    fn from_slice_checks_length() {
        assert!(SessionToken::from_slice(&[0; 32]).is_some());
        assert!(SessionToken::from_slice(&[0; 16]).is_none());
    }
}
