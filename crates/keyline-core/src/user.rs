//! User records as held by the credential store.

use keyline_proto::Role;
use serde::{Deserialize, Serialize};

use crate::{error::UsernameError, session::SessionToken};

/// Maximum username length in bytes.
pub const MAX_USERNAME_LEN: usize = 32;

/// Validate a username.
///
/// Accepted names are 1 to [`MAX_USERNAME_LEN`] characters from
/// `[A-Za-z0-9_.-]`, not starting with `.`. Names double as path components
/// for local transcripts, so anything that could escape a directory is
/// refused here rather than at every use site.
pub fn validate_username(name: &str) -> Result<(), UsernameError> {
    if name.is_empty() {
        return Err(UsernameError::Empty);
    }
    if name.len() > MAX_USERNAME_LEN {
        return Err(UsernameError::TooLong { max: MAX_USERNAME_LEN });
    }
    let allowed = |c: &char| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-');
    if let Some(c) = name.chars().find(|c| !allowed(c)) {
        return Err(UsernameError::InvalidCharacter(c));
    }
    if name.starts_with('.') {
        return Err(UsernameError::LeadingDot);
    }
    Ok(())
}

/// Stored state for one account.
///
/// # Invariants
///
/// - `token` is single-valued: issuing a new one replaces the previous,
///   which implicitly ends any older session.
/// - `last_seen` is the wall-clock second of the most recent successful login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Unique account name
    pub username: String,
    /// Random per-user salt
    pub salt: [u8; 16],
    /// Argon2id output
    pub password_hash: [u8; 32],
    /// Serialized public identity
    pub public_key: Vec<u8>,
    /// Current session token, if the user has ever logged in
    pub token: Option<SessionToken>,
    /// Wall-clock seconds of the last successful login
    pub last_seen: u64,
    /// Set by an administrator
    pub blocked: bool,
    /// Account role
    pub role: Role,
}

impl UserRecord {
    /// New account with no session.
    pub fn new(
        username: impl Into<String>,
        salt: [u8; 16],
        password_hash: [u8; 32],
        public_key: Vec<u8>,
        role: Role,
    ) -> Self {
        Self {
            username: username.into(),
            salt,
            password_hash,
            public_key,
            token: None,
            last_seen: 0,
            blocked: false,
            role,
        }
    }

    /// Replace the session token and stamp last-seen.
    pub fn start_session(&mut self, token: SessionToken, now_secs: u64) {
        self.token = Some(token);
        self.last_seen = now_secs;
    }

    /// Whether this account may administer others.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl std::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRecord")
            .field("username", &self.username)
            .field("has_token", &self.token.is_some())
            .field("last_seen", &self.last_seen)
            .field("blocked", &self.blocked)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        for name in ["alice", "bob_2", "carol.d", "dave-e", "X"] {
            assert_eq!(validate_username(name), Ok(()), "{name}");
        }
    }

    #[test]
    fn rejects_reserved_characters() {
        for (name, bad) in [("a@b", '@'), ("a&b", '&'), ("a?b", '?'), ("a=b", '='), ("a/b", '/'),
            ("a:b", ':'), ("a;b", ';'), ("a b", ' ')]
        {
            assert_eq!(validate_username(name), Err(UsernameError::InvalidCharacter(bad)));
        }
    }

    #[test]
    fn rejects_path_tricks_and_bounds() {
        assert_eq!(validate_username(""), Err(UsernameError::Empty));
        assert_eq!(validate_username(".."), Err(UsernameError::LeadingDot));
        assert_eq!(validate_username(".hidden"), Err(UsernameError::LeadingDot));
        assert_eq!(
            validate_username(&"a".repeat(MAX_USERNAME_LEN + 1)),
            Err(UsernameError::TooLong { max: MAX_USERNAME_LEN })
        );
    }

    #[test]
    fn new_session_replaces_previous_token() {
        let mut record = UserRecord::new("alice", [0; 16], [0; 32], vec![], Role::User);
        record.start_session(SessionToken::from_bytes([1; 32]), 10);
        record.start_session(SessionToken::from_bytes([2; 32]), 20);

        assert_eq!(record.token, Some(SessionToken::from_bytes([2; 32])));
        assert_eq!(record.last_seen, 20);
    }

    #[test]
    fn debug_hides_credentials() {
        let mut record = UserRecord::new("alice", [0xEE; 16], [0xDD; 32], vec![], Role::Admin);
        record.start_session(SessionToken::from_bytes([0xCC; 32]), 1);

        let rendered = format!("{record:?}");
        assert!(!rendered.contains("221"));
        assert!(!rendered.contains("204"));
    }
}
