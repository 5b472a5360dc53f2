//! Password and certificate authenticators.
//!
//! Both login paths end in the same token issuance: a fresh random token
//! replaces whatever the record held, and last-seen is stamped. Only the most
//! recent login's token stays valid.
//!
//! Responses never tell "wrong password" apart from "unknown user". An unknown
//! username still pays for one Argon2 hash so the two cases also take the same
//! time. Hashing itself runs outside the driver as a
//! [`PasswordJob`](crate::PasswordJob).

use std::time::Duration;

use keyline_core::{
    ChallengeError, ChallengeManager, Environment, IssueOutcome, SessionError, SessionToken,
    UserRecord, UsernameError, validate_session, validate_username,
};
use keyline_crypto::{
    CryptoError, PASSWORD_HASH_SIZE, PasswordParams, PublicIdentity, SALT_SIZE, SEAL_RANDOM_SIZE,
    constant_time_eq, seal,
};
use keyline_proto::{ErrorCode, Role};
use thiserror::Error;

use crate::{
    password_job::{HashedPassword, PasswordJob, PasswordWork},
    storage::{Storage, StorageError},
};

/// Authentication failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Wrong password or unknown user; deliberately indistinguishable
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Username not registered (challenge issue and admin actions only)
    #[error("user not found")]
    UserNotFound,

    /// Account blocked by an administrator
    #[error("user blocked")]
    UserBlocked,

    /// Registration for a taken username
    #[error("username already taken")]
    UserExists,

    /// Registration with a malformed username
    #[error("invalid username: {0}")]
    InvalidUsername(#[from] UsernameError),

    /// Missing or malformed request field
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No pending challenge, or it outlived its lifetime
    #[error("challenge expired")]
    ChallengeExpired,

    /// Signature did not verify over the issued nonce
    #[error("bad signature")]
    BadSignature,

    /// Presented token does not match the user's current token
    #[error("token invalid")]
    TokenInvalid,

    /// Token matches but the session window has passed
    #[error("token expired")]
    TokenExpired,

    /// Caller lacks the admin role
    #[error("forbidden")]
    Forbidden,

    /// Credential store failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Stored key material or hashing parameters unusable
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl AuthError {
    /// Wire error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidCredentials => ErrorCode::InvalidCredentials,
            Self::UserNotFound => ErrorCode::UserNotFound,
            Self::UserBlocked => ErrorCode::UserBlocked,
            Self::UserExists => ErrorCode::UserExists,
            Self::InvalidUsername(_) => ErrorCode::InvalidUsername,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::ChallengeExpired => ErrorCode::ChallengeExpired,
            Self::BadSignature => ErrorCode::BadSignature,
            Self::TokenInvalid => ErrorCode::TokenInvalid,
            Self::TokenExpired => ErrorCode::TokenExpired,
            Self::Forbidden => ErrorCode::Forbidden,
            Self::Storage(_) | Self::Crypto(_) => ErrorCode::Internal,
        }
    }
}

impl From<ChallengeError> for AuthError {
    fn from(err: ChallengeError) -> Self {
        match err {
            ChallengeError::Expired => Self::ChallengeExpired,
        }
    }
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::TokenInvalid => Self::TokenInvalid,
            SessionError::TokenExpired => Self::TokenExpired,
            SessionError::UserBlocked => Self::UserBlocked,
        }
    }
}

/// Token issued by a successful login.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    /// New bearer token
    pub token: SessionToken,
    /// Account role
    pub role: Role,
}

/// Result of a completed password job.
#[derive(Debug, Clone)]
pub enum PasswordOutcome {
    /// New account created and logged in
    Registered(Registration),
    /// Existing account logged in
    LoggedIn(IssuedSession),
}

impl PasswordOutcome {
    /// Role of the account that was registered or logged in.
    pub fn role(&self) -> Role {
        match self {
            Self::Registered(registration) => registration.session.role,
            Self::LoggedIn(session) => session.role,
        }
    }
}

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Session for the new account
    pub session: IssuedSession,
    /// Welcome note sealed to the registered public identity
    pub welcome: Vec<u8>,
}

/// Password login, certificate login and token validation.
///
/// Owns the challenge table. The driver holds the authenticator behind its
/// own lock, which makes every method here one critical section. Password
/// hashing is the exception: `begin_*` returns a [`PasswordJob`] to run
/// outside the lock and [`Authenticator::finish_password`] applies its
/// result.
pub struct Authenticator<E: Environment> {
    env: E,
    challenges: ChallengeManager<E::Instant>,
    password_params: PasswordParams,
    session_lifetime: Duration,
    dummy_salt: [u8; SALT_SIZE],
}

impl<E: Environment> Authenticator<E> {
    /// Create an authenticator.
    pub fn new(
        env: E,
        password_params: PasswordParams,
        challenge_lifetime: Duration,
        session_lifetime: Duration,
    ) -> Self {
        let dummy_salt = env.random_array();
        Self {
            env,
            challenges: ChallengeManager::new(challenge_lifetime),
            password_params,
            session_lifetime,
            dummy_salt,
        }
    }

    /// Outstanding challenges (for tests and metrics).
    pub fn challenges(&self) -> &ChallengeManager<E::Instant> {
        &self.challenges
    }

    /// Validate a registration and return the hashing it needs.
    ///
    /// Rejects a taken username here so no hash is spent on it; the store
    /// still has the final say when the account is created.
    pub fn begin_registration<S: Storage>(
        &self,
        storage: &S,
        username: &str,
        password: &str,
        public_key: &[u8],
    ) -> Result<PasswordJob, AuthError> {
        validate_username(username)?;
        if password.is_empty() {
            return Err(AuthError::InvalidRequest("empty password".to_string()));
        }
        PublicIdentity::from_bytes(public_key)
            .map_err(|e| AuthError::InvalidRequest(format!("public key: {e}")))?;
        if storage.load_user(username)?.is_some() {
            return Err(AuthError::UserExists);
        }

        let work = PasswordWork::Register {
            username: username.to_string(),
            public_key: public_key.to_vec(),
            salt: self.env.random_array(),
        };
        Ok(PasswordJob::new(password, self.password_params, work))
    }

    /// Look up the account and return the hashing a password login needs.
    ///
    /// An unknown username gets a job too, under a dummy salt, so both
    /// outcomes cost one hash.
    pub fn begin_login<S: Storage>(
        &self,
        storage: &S,
        username: &str,
        password: &str,
    ) -> Result<PasswordJob, AuthError> {
        let work = match storage.load_user(username)? {
            Some(record) => PasswordWork::Login {
                username: username.to_string(),
                salt: record.salt,
                expected: record.password_hash,
            },
            None => {
                PasswordWork::UnknownUser { username: username.to_string(), salt: self.dummy_salt }
            },
        };
        Ok(PasswordJob::new(password, self.password_params, work))
    }

    /// Complete a register or login once its hash is known.
    ///
    /// # Errors
    ///
    /// - `UserExists`: the name was taken while the hash ran
    /// - `InvalidCredentials`: unknown user or wrong password
    /// - `UserBlocked`: correct password on a blocked account
    pub fn finish_password<S: Storage>(
        &self,
        storage: &S,
        hashed: HashedPassword,
    ) -> Result<PasswordOutcome, AuthError> {
        let derived = hashed.derived?;
        match hashed.work {
            PasswordWork::Register { username, public_key, salt } => self
                .create_account(storage, &username, &public_key, salt, derived)
                .map(PasswordOutcome::Registered),
            PasswordWork::Login { username, expected, .. } => {
                if !constant_time_eq(&derived, &expected) {
                    return Err(AuthError::InvalidCredentials);
                }
                // Re-read: the account may have been blocked while the hash ran
                let Some(record) = storage.load_user(&username)? else {
                    return Err(AuthError::InvalidCredentials);
                };
                if record.password_hash != expected {
                    return Err(AuthError::InvalidCredentials);
                }
                if record.blocked {
                    return Err(AuthError::UserBlocked);
                }
                self.issue_session(storage, record).map(PasswordOutcome::LoggedIn)
            },
            PasswordWork::UnknownUser { .. } => Err(AuthError::InvalidCredentials),
        }
    }

    /// Create an account and log it in, hashing inline.
    ///
    /// The first account ever registered becomes the administrator.
    pub fn register<S: Storage>(
        &self,
        storage: &S,
        username: &str,
        password: &str,
        public_key: &[u8],
    ) -> Result<Registration, AuthError> {
        let job = self.begin_registration(storage, username, password, public_key)?;
        match self.finish_password(storage, job.run())? {
            PasswordOutcome::Registered(registration) => Ok(registration),
            PasswordOutcome::LoggedIn(_) => {
                Err(AuthError::InvalidRequest("registration produced a login".to_string()))
            },
        }
    }

    /// Password login, hashing inline.
    pub fn login<S: Storage>(
        &self,
        storage: &S,
        username: &str,
        password: &str,
    ) -> Result<IssuedSession, AuthError> {
        let job = self.begin_login(storage, username, password)?;
        match self.finish_password(storage, job.run())? {
            PasswordOutcome::LoggedIn(session) => Ok(session),
            PasswordOutcome::Registered(_) => {
                Err(AuthError::InvalidRequest("login produced a registration".to_string()))
            },
        }
    }

    /// Issue a certificate-login nonce for `username`.
    ///
    /// A second call before the first nonce is used discards the first.
    pub fn begin_certificate_login<S: Storage>(
        &mut self,
        storage: &S,
        username: &str,
    ) -> Result<([u8; 32], IssueOutcome), AuthError> {
        if storage.load_user(username)?.is_none() {
            return Err(AuthError::UserNotFound);
        }

        let nonce = self.env.random_array();
        let outcome = self.challenges.issue(username, nonce, self.env.now());
        Ok((nonce, outcome))
    }

    /// Verify a signature over the pending nonce and log the user in.
    ///
    /// The pending challenge is consumed whether or not the signature
    /// verifies, so a nonce admits exactly one attempt.
    pub fn complete_certificate_login<S: Storage>(
        &mut self,
        storage: &S,
        username: &str,
        signature: &[u8],
    ) -> Result<IssuedSession, AuthError> {
        let nonce = self.challenges.take(username, self.env.now())?;

        let Some(record) = storage.load_user(username)? else {
            return Err(AuthError::ChallengeExpired);
        };
        let identity = PublicIdentity::from_bytes(&record.public_key)?;
        identity.verify(&nonce, signature).map_err(|_| AuthError::BadSignature)?;

        if record.blocked {
            return Err(AuthError::UserBlocked);
        }

        self.issue_session(storage, record)
    }

    /// Validate the `(username, authorization)` pair of a request.
    ///
    /// Returns the caller's record on success.
    pub fn authorize<S: Storage>(
        &self,
        storage: &S,
        username: Option<&str>,
        token: Option<&[u8]>,
    ) -> Result<UserRecord, AuthError> {
        let (Some(username), Some(token)) = (username, token) else {
            return Err(AuthError::TokenInvalid);
        };
        let Some(record) = storage.load_user(username)? else {
            return Err(AuthError::TokenInvalid);
        };

        validate_session(&record, token, self.env.wall_clock_secs(), self.session_lifetime)?;
        Ok(record)
    }

    /// Block or unblock `target`. Only administrators may do this, and not
    /// to themselves.
    pub fn set_blocked<S: Storage>(
        &self,
        storage: &S,
        actor: &UserRecord,
        target: &str,
        blocked: bool,
    ) -> Result<(), AuthError> {
        if !actor.is_admin() {
            return Err(AuthError::Forbidden);
        }
        if actor.username == target {
            return Err(AuthError::InvalidRequest("cannot change own block flag".to_string()));
        }

        let Some(mut record) = storage.load_user(target)? else {
            return Err(AuthError::UserNotFound);
        };
        record.blocked = blocked;
        storage.put_user(&record)?;
        Ok(())
    }

    /// Drop challenges whose lifetime has passed. Returns the affected
    /// usernames.
    pub fn expire_challenges(&mut self) -> Vec<String> {
        self.challenges.expire(self.env.now())
    }

    fn create_account<S: Storage>(
        &self,
        storage: &S,
        username: &str,
        public_key: &[u8],
        salt: [u8; SALT_SIZE],
        password_hash: [u8; PASSWORD_HASH_SIZE],
    ) -> Result<Registration, AuthError> {
        let identity = PublicIdentity::from_bytes(public_key)
            .map_err(|e| AuthError::InvalidRequest(format!("public key: {e}")))?;

        let role = if storage.list_usernames()?.is_empty() { Role::Admin } else { Role::User };
        let mut record =
            UserRecord::new(username, salt, password_hash, public_key.to_vec(), role);
        let token = self.new_token();
        record.start_session(token.clone(), self.env.wall_clock_secs());

        if !storage.create_user(&record)? {
            return Err(AuthError::UserExists);
        }

        let note = format!("Welcome to keyline, {username}.");
        let welcome =
            seal(&identity, note.as_bytes(), self.env.random_array::<SEAL_RANDOM_SIZE>())?;

        Ok(Registration { session: IssuedSession { token, role }, welcome })
    }

    fn new_token(&self) -> SessionToken {
        SessionToken::from_bytes(self.env.random_array())
    }

    fn issue_session<S: Storage>(
        &self,
        storage: &S,
        mut record: UserRecord,
    ) -> Result<IssuedSession, AuthError> {
        let token = self.new_token();
        record.start_session(token.clone(), self.env.wall_clock_secs());
        storage.put_user(&record)?;
        Ok(IssuedSession { token, role: record.role })
    }
}

#[cfg(test)]
mod tests {
    use keyline_core::{ChallengeState, SystemEnv};
    use keyline_crypto::IdentityKeyPair;

    use super::*;
    use crate::storage::MemoryStorage;

    fn authenticator() -> Authenticator<SystemEnv> {
        Authenticator::new(
            SystemEnv::new(),
            PasswordParams::minimal(),
            Duration::from_secs(5),
            Duration::from_secs(3600),
        )
    }

    fn identity(seed: u8) -> IdentityKeyPair {
        IdentityKeyPair::from_secret_bytes(&[seed; 64])
    }

    fn register(auth: &Authenticator<SystemEnv>, storage: &MemoryStorage, name: &str, seed: u8) {
        auth.register(storage, name, "hunter2", &identity(seed).public().to_bytes()).unwrap();
    }

    #[test]
    fn first_user_is_admin() {
        let auth = authenticator();
        let storage = MemoryStorage::new();

        let alice =
            auth.register(&storage, "alice", "pw", &identity(1).public().to_bytes()).unwrap();
        let bob = auth.register(&storage, "bob", "pw", &identity(2).public().to_bytes()).unwrap();

        assert_eq!(alice.session.role, Role::Admin);
        assert_eq!(bob.session.role, Role::User);
    }

    #[test]
    fn welcome_opens_with_registered_identity() {
        let auth = authenticator();
        let storage = MemoryStorage::new();
        let keys = identity(1);

        let registration =
            auth.register(&storage, "alice", "pw", &keys.public().to_bytes()).unwrap();
        let note = keyline_crypto::open(&keys, &registration.welcome).unwrap();
        assert!(String::from_utf8_lossy(&note).contains("alice"));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let auth = authenticator();
        let storage = MemoryStorage::new();
        register(&auth, &storage, "alice", 1);

        let err = auth
            .register(&storage, "alice", "other", &identity(2).public().to_bytes())
            .unwrap_err();
        assert_eq!(err, AuthError::UserExists);
    }

    #[test]
    fn registration_rejects_bad_input() {
        let auth = authenticator();
        let storage = MemoryStorage::new();
        let key = identity(1).public().to_bytes();

        let code = |result: Result<Registration, AuthError>| result.unwrap_err().code();
        assert_eq!(code(auth.register(&storage, "../bob", "pw", &key)), ErrorCode::InvalidUsername);
        assert_eq!(code(auth.register(&storage, "bob", "", &key)), ErrorCode::InvalidRequest);
        let short_key = code(auth.register(&storage, "bob", "pw", &[1, 2, 3]));
        assert_eq!(short_key, ErrorCode::InvalidRequest);
        assert_eq!(storage.user_count(), 0);
    }

    #[test]
    fn wrong_password_and_unknown_user_look_the_same() {
        let auth = authenticator();
        let storage = MemoryStorage::new();
        register(&auth, &storage, "alice", 1);

        let wrong = auth.login(&storage, "alice", "nope").unwrap_err();
        let unknown = auth.login(&storage, "mallory", "nope").unwrap_err();
        assert_eq!(wrong, AuthError::InvalidCredentials);
        assert_eq!(unknown, AuthError::InvalidCredentials);
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[test]
    fn login_replaces_previous_token() {
        let auth = authenticator();
        let storage = MemoryStorage::new();
        register(&auth, &storage, "alice", 1);

        let first = auth.login(&storage, "alice", "hunter2").unwrap();
        let second = auth.login(&storage, "alice", "hunter2").unwrap();

        let err = auth
            .authorize(&storage, Some("alice"), Some(first.token.as_bytes()))
            .unwrap_err();
        assert_eq!(err, AuthError::TokenInvalid);
        assert!(auth.authorize(&storage, Some("alice"), Some(second.token.as_bytes())).is_ok());
    }

    #[test]
    fn blocked_user_rejected_only_with_correct_password() {
        let auth = authenticator();
        let storage = MemoryStorage::new();
        register(&auth, &storage, "admin", 1);
        register(&auth, &storage, "bob", 2);

        let admin = storage.load_user("admin").unwrap().unwrap();
        auth.set_blocked(&storage, &admin, "bob", true).unwrap();

        let wrong = auth.login(&storage, "bob", "wrong").unwrap_err();
        assert_eq!(wrong, AuthError::InvalidCredentials);
        let right = auth.login(&storage, "bob", "hunter2").unwrap_err();
        assert_eq!(right, AuthError::UserBlocked);
    }

    #[test]
    fn non_admin_cannot_block() {
        let auth = authenticator();
        let storage = MemoryStorage::new();
        register(&auth, &storage, "admin", 1);
        register(&auth, &storage, "bob", 2);

        let bob = storage.load_user("bob").unwrap().unwrap();
        let err = auth.set_blocked(&storage, &bob, "admin", true).unwrap_err();
        assert_eq!(err, AuthError::Forbidden);
    }

    #[test]
    fn certificate_login_round_trip() {
        let mut auth = authenticator();
        let storage = MemoryStorage::new();
        let keys = identity(1);
        auth.register(&storage, "alice", "pw", &keys.public().to_bytes()).unwrap();

        let (nonce, outcome) = auth.begin_certificate_login(&storage, "alice").unwrap();
        assert_eq!(outcome, IssueOutcome::Issued);

        let session =
            auth.complete_certificate_login(&storage, "alice", &keys.sign(&nonce)).unwrap();
        assert!(auth.authorize(&storage, Some("alice"), Some(session.token.as_bytes())).is_ok());
        assert_eq!(
            auth.challenges().state("alice", SystemEnv::new().now()),
            ChallengeState::NoChallenge
        );
    }

    #[test]
    fn bad_signature_consumes_challenge() {
        let mut auth = authenticator();
        let storage = MemoryStorage::new();
        let keys = identity(1);
        auth.register(&storage, "alice", "pw", &keys.public().to_bytes()).unwrap();

        let (nonce, _) = auth.begin_certificate_login(&storage, "alice").unwrap();
        let mut tampered = nonce;
        tampered[0] ^= 1;

        let err = auth
            .complete_certificate_login(&storage, "alice", &keys.sign(&tampered))
            .unwrap_err();
        assert_eq!(err, AuthError::BadSignature);

        let err =
            auth.complete_certificate_login(&storage, "alice", &keys.sign(&nonce)).unwrap_err();
        assert_eq!(err, AuthError::ChallengeExpired);
    }

    #[test]
    fn challenge_for_unknown_user() {
        let mut auth = authenticator();
        let storage = MemoryStorage::new();
        assert_eq!(
            auth.begin_certificate_login(&storage, "ghost").unwrap_err(),
            AuthError::UserNotFound
        );
    }

    #[test]
    fn signature_without_challenge_is_expired() {
        let mut auth = authenticator();
        let storage = MemoryStorage::new();
        let keys = identity(1);
        auth.register(&storage, "alice", "pw", &keys.public().to_bytes()).unwrap();

        let err =
            auth.complete_certificate_login(&storage, "alice", &keys.sign(&[0; 32])).unwrap_err();
        assert_eq!(err, AuthError::ChallengeExpired);
    }

    #[test]
    fn missing_credentials_are_invalid() {
        let auth = authenticator();
        let storage = MemoryStorage::new();
        register(&auth, &storage, "alice", 1);

        let zero: &[u8] = &[0; 32];
        let cases = [(Some("alice"), None), (None, Some(zero)), (Some("nobody"), Some(zero))];
        for (username, token) in cases {
            let err = auth.authorize(&storage, username, token).unwrap_err();
            assert_eq!(err, AuthError::TokenInvalid);
        }
    }

    #[test]
    fn block_while_hashing_takes_effect() {
        let auth = authenticator();
        let storage = MemoryStorage::new();
        register(&auth, &storage, "admin", 1);
        register(&auth, &storage, "bob", 2);

        let job = auth.begin_login(&storage, "bob", "hunter2").unwrap();
        let admin = storage.load_user("admin").unwrap().unwrap();
        auth.set_blocked(&storage, &admin, "bob", true).unwrap();

        let err = auth.finish_password(&storage, job.run()).unwrap_err();
        assert_eq!(err, AuthError::UserBlocked);
    }

    #[test]
    fn racing_registrations_create_one_account() {
        let auth = authenticator();
        let storage = MemoryStorage::new();

        let first =
            auth.begin_registration(&storage, "alice", "pw", &identity(1).public().to_bytes());
        let second =
            auth.begin_registration(&storage, "alice", "pw", &identity(2).public().to_bytes());
        let (first, second) = (first.unwrap().run(), second.unwrap().run());

        let outcome = auth.finish_password(&storage, first).unwrap();
        assert_eq!(outcome.role(), Role::Admin);
        let err = auth.finish_password(&storage, second).unwrap_err();
        assert_eq!(err, AuthError::UserExists);
        assert_eq!(storage.user_count(), 1);
    }

    #[test]
    fn taken_name_rejected_before_hashing() {
        let auth = authenticator();
        let storage = MemoryStorage::new();
        register(&auth, &storage, "alice", 1);

        let err = auth
            .begin_registration(&storage, "alice", "pw", &identity(2).public().to_bytes())
            .unwrap_err();
        assert_eq!(err, AuthError::UserExists);
    }

    #[test]
    fn unknown_user_job_is_always_rejected() {
        let auth = authenticator();
        let storage = MemoryStorage::new();

        let job = auth.begin_login(&storage, "ghost", "anything").unwrap();
        assert_eq!(job.username(), "ghost");
        register(&auth, &storage, "ghost", 1);

        let err = auth.finish_password(&storage, job.run()).unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
    }
}
