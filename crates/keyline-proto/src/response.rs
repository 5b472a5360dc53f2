//! Server responses.

use serde::{Deserialize, Serialize};

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// May block and unblock other users. The first registered account.
    Admin,
    /// Regular account.
    User,
}

/// Wire error taxonomy.
///
/// Credential and token codes are final for the request that produced them;
/// the caller decides whether to re-prompt. Only `Internal` may succeed on a
/// plain retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Unknown user or wrong password. Deliberately indistinguishable.
    InvalidCredentials,
    /// Named user does not exist (only where existence is not a secret)
    UserNotFound,
    /// Account is blocked by an administrator
    UserBlocked,
    /// Registration for a name already taken
    UserExists,
    /// Username fails validation
    InvalidUsername,
    /// No pending challenge, or it expired before the signature arrived
    ChallengeExpired,
    /// Signature did not verify against the registered key
    BadSignature,
    /// Token is older than the session window
    TokenExpired,
    /// Token missing, malformed or not the user's current token
    TokenInvalid,
    /// Caller lacks the role for this operation
    Forbidden,
    /// Request is well-formed but semantically invalid
    InvalidRequest,
    /// Server-side failure (storage, encoding)
    Internal,
}

impl ErrorCode {
    /// Whether the same request may succeed if simply resent.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Internal)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::InvalidCredentials => "invalid credentials",
            Self::UserNotFound => "user not found",
            Self::UserBlocked => "user blocked",
            Self::UserExists => "user already exists",
            Self::InvalidUsername => "invalid username",
            Self::ChallengeExpired => "challenge expired",
            Self::BadSignature => "bad signature",
            Self::TokenExpired => "token expired",
            Self::TokenInvalid => "token invalid",
            Self::Forbidden => "forbidden",
            Self::InvalidRequest => "invalid request",
            Self::Internal => "internal error",
        };
        f.write_str(text)
    }
}

/// Error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable code
    pub code: ErrorCode,
    /// Human-readable detail, never containing secrets
    pub message: String,
}

impl ErrorPayload {
    /// Error with the code's default text.
    pub fn new(code: ErrorCode) -> Self {
        Self { code, message: code.to_string() }
    }

    /// Error with a custom message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// One pending mailbox entry as delivered to the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxMessage {
    /// Sender username (assigned by the server, not the client)
    pub sender: String,
    /// Encoded [`crate::ChatPayload`]
    pub ciphertext: Vec<u8>,
    /// Server wall-clock seconds at enqueue time
    pub timestamp: u64,
}

/// Server responses. Exactly one per request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Account created and logged in.
    Registered {
        /// Raw session token
        token: Vec<u8>,
        /// Assigned role
        role: Role,
        /// Welcome text sealed to the registered public key
        welcome: Vec<u8>,
    },

    /// Login succeeded (password or certificate).
    LoggedIn {
        /// Raw session token
        token: Vec<u8>,
        /// Account role
        role: Role,
    },

    /// Certificate-login challenge.
    Challenge {
        /// Nonce to sign
        nonce: Vec<u8>,
    },

    /// Public identity lookup result.
    PublicKey {
        /// Owner
        username: String,
        /// Serialized public identity
        public_key: Vec<u8>,
    },

    /// Message accepted into the mailbox.
    MessageQueued {
        /// Server timestamp assigned at enqueue
        timestamp: u64,
    },

    /// Drained mailbox contents in arrival order.
    Messages {
        /// Pending entries, oldest first
        messages: Vec<MailboxMessage>,
    },

    /// Usernames in registration order.
    Users {
        /// Names
        usernames: Vec<String>,
    },

    /// Operation applied with nothing to return.
    Ok,

    /// Operation rejected.
    Error(ErrorPayload),
}

impl Response {
    /// Error response with the code's default text.
    pub fn error(code: ErrorCode) -> Self {
        Self::Error(ErrorPayload::new(code))
    }

    /// Error code if this is an error response.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Error(payload) => Some(payload.code),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registered { role, welcome, .. } => f
                .debug_struct("Registered")
                .field("token", &"<redacted>")
                .field("role", role)
                .field("welcome_len", &welcome.len())
                .finish(),
            Self::LoggedIn { role, .. } => f
                .debug_struct("LoggedIn")
                .field("token", &"<redacted>")
                .field("role", role)
                .finish(),
            Self::Challenge { nonce } => {
                f.debug_struct("Challenge").field("nonce_len", &nonce.len()).finish()
            },
            Self::PublicKey { username, public_key } => f
                .debug_struct("PublicKey")
                .field("username", username)
                .field("public_key_len", &public_key.len())
                .finish(),
            Self::MessageQueued { timestamp } => {
                f.debug_struct("MessageQueued").field("timestamp", timestamp).finish()
            },
            Self::Messages { messages } => {
                f.debug_struct("Messages").field("count", &messages.len()).finish()
            },
            Self::Users { usernames } => {
                f.debug_struct("Users").field("usernames", usernames).finish()
            },
            Self::Ok => f.write_str("Ok"),
            Self::Error(payload) => f.debug_tuple("Error").field(payload).finish(),
        }
    }
}
