//! Client requests.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// A request envelope.
///
/// `username` and `authorization` play the role of the `Username` and
/// `Authorization` headers. They are only consulted by handlers that require
/// an authenticated caller.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Caller's username
    pub username: Option<String>,
    /// Base64 (standard alphabet) encoding of the raw session token
    pub authorization: Option<String>,
    /// Operation payload
    pub body: RequestBody,
}

impl Request {
    /// Unauthenticated request.
    pub fn anonymous(body: RequestBody) -> Self {
        Self { username: None, authorization: None, body }
    }

    /// Request carrying the caller's identity and session token.
    pub fn authorized(username: impl Into<String>, token: &[u8], body: RequestBody) -> Self {
        Self {
            username: Some(username.into()),
            authorization: Some(STANDARD.encode(token)),
            body,
        }
    }

    /// Decode the raw token bytes from the `authorization` header.
    ///
    /// Returns `Ok(None)` when the header is absent.
    pub fn token_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.authorization
            .as_deref()
            .map(|header| {
                STANDARD.decode(header).map_err(|_| ProtocolError::MalformedAuthorization)
            })
            .transpose()
    }
}

// Keeps bearer tokens and passwords out of debug output.
impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("username", &self.username)
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .field("body", &self.body)
            .finish()
    }
}

/// Operations a client can request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestBody {
    /// Create an account. Public.
    Register {
        /// Desired username
        username: String,
        /// Password to hash
        password: String,
        /// Serialized public identity (signing key then encryption key)
        public_key: Vec<u8>,
    },

    /// Password login. Public.
    Login {
        /// Account name
        username: String,
        /// Password
        password: String,
    },

    /// Request a challenge nonce for certificate login. Public.
    BeginCertificateLogin {
        /// Account name
        username: String,
    },

    /// Submit a signature over the issued nonce. Public.
    CompleteCertificateLogin {
        /// Account name
        username: String,
        /// Ed25519 signature over the nonce bytes
        signature: Vec<u8>,
    },

    /// Fetch a user's public identity. Authenticated.
    GetPublicKey {
        /// User whose key to fetch
        username: String,
    },

    /// Append a ciphertext to the caller→`to` mailbox. Authenticated.
    SendMessage {
        /// Receiver
        to: String,
        /// Encoded [`crate::ChatPayload`]
        ciphertext: Vec<u8>,
    },

    /// Drain the `from`→caller mailbox. Authenticated.
    FetchMessages {
        /// Sender whose messages to drain
        from: String,
    },

    /// List usernames in registration order. Public.
    ListUsers,

    /// Block or unblock a user. Admin only.
    SetBlocked {
        /// Target account
        username: String,
        /// New block flag
        blocked: bool,
    },
}

impl RequestBody {
    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Login { .. } => "login",
            Self::BeginCertificateLogin { .. } => "begin_certificate_login",
            Self::CompleteCertificateLogin { .. } => "complete_certificate_login",
            Self::GetPublicKey { .. } => "get_public_key",
            Self::SendMessage { .. } => "send_message",
            Self::FetchMessages { .. } => "fetch_messages",
            Self::ListUsers => "list_users",
            Self::SetBlocked { .. } => "set_blocked",
        }
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register { username, public_key, .. } => f
                .debug_struct("Register")
                .field("username", username)
                .field("public_key_len", &public_key.len())
                .finish_non_exhaustive(),
            Self::Login { username, .. } => {
                f.debug_struct("Login").field("username", username).finish_non_exhaustive()
            },
            Self::BeginCertificateLogin { username } => {
                f.debug_struct("BeginCertificateLogin").field("username", username).finish()
            },
            Self::CompleteCertificateLogin { username, .. } => f
                .debug_struct("CompleteCertificateLogin")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::GetPublicKey { username } => {
                f.debug_struct("GetPublicKey").field("username", username).finish()
            },
            Self::SendMessage { to, ciphertext } => f
                .debug_struct("SendMessage")
                .field("to", to)
                .field("ciphertext_len", &ciphertext.len())
                .finish(),
            Self::FetchMessages { from } => {
                f.debug_struct("FetchMessages").field("from", from).finish()
            },
            Self::ListUsers => f.write_str("ListUsers"),
            Self::SetBlocked { username, blocked } => f
                .debug_struct("SetBlocked")
                .field("username", username)
                .field("blocked", blocked)
                .finish(),
        }
    }
}
