//! Authenticated sessions and the flows that produce them.

use keyline_core::{SessionToken, validate_username};
use keyline_crypto::{IdentityKeyPair, open};
use keyline_proto::{Request, RequestBody, Role};

use crate::{
    api::{ApiClient, LoginGrant},
    error::ClientError,
    transport::Transport,
};

/// A logged-in user.
///
/// Holds the bearer token in memory only. A newer login anywhere for the same
/// user invalidates it.
#[derive(Debug, Clone)]
pub struct Session {
    username: String,
    token: SessionToken,
    role: Role,
}

impl Session {
    fn from_grant(username: &str, grant: LoginGrant) -> Result<Self, ClientError> {
        let token = SessionToken::from_slice(&grant.token).ok_or_else(|| {
            ClientError::UnexpectedResponse(format!("token of {} bytes", grant.token.len()))
        })?;
        Ok(Self { username: username.to_string(), token, role: grant.role })
    }

    /// Register `username` with `identity` and log in.
    ///
    /// Opens the sealed welcome note to confirm the server stored the
    /// identity we sent.
    pub async fn register<T: Transport>(
        api: &ApiClient<T>,
        identity: &IdentityKeyPair,
        username: &str,
        password: &str,
    ) -> Result<(Self, String), ClientError> {
        validate_username(username)?;
        let public_key = identity.public().to_bytes().to_vec();
        let (grant, welcome) = api.register(username, password, public_key).await?;

        let note = open(identity, &welcome).map_err(|_| {
            ClientError::UnexpectedResponse("welcome note not sealed to our identity".to_string())
        })?;
        let note = String::from_utf8_lossy(&note).into_owned();

        tracing::info!(target: "keyline::audit", user = username, "registered");
        Ok((Self::from_grant(username, grant)?, note))
    }

    /// Password login.
    pub async fn login<T: Transport>(
        api: &ApiClient<T>,
        username: &str,
        password: &str,
    ) -> Result<Self, ClientError> {
        let result = api.login(username, password).await;
        log_attempt("password_login", username, &result);
        Self::from_grant(username, result?)
    }

    /// Certificate login: fetch a nonce, sign it, submit the signature.
    pub async fn login_with_certificate<T: Transport>(
        api: &ApiClient<T>,
        identity: &IdentityKeyPair,
        username: &str,
    ) -> Result<Self, ClientError> {
        let nonce = api.begin_certificate_login(username).await?;
        let signature = identity.sign(&nonce);

        let result = api.complete_certificate_login(username, signature.to_vec()).await;
        log_attempt("certificate_login", username, &result);
        Self::from_grant(username, result?)
    }

    /// Account name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Account role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Raw token bytes.
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Build an authenticated request carrying this session's credentials.
    pub fn request(&self, body: RequestBody) -> Request {
        Request::authorized(self.username.clone(), self.token.as_bytes(), body)
    }
}

fn log_attempt<T>(kind: &str, username: &str, result: &Result<T, ClientError>) {
    match result {
        Ok(_) => tracing::info!(target: "keyline::audit", user = username, kind, "login succeeded"),
        Err(e) => {
            tracing::info!(
                target: "keyline::audit",
                user = username,
                kind,
                error = %e,
                "login failed"
            );
        },
    }
}
