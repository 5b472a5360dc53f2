//! Typed, timeout-bounded calls over a [`Transport`].

use std::time::Duration;

use keyline_proto::{MailboxMessage, Request, RequestBody, Response, Role};

use crate::{
    error::{ClientError, TransportError},
    session::Session,
    transport::Transport,
};

/// Thin typed wrapper over a transport.
///
/// Every call is bounded by the configured timeout. Server error responses
/// become [`ClientError::Rejected`]; a missed deadline becomes
/// [`TransportError::Timeout`].
pub struct ApiClient<T> {
    transport: T,
    timeout: Duration,
}

/// Raw login result before it becomes a [`Session`].
#[derive(Debug, Clone)]
pub struct LoginGrant {
    /// Raw token bytes
    pub token: Vec<u8>,
    /// Account role
    pub role: Role,
}

impl<T: Transport> ApiClient<T> {
    /// Wrap `transport`, bounding each call by `timeout`.
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a request and map error responses.
    pub async fn call(&self, request: Request) -> Result<Response, ClientError> {
        let response = tokio::time::timeout(self.timeout, self.transport.round_trip(request))
            .await
            .map_err(|_| TransportError::Timeout)??;

        match response {
            Response::Error(payload) => {
                Err(ClientError::Rejected { code: payload.code, message: payload.message })
            },
            other => Ok(other),
        }
    }

    /// Create an account. Returns the grant and the sealed welcome note.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        public_key: Vec<u8>,
    ) -> Result<(LoginGrant, Vec<u8>), ClientError> {
        let body = RequestBody::Register {
            username: username.to_string(),
            password: password.to_string(),
            public_key,
        };
        match self.call(Request::anonymous(body)).await? {
            Response::Registered { token, role, welcome } => {
                Ok((LoginGrant { token, role }, welcome))
            },
            other => Err(unexpected("Registered", &other)),
        }
    }

    /// Password login.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginGrant, ClientError> {
        let body =
            RequestBody::Login { username: username.to_string(), password: password.to_string() };
        expect_login(self.call(Request::anonymous(body)).await?)
    }

    /// Ask for a certificate-login nonce.
    pub async fn begin_certificate_login(&self, username: &str) -> Result<Vec<u8>, ClientError> {
        let body = RequestBody::BeginCertificateLogin { username: username.to_string() };
        match self.call(Request::anonymous(body)).await? {
            Response::Challenge { nonce } => Ok(nonce),
            other => Err(unexpected("Challenge", &other)),
        }
    }

    /// Submit a signature over the nonce.
    pub async fn complete_certificate_login(
        &self,
        username: &str,
        signature: Vec<u8>,
    ) -> Result<LoginGrant, ClientError> {
        let body =
            RequestBody::CompleteCertificateLogin { username: username.to_string(), signature };
        expect_login(self.call(Request::anonymous(body)).await?)
    }

    /// Fetch `username`'s serialized public identity.
    pub async fn public_key(
        &self,
        session: &Session,
        username: &str,
    ) -> Result<Vec<u8>, ClientError> {
        let body = RequestBody::GetPublicKey { username: username.to_string() };
        match self.call(session.request(body)).await? {
            Response::PublicKey { public_key, .. } => Ok(public_key),
            other => Err(unexpected("PublicKey", &other)),
        }
    }

    /// Queue a ciphertext for `to`. Returns the server timestamp.
    pub async fn send_message(
        &self,
        session: &Session,
        to: &str,
        ciphertext: Vec<u8>,
    ) -> Result<u64, ClientError> {
        let body = RequestBody::SendMessage { to: to.to_string(), ciphertext };
        match self.call(session.request(body)).await? {
            Response::MessageQueued { timestamp } => Ok(timestamp),
            other => Err(unexpected("MessageQueued", &other)),
        }
    }

    /// Drain everything `from` has queued for us.
    pub async fn fetch_messages(
        &self,
        session: &Session,
        from: &str,
    ) -> Result<Vec<MailboxMessage>, ClientError> {
        let body = RequestBody::FetchMessages { from: from.to_string() };
        match self.call(session.request(body)).await? {
            Response::Messages { messages } => Ok(messages),
            other => Err(unexpected("Messages", &other)),
        }
    }

    /// Usernames in registration order.
    pub async fn list_users(&self) -> Result<Vec<String>, ClientError> {
        match self.call(Request::anonymous(RequestBody::ListUsers)).await? {
            Response::Users { usernames } => Ok(usernames),
            other => Err(unexpected("Users", &other)),
        }
    }

    /// Block or unblock a user (admin only).
    pub async fn set_blocked(
        &self,
        session: &Session,
        username: &str,
        blocked: bool,
    ) -> Result<(), ClientError> {
        let body = RequestBody::SetBlocked { username: username.to_string(), blocked };
        match self.call(session.request(body)).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected("Ok", &other)),
        }
    }
}

fn expect_login(response: Response) -> Result<LoginGrant, ClientError> {
    match response {
        Response::LoggedIn { token, role } => Ok(LoginGrant { token, role }),
        other => Err(unexpected("LoggedIn", &other)),
    }
}

fn unexpected(wanted: &str, got: &Response) -> ClientError {
    ClientError::UnexpectedResponse(format!("expected {wanted}, got {got:?}"))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use keyline_proto::{ErrorCode, ErrorPayload};

    use super::*;

    struct Canned(Response);

    #[async_trait]
    impl Transport for Canned {
        async fn round_trip(&self, _request: Request) -> Result<Response, TransportError> {
            Ok(self.0.clone())
        }
    }

    struct Stalled;

    #[async_trait]
    impl Transport for Stalled {
        async fn round_trip(&self, _request: Request) -> Result<Response, TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn error_response_becomes_rejection() {
        let api = ApiClient::new(
            Canned(Response::Error(ErrorPayload::new(ErrorCode::InvalidCredentials))),
            Duration::from_secs(1),
        );
        let err = api.login("alice", "pw").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidCredentials));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn wrong_response_kind_is_unexpected() {
        let api = ApiClient::new(Canned(Response::Ok), Duration::from_secs(1));
        assert!(matches!(api.list_users().await, Err(ClientError::UnexpectedResponse(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_server_times_out() {
        let api = ApiClient::new(Stalled, Duration::from_secs(10));
        let err = api.list_users().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(TransportError::Timeout)));
        assert!(err.is_retryable());
    }
}
