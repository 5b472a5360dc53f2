//! Server driver.
//!
//! Ties together the authenticators, the mailbox and storage. The driver is
//! sans-IO: the runtime feeds it events and executes the actions it returns.
//! It is also the single owner of the challenge table, so whoever holds the
//! driver (behind one lock) serializes the expiry sweep against verification.
//!
//! Register and login take two steps. The request yields a
//! [`ServerAction::HashPassword`] instead of a response; the runtime runs the
//! job without the driver and feeds the result back as
//! [`ServerEvent::PasswordHashed`], which yields the response. Other requests
//! never wait behind a hash.

use std::time::Duration;

use keyline_core::{
    DEFAULT_CHALLENGE_LIFETIME, DEFAULT_SESSION_LIFETIME, Environment, IssueOutcome, UserRecord,
};
use keyline_crypto::PasswordParams;
use keyline_proto::{ErrorPayload, Request, RequestBody, Response};

use crate::{
    auth::{AuthError, Authenticator, IssuedSession, PasswordOutcome},
    mailbox::{DEFAULT_MAX_CIPHERTEXT_SIZE, Mailbox},
    password_job::{HashedPassword, PasswordJob, PasswordWork},
    server_error::ServerError,
    storage::Storage,
};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long a certificate-login nonce stays valid
    pub challenge_lifetime: Duration,
    /// Session window measured from last login
    pub session_lifetime: Duration,
    /// Argon2id cost parameters
    pub password_params: PasswordParams,
    /// Largest ciphertext the mailbox accepts
    pub max_ciphertext_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            challenge_lifetime: DEFAULT_CHALLENGE_LIFETIME,
            session_lifetime: DEFAULT_SESSION_LIFETIME,
            password_params: PasswordParams::default(),
            max_ciphertext_size: DEFAULT_MAX_CIPHERTEXT_SIZE,
        }
    }
}

/// Events that the server driver processes.
///
/// These are produced by the external runtime (simulation or production).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A request arrived on some stream
    RequestReceived {
        /// Runtime-assigned id, echoed in the response action
        request_id: u64,
        /// Decoded request
        request: Request,
    },

    /// A password job from `HashPassword` finished
    PasswordHashed {
        /// Id from the originating `RequestReceived`
        request_id: u64,
        /// Output of [`PasswordJob::run`]
        result: HashedPassword,
    },

    /// Periodic tick for challenge expiry
    Tick,
}

/// Actions that the server driver produces.
///
/// These are executed by runtime-specific code (production or simulation).
#[derive(Debug, Clone)]
pub enum ServerAction {
    /// Reply to a request
    Respond {
        /// Id from the matching `RequestReceived`
        request_id: u64,
        /// Reply
        response: Response,
    },

    /// Run `job` off the driver, then send `PasswordHashed` with the same id.
    /// The request's response comes from that second event.
    HashPassword {
        /// Id from the matching `RequestReceived`
        request_id: u64,
        /// Argon2 work to run
        job: PasswordJob,
    },

    /// Audit record: one per authentication attempt. Never contains secrets.
    Audit {
        /// Record text
        message: String,
    },

    /// Log a message (for debugging/monitoring)
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}

/// Log levels for server actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Action-based server driver.
pub struct ServerDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    auth: Authenticator<E>,
    mailbox: Mailbox,
    storage: S,
    env: E,
}

impl<E, S> ServerDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    /// Create a new server driver.
    pub fn new(env: E, storage: S, config: ServerConfig) -> Self {
        let auth = Authenticator::new(
            env.clone(),
            config.password_params,
            config.challenge_lifetime,
            config.session_lifetime,
        );
        Self { auth, mailbox: Mailbox::new(config.max_ciphertext_size), storage, env }
    }

    /// Process a server event and return actions to execute.
    ///
    /// Every request produces exactly one `Respond`, either directly or
    /// after its `HashPassword` comes back. Failures become error responses
    /// rather than driver errors.
    pub fn process_event(&mut self, event: ServerEvent) -> Vec<ServerAction> {
        match event {
            ServerEvent::RequestReceived { request_id, request } => {
                self.handle_request(request_id, request)
            },
            ServerEvent::PasswordHashed { request_id, result } => {
                self.handle_password_hashed(request_id, result)
            },
            ServerEvent::Tick => self.handle_tick(),
        }
    }

    /// Process `event` and run any password job it yields in place, so the
    /// returned actions hold the final response.
    ///
    /// For single-threaded callers that can afford to hold the driver while
    /// hashing.
    pub fn process_event_inline(&mut self, event: ServerEvent) -> Vec<ServerAction> {
        let mut actions = Vec::new();
        let mut queue = self.process_event(event);
        while !queue.is_empty() {
            let mut next = Vec::new();
            for action in queue {
                match action {
                    ServerAction::HashPassword { request_id, job } => {
                        let result = job.run();
                        next.extend(
                            self.process_event(ServerEvent::PasswordHashed { request_id, result }),
                        );
                    },
                    other => actions.push(other),
                }
            }
            queue = next;
        }
        actions
    }

    fn handle_request(&mut self, request_id: u64, request: Request) -> Vec<ServerAction> {
        let operation = request.body.name();
        let token = request.token_bytes().ok().flatten();
        let Request { username: caller, body, .. } = request;
        let mut actions = Vec::new();

        let result = match body {
            RequestBody::Register { username, password, public_key } => {
                let job = self.auth.begin_registration(
                    &self.storage,
                    &username,
                    &password,
                    &public_key,
                );
                match defer(request_id, "register", &username, job, &mut actions) {
                    Ok(()) => return actions,
                    Err(err) => Err(err),
                }
            },
            RequestBody::Login { username, password } => {
                let job = self.auth.begin_login(&self.storage, &username, &password);
                match defer(request_id, "password_login", &username, job, &mut actions) {
                    Ok(()) => return actions,
                    Err(err) => Err(err),
                }
            },
            body => self.dispatch(caller.as_deref(), token.as_deref(), body, &mut actions),
        };

        let response = into_response(operation, result, &mut actions);
        actions.push(ServerAction::Respond { request_id, response });
        actions
    }

    fn handle_password_hashed(
        &mut self,
        request_id: u64,
        result: HashedPassword,
    ) -> Vec<ServerAction> {
        let operation = result.work.operation();
        let event = match result.work {
            PasswordWork::Register { .. } => "register",
            PasswordWork::Login { .. } | PasswordWork::UnknownUser { .. } => "password_login",
        };
        let username = result.username().to_string();
        let mut actions = Vec::new();

        let outcome = self.auth.finish_password(&self.storage, result);
        audit(&mut actions, event, &username, outcome.as_ref().map(PasswordOutcome::role));

        let response = outcome.map_err(ServerError::from).map(|outcome| match outcome {
            PasswordOutcome::Registered(registration) => Response::Registered {
                token: registration.session.token.as_bytes().to_vec(),
                role: registration.session.role,
                welcome: registration.welcome,
            },
            PasswordOutcome::LoggedIn(session) => logged_in(session),
        });

        let response = into_response(operation, response, &mut actions);
        actions.push(ServerAction::Respond { request_id, response });
        actions
    }

    fn dispatch(
        &mut self,
        username: Option<&str>,
        token: Option<&[u8]>,
        body: RequestBody,
        actions: &mut Vec<ServerAction>,
    ) -> Result<Response, ServerError> {
        match body {
            RequestBody::BeginCertificateLogin { username } => {
                let result = self.auth.begin_certificate_login(&self.storage, &username);
                audit(actions, "challenge_issue", &username, result.as_ref().map(|(_, o)| *o));

                let (nonce, outcome) = result?;
                if outcome == IssueOutcome::Superseded {
                    actions.push(ServerAction::Log {
                        level: LogLevel::Debug,
                        message: format!("challenge for {username} superseded"),
                    });
                }
                Ok(Response::Challenge { nonce: nonce.to_vec() })
            },

            RequestBody::CompleteCertificateLogin { username, signature } => {
                let result =
                    self.auth.complete_certificate_login(&self.storage, &username, &signature);
                audit(actions, "challenge_verify", &username, result.as_ref().map(|s| s.role));
                Ok(logged_in(result?))
            },

            RequestBody::ListUsers => {
                Ok(Response::Users { usernames: self.storage.list_usernames()? })
            },

            body => {
                let caller = self.authorize(username, token, body.name(), actions)?;
                self.dispatch_authenticated(&caller, body, actions)
            },
        }
    }

    fn dispatch_authenticated(
        &mut self,
        caller: &UserRecord,
        body: RequestBody,
        actions: &mut Vec<ServerAction>,
    ) -> Result<Response, ServerError> {
        match body {
            RequestBody::GetPublicKey { username } => match self.storage.public_key(&username)? {
                Some(public_key) => Ok(Response::PublicKey { username, public_key }),
                None => Err(AuthError::UserNotFound.into()),
            },

            RequestBody::SendMessage { to, ciphertext } => {
                let timestamp = self.mailbox.enqueue(
                    &self.storage,
                    &caller.username,
                    &to,
                    &ciphertext,
                    self.env.wall_clock_secs(),
                )?;
                actions.push(ServerAction::Log {
                    level: LogLevel::Debug,
                    message: format!(
                        "queued {} bytes {} -> {to}",
                        ciphertext.len(),
                        caller.username
                    ),
                });
                Ok(Response::MessageQueued { timestamp })
            },

            RequestBody::FetchMessages { from } => {
                let messages = self.mailbox.drain_all(&self.storage, &caller.username, &from)?;
                actions.push(ServerAction::Log {
                    level: LogLevel::Debug,
                    message: format!(
                        "drained {} messages {from} -> {}",
                        messages.len(),
                        caller.username
                    ),
                });
                Ok(Response::Messages { messages })
            },

            RequestBody::SetBlocked { username, blocked } => {
                self.auth.set_blocked(&self.storage, caller, &username, blocked)?;
                actions.push(ServerAction::Log {
                    level: LogLevel::Info,
                    message: format!("{} set blocked={blocked} on {username}", caller.username),
                });
                Ok(Response::Ok)
            },

            public => Err(AuthError::InvalidRequest(format!(
                "{} does not take a session",
                public.name()
            ))
            .into()),
        }
    }

    fn authorize(
        &self,
        username: Option<&str>,
        token: Option<&[u8]>,
        operation: &str,
        actions: &mut Vec<ServerAction>,
    ) -> Result<UserRecord, ServerError> {
        let result = self.auth.authorize(&self.storage, username, token);
        if let Err(err) = &result {
            actions.push(ServerAction::Audit {
                message: format!(
                    "token_validation user={} operation={operation} outcome={}",
                    username.unwrap_or("-"),
                    err.code()
                ),
            });
        }
        Ok(result?)
    }

    fn handle_tick(&mut self) -> Vec<ServerAction> {
        self.auth
            .expire_challenges()
            .into_iter()
            .map(|username| ServerAction::Log {
                level: LogLevel::Debug,
                message: format!("challenge for {username} expired"),
            })
            .collect()
    }

    /// Get a reference to the storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Number of outstanding certificate-login challenges.
    pub fn pending_challenges(&self) -> usize {
        self.auth.challenges().len()
    }
}

impl<E, S> std::fmt::Debug for ServerDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDriver")
            .field("pending_challenges", &self.auth.challenges().len())
            .field("mailbox", &self.mailbox)
            .finish_non_exhaustive()
    }
}

/// Queue the password job, or report why the request failed before hashing.
fn defer(
    request_id: u64,
    event: &str,
    username: &str,
    job: Result<PasswordJob, AuthError>,
    actions: &mut Vec<ServerAction>,
) -> Result<(), ServerError> {
    match job {
        Ok(job) => {
            actions.push(ServerAction::HashPassword { request_id, job });
            Ok(())
        },
        Err(err) => {
            audit::<()>(actions, event, username, Err(&err));
            Err(err.into())
        },
    }
}

/// Turn a handler result into the reply, logging internal failures.
fn into_response(
    operation: &str,
    result: Result<Response, ServerError>,
    actions: &mut Vec<ServerAction>,
) -> Response {
    match result {
        Ok(response) => response,
        Err(err) => {
            let code = err.code();
            if err.is_internal() {
                actions.push(ServerAction::Log {
                    level: LogLevel::Error,
                    message: format!("{operation} failed: {err}"),
                });
                Response::error(code)
            } else {
                Response::Error(ErrorPayload::with_message(code, public_message(&err)))
            }
        },
    }
}

fn logged_in(session: IssuedSession) -> Response {
    Response::LoggedIn { token: session.token.as_bytes().to_vec(), role: session.role }
}

fn audit<T: std::fmt::Debug>(
    actions: &mut Vec<ServerAction>,
    event: &str,
    username: &str,
    result: Result<T, &AuthError>,
) {
    let outcome = match result {
        Ok(detail) => format!("ok ({detail:?})"),
        Err(err) => err.code().to_string(),
    };
    actions.push(ServerAction::Audit {
        message: format!("{event} user={username} outcome={outcome}"),
    });
}

/// Message text safe to return to a client.
fn public_message(err: &ServerError) -> String {
    match err {
        ServerError::Auth(AuthError::InvalidUsername(e)) => e.to_string(),
        ServerError::Auth(AuthError::InvalidRequest(reason)) => reason.clone(),
        ServerError::Mailbox(e) => e.to_string(),
        other => other.code().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use keyline_core::SystemEnv;
    use keyline_crypto::IdentityKeyPair;
    use keyline_proto::{ErrorCode, Role};

    use super::*;
    use crate::storage::{ChaoticStorage, MemoryStorage};

    fn config() -> ServerConfig {
        ServerConfig { password_params: PasswordParams::minimal(), ..ServerConfig::default() }
    }

    fn driver() -> ServerDriver<SystemEnv, MemoryStorage> {
        ServerDriver::new(SystemEnv::new(), MemoryStorage::new(), config())
    }

    fn respond<E: Environment, S: Storage>(
        driver: &mut ServerDriver<E, S>,
        request: Request,
    ) -> Response {
        let actions =
            driver.process_event_inline(ServerEvent::RequestReceived { request_id: 7, request });
        actions
            .into_iter()
            .find_map(|action| match action {
                ServerAction::Respond { request_id: 7, response } => Some(response),
                _ => None,
            })
            .expect("every request gets a response")
    }

    fn register<E: Environment, S: Storage>(
        driver: &mut ServerDriver<E, S>,
        name: &str,
        seed: u8,
    ) -> Vec<u8> {
        match respond(driver, register_request(name, seed)) {
            Response::Registered { token, .. } => token,
            other => panic!("unexpected response: {other:?}"),
        }
    }

    fn register_request(name: &str, seed: u8) -> Request {
        let identity = IdentityKeyPair::from_secret_bytes(&[seed; 64]);
        Request::anonymous(RequestBody::Register {
            username: name.to_string(),
            password: "pw".to_string(),
            public_key: identity.public().to_bytes().to_vec(),
        })
    }

    #[test]
    fn register_hashes_outside_then_responds() {
        let mut driver = driver();
        let actions = driver.process_event(ServerEvent::RequestReceived {
            request_id: 1,
            request: register_request("alice", 1),
        });

        let [ServerAction::HashPassword { request_id: 1, job }] = actions.as_slice() else {
            panic!("expected a single password job, got {actions:?}");
        };
        assert_eq!(job.username(), "alice");
        assert_eq!(driver.storage().user_count(), 0);

        let result = job.clone().run();
        let actions =
            driver.process_event(ServerEvent::PasswordHashed { request_id: 1, result });
        assert!(matches!(
            &actions[0],
            ServerAction::Audit { message } if message.starts_with("register user=alice outcome=ok")
        ));
        assert!(matches!(
            &actions[1],
            ServerAction::Respond {
                request_id: 1,
                response: Response::Registered { role: Role::Admin, .. }
            }
        ));
    }

    #[test]
    fn other_requests_proceed_while_a_hash_is_out() {
        let mut driver = driver();
        let alice = register(&mut driver, "alice", 1);

        let actions = driver.process_event(ServerEvent::RequestReceived {
            request_id: 2,
            request: Request::anonymous(RequestBody::Login {
                username: "alice".to_string(),
                password: "pw".to_string(),
            }),
        });
        let [ServerAction::HashPassword { job, .. }] = actions.as_slice() else {
            panic!("expected a single password job, got {actions:?}");
        };

        let response = respond(
            &mut driver,
            Request::authorized(
                "alice",
                &alice,
                RequestBody::FetchMessages { from: "bob".to_string() },
            ),
        );
        assert_eq!(response, Response::Messages { messages: Vec::new() });

        let actions = driver.process_event(ServerEvent::PasswordHashed {
            request_id: 2,
            result: job.clone().run(),
        });
        assert!(actions.iter().any(|a| matches!(
            a,
            ServerAction::Respond { request_id: 2, response: Response::LoggedIn { .. } }
        )));
    }

    #[test]
    fn duplicate_registration_answers_without_hashing() {
        let mut driver = driver();
        register(&mut driver, "alice", 1);

        let actions = driver.process_event(ServerEvent::RequestReceived {
            request_id: 3,
            request: register_request("alice", 2),
        });
        assert!(!actions.iter().any(|a| matches!(a, ServerAction::HashPassword { .. })));
        assert!(actions.iter().any(|a| matches!(
            a,
            ServerAction::Respond { request_id: 3, response }
                if response.error_code() == Some(ErrorCode::UserExists)
        )));
    }

    #[test]
    fn audit_never_contains_password() {
        let mut driver = driver();
        register(&mut driver, "alice", 1);

        let actions = driver.process_event_inline(ServerEvent::RequestReceived {
            request_id: 2,
            request: Request::anonymous(RequestBody::Login {
                username: "alice".to_string(),
                password: "s3cret-passphrase".to_string(),
            }),
        });
        for action in actions {
            if let ServerAction::Audit { message } | ServerAction::Log { message, .. } = action {
                assert!(!message.contains("s3cret"));
            }
        }
    }

    #[test]
    fn authenticated_call_requires_token() {
        let mut driver = driver();
        register(&mut driver, "alice", 1);

        let response = respond(
            &mut driver,
            Request::anonymous(RequestBody::GetPublicKey { username: "alice".to_string() }),
        );
        assert_eq!(response.error_code(), Some(ErrorCode::TokenInvalid));
    }

    #[test]
    fn send_then_fetch_through_driver() {
        let mut driver = driver();
        let alice = register(&mut driver, "alice", 1);
        let bob = register(&mut driver, "bob", 2);

        let response = respond(
            &mut driver,
            Request::authorized(
                "alice",
                &alice,
                RequestBody::SendMessage { to: "bob".to_string(), ciphertext: vec![1, 2, 3] },
            ),
        );
        assert!(matches!(response, Response::MessageQueued { .. }));

        let response = respond(
            &mut driver,
            Request::authorized(
                "bob",
                &bob,
                RequestBody::FetchMessages { from: "alice".to_string() },
            ),
        );
        match response {
            Response::Messages { messages } => {
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].sender, "alice");
                assert_eq!(messages[0].ciphertext, vec![1, 2, 3]);
            },
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn list_users_in_registration_order() {
        let mut driver = driver();
        register(&mut driver, "zed", 1);
        register(&mut driver, "amy", 2);

        let response = respond(&mut driver, Request::anonymous(RequestBody::ListUsers));
        let usernames = vec!["zed".to_string(), "amy".to_string()];
        assert_eq!(response, Response::Users { usernames });
    }

    #[test]
    fn storage_failure_becomes_internal_error() {
        let storage = ChaoticStorage::new(MemoryStorage::new(), 1.0);
        let mut driver = ServerDriver::new(SystemEnv::new(), storage, config());

        let actions = driver.process_event(ServerEvent::RequestReceived {
            request_id: 3,
            request: Request::anonymous(RequestBody::ListUsers),
        });
        assert!(
            actions
                .iter()
                .any(|a| matches!(a, ServerAction::Log { level: LogLevel::Error, .. }))
        );
        assert!(actions.iter().any(|a| matches!(
            a,
            ServerAction::Respond { response, .. }
                if response.error_code() == Some(ErrorCode::Internal)
        )));
    }

    #[test]
    fn tick_with_no_challenges_is_quiet() {
        let mut driver = driver();
        assert!(driver.process_event(ServerEvent::Tick).is_empty());
    }
}
