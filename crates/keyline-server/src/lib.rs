//! keyline server.
//!
//! Authentication (password and certificate challenge-response), the
//! public-key directory and the store-and-forward mailbox for end-to-end
//! encrypted chats. The server only ever sees ciphertext and wrapped keys.
//!
//! # Architecture
//!
//! [`ServerDriver`] is sans-IO: it turns [`ServerEvent`]s into
//! [`ServerAction`]s and never touches the network or the clock directly.
//! [`Server`] is the production runtime that feeds it requests from Quinn
//! streams and periodic ticks, and executes the actions it returns.
//!
//! # Components
//!
//! - [`ServerDriver`]: request dispatch, audit records (pure logic, no I/O)
//! - [`Authenticator`]: password login, certificate login, token checks
//! - [`Mailbox`]: validated enqueue and drain over [`Storage`]
//! - [`Server`]: production runtime over [`QuinnTransport`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod driver;
mod error;
mod mailbox;
mod password_job;
mod server_error;
pub mod storage;
mod transport;

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

pub use auth::{AuthError, Authenticator, IssuedSession, PasswordOutcome, Registration};
use bytes::BytesMut;
pub use driver::{
    LogLevel, ServerAction, ServerConfig as DriverConfig, ServerDriver, ServerEvent,
};
pub use error::RuntimeError;
pub use keyline_core::{Environment, SystemEnv};
use keyline_proto::{
    ErrorCode, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE, Request, Response, decode_frame, encode_frame,
};
pub use mailbox::{DEFAULT_MAX_CIPHERTEXT_SIZE, Mailbox, MailboxError};
pub use password_job::{HashedPassword, PasswordJob};
pub use server_error::ServerError;
pub use storage::{ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError};
use tokio::sync::Mutex;
pub use transport::{QuinnConnection, QuinnTransport};

/// Tracing target for audit records.
pub const AUDIT_TARGET: &str = "keyline::audit";

/// Default interval between challenge expiry sweeps.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<PathBuf>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<PathBuf>,
    /// Redb database file. In-memory storage when absent.
    pub database_path: Option<PathBuf>,
    /// How often expired challenges are swept
    pub tick_interval: Duration,
    /// Driver configuration (lifetimes, limits, hashing cost)
    pub driver: DriverConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            database_path: None,
            tick_interval: DEFAULT_TICK_INTERVAL,
            driver: DriverConfig::default(),
        }
    }
}

type SharedDriver<S> = Arc<Mutex<ServerDriver<SystemEnv, S>>>;

/// Production keyline server.
///
/// Wraps `ServerDriver` with Quinn QUIC transport and system environment.
pub struct Server<S: Storage> {
    driver: ServerDriver<SystemEnv, S>,
    transport: QuinnTransport,
    tick_interval: Duration,
}

impl<S: Storage> Server<S> {
    /// Bind the transport and build a driver over `storage`.
    pub fn bind(config: ServerRuntimeConfig, storage: S) -> Result<Self, RuntimeError> {
        let driver = ServerDriver::new(SystemEnv::new(), storage, config.driver);
        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;

        Ok(Self { driver, transport, tick_interval: config.tick_interval })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, RuntimeError> {
        self.transport.local_addr()
    }

    /// Run the server, accepting connections and answering requests.
    ///
    /// Runs until the endpoint closes.
    pub async fn run(self) -> Result<(), RuntimeError> {
        tracing::info!("Server starting on {}", self.transport.local_addr()?);

        let driver: SharedDriver<S> = Arc::new(Mutex::new(self.driver));
        let request_ids = Arc::new(AtomicU64::new(0));

        tokio::spawn(run_ticks(Arc::clone(&driver), self.tick_interval));

        loop {
            match self.transport.accept().await {
                Ok(Some(conn)) => {
                    let driver = Arc::clone(&driver);
                    let request_ids = Arc::clone(&request_ids);

                    tokio::spawn(async move {
                        handle_connection(conn, driver, request_ids).await;
                    });
                },
                Ok(None) => {
                    tracing::info!("Endpoint closed, shutting down");
                    return Ok(());
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }
    }
}

async fn run_ticks<S: Storage>(driver: SharedDriver<S>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let actions = driver.lock().await.process_event(ServerEvent::Tick);
        execute_log_actions(actions);
    }
}

async fn handle_connection<S: Storage>(
    conn: QuinnConnection,
    driver: SharedDriver<S>,
    request_ids: Arc<AtomicU64>,
) {
    tracing::debug!("New connection from {}", conn.remote_addr());

    loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                let driver = Arc::clone(&driver);
                let request_id = request_ids.fetch_add(1, Ordering::Relaxed);

                tokio::spawn(async move {
                    if let Err(e) = handle_stream(request_id, send, recv, driver).await {
                        tracing::debug!("Stream error: {}", e);
                    }
                });
            },
            Err(e) => {
                tracing::debug!("Connection closed: {}", e);
                break;
            },
        }
    }
}

/// Read one request frame, run it through the driver, write one response.
///
/// A frame that cannot be read or decoded still gets an `InvalidRequest`
/// reply.
async fn handle_stream<S: Storage>(
    request_id: u64,
    mut send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    driver: SharedDriver<S>,
) -> Result<(), RuntimeError> {
    let response = match read_request(&mut recv).await {
        Ok(request) => {
            tracing::debug!(request_id, operation = request.body.name(), "request received");
            serve_request(&driver, request_id, request).await
        },
        Err(e) => {
            tracing::debug!(request_id, error = %e, "unreadable request");
            Response::error(ErrorCode::InvalidRequest)
        },
    };

    let mut buf = BytesMut::new();
    encode_frame(&response, &mut buf)?;
    send.write_all(&buf)
        .await
        .map_err(|e| RuntimeError::Transport(format!("write failed: {e}")))?;
    send.finish().map_err(|e| RuntimeError::Transport(format!("finish failed: {e}")))?;

    Ok(())
}

async fn read_request(recv: &mut quinn::RecvStream) -> Result<Request, RuntimeError> {
    let bytes = recv
        .read_to_end(MAX_FRAME_SIZE + LENGTH_PREFIX_SIZE)
        .await
        .map_err(|e| RuntimeError::Transport(format!("read failed: {e}")))?;
    Ok(decode_frame(&bytes)?)
}

/// Run one request through a shared driver and return its response.
///
/// Password jobs run on the blocking pool with the driver unlocked, so a
/// burst of logins never stalls mailbox or token traffic.
pub async fn serve_request<E, S>(
    driver: &Mutex<ServerDriver<E, S>>,
    request_id: u64,
    request: Request,
) -> Response
where
    E: Environment,
    S: Storage,
{
    let mut actions =
        driver.lock().await.process_event(ServerEvent::RequestReceived { request_id, request });

    while let Some(job) = take_password_job(&mut actions, request_id) {
        execute_log_actions(std::mem::take(&mut actions));
        let result = match tokio::task::spawn_blocking(move || job.run()).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(request_id, "password job failed: {e}");
                return Response::error(ErrorCode::Internal);
            },
        };
        actions =
            driver.lock().await.process_event(ServerEvent::PasswordHashed { request_id, result });
    }

    execute_actions(request_id, actions)
}

/// Remove the password job for `request_id` from `actions`, if there is one.
pub fn take_password_job(actions: &mut Vec<ServerAction>, request_id: u64) -> Option<PasswordJob> {
    let index = actions.iter().position(|action| {
        matches!(action, ServerAction::HashPassword { request_id: id, .. } if *id == request_id)
    })?;
    match actions.remove(index) {
        ServerAction::HashPassword { job, .. } => Some(job),
        _ => None,
    }
}

/// Execute driver actions for one request and return its response.
pub fn execute_actions(request_id: u64, actions: Vec<ServerAction>) -> Response {
    let mut response = None;
    let mut rest = Vec::with_capacity(actions.len());
    for action in actions {
        match action {
            ServerAction::Respond { request_id: id, response: r } if id == request_id => {
                response = Some(r);
            },
            other => rest.push(other),
        }
    }
    execute_log_actions(rest);

    response.unwrap_or_else(|| {
        tracing::error!(request_id, "driver produced no response");
        Response::error(ErrorCode::Internal)
    })
}

/// Forward `Log` and `Audit` actions to tracing.
pub fn execute_log_actions(actions: impl IntoIterator<Item = ServerAction>) {
    for action in actions {
        match action {
            ServerAction::Audit { message } => {
                tracing::info!(target: AUDIT_TARGET, "{}", message);
            },
            ServerAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            ServerAction::Respond { request_id, .. } => {
                tracing::warn!(request_id, "response with no waiting stream dropped");
            },
            ServerAction::HashPassword { request_id, .. } => {
                tracing::warn!(request_id, "password job with no waiting stream dropped");
            },
        }
    }
}
