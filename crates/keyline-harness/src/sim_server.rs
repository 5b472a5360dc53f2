//! Simulation server wrapper for testing with turmoil.
//!
//! `SimServer` drives a `ServerDriver` over turmoil's deterministic TCP. Each
//! connection carries a sequence of length-prefixed request frames and gets
//! one response frame per request, in order.

use std::{
    io::{self, ErrorKind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use keyline_crypto::PasswordParams;
use keyline_proto::{
    ErrorCode, LENGTH_PREFIX_SIZE, Request, Response, decode_frame, encode_frame, frame_length,
};
use keyline_server::{
    DriverConfig, MemoryStorage, ServerDriver, ServerEvent, Storage, execute_actions,
    execute_log_actions, take_password_job,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::Mutex,
};
use turmoil::net::{TcpListener, TcpStream};

use crate::SimEnv;

/// Driver shared between connection tasks and test code.
pub type SharedDriver<S = MemoryStorage> = Arc<Mutex<ServerDriver<SimEnv, S>>>;

/// Driver configuration for simulation: default lifetimes, cheapest Argon2.
pub fn sim_config() -> DriverConfig {
    DriverConfig { password_params: PasswordParams::minimal(), ..DriverConfig::default() }
}

/// Build a shared driver over `storage`.
pub fn create_shared_driver<S: Storage>(
    env: SimEnv,
    storage: S,
    config: DriverConfig,
) -> SharedDriver<S> {
    Arc::new(Mutex::new(ServerDriver::new(env, storage, config)))
}

/// Run one request through `driver` and return its response.
///
/// Follows the production runtime: password jobs run with the driver
/// unlocked, so other requests interleave with a login. The job runs inline
/// rather than on a blocking thread to keep the simulation deterministic.
pub async fn dispatch<S: Storage>(
    driver: &SharedDriver<S>,
    request_id: u64,
    request: Request,
) -> Response {
    let mut actions = driver
        .lock()
        .await
        .process_event(ServerEvent::RequestReceived { request_id, request });

    while let Some(job) = take_password_job(&mut actions, request_id) {
        execute_log_actions(std::mem::take(&mut actions));
        tokio::task::yield_now().await;
        let result = job.run();
        actions = driver
            .lock()
            .await
            .process_event(ServerEvent::PasswordHashed { request_id, result });
    }

    execute_actions(request_id, actions)
}

/// Simulation server for testing with turmoil.
pub struct SimServer {
    driver: SharedDriver,
    listener: TcpListener,
    tick_interval: Duration,
}

impl SimServer {
    /// Bind with [`sim_config`] and a zero-seeded environment.
    pub async fn bind(address: &str) -> io::Result<Self> {
        Self::bind_with_config(address, sim_config(), SimEnv::new()).await
    }

    /// Bind with explicit configuration and environment.
    pub async fn bind_with_config(
        address: &str,
        config: DriverConfig,
        env: SimEnv,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        let driver = create_shared_driver(env, MemoryStorage::new(), config);

        Ok(Self { driver, listener, tick_interval: keyline_server::DEFAULT_TICK_INTERVAL })
    }

    /// Handle to the driver, for inspecting server state from the test.
    pub fn driver(&self) -> SharedDriver {
        Arc::clone(&self.driver)
    }

    /// Accept connections and answer requests until the simulation ends.
    pub async fn run(self) -> io::Result<()> {
        let request_ids = Arc::new(AtomicU64::new(0));

        let ticker = Arc::clone(&self.driver);
        let interval = self.tick_interval;
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            loop {
                ticks.tick().await;
                let actions = ticker.lock().await.process_event(ServerEvent::Tick);
                execute_log_actions(actions);
            }
        });

        loop {
            let (stream, addr) = self.listener.accept().await?;
            tracing::debug!("New connection from {}", addr);

            let driver = Arc::clone(&self.driver);
            let request_ids = Arc::clone(&request_ids);
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, driver, request_ids).await {
                    tracing::debug!("Connection error: {}", e);
                }
            });
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    driver: SharedDriver,
    request_ids: Arc<AtomicU64>,
) -> io::Result<()> {
    loop {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        match stream.read_exact(&mut prefix).await {
            Ok(_) => {},
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }

        let size = frame_length(prefix).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
        let mut frame = vec![0u8; LENGTH_PREFIX_SIZE + size];
        frame[..LENGTH_PREFIX_SIZE].copy_from_slice(&prefix);
        stream.read_exact(&mut frame[LENGTH_PREFIX_SIZE..]).await?;

        let request_id = request_ids.fetch_add(1, Ordering::Relaxed);
        let response = match decode_frame::<Request>(&frame) {
            Ok(request) => dispatch(&driver, request_id, request).await,
            Err(e) => {
                tracing::debug!(request_id, error = %e, "undecodable request");
                Response::error(ErrorCode::InvalidRequest)
            },
        };

        let mut buf = Vec::new();
        encode_frame(&response, &mut buf).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
        stream.write_all(&buf).await?;
        stream.flush().await?;
    }
}
