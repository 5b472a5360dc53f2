//! In-process test world: one server driver, any number of users.

use std::{path::Path, sync::Arc};

use keyline_client::{ApiClient, ClientConfig, ClientError, Coordinator, Session};
use keyline_crypto::IdentityKeyPair;
use keyline_server::{DriverConfig, MemoryStorage};

use crate::{LocalTransport, SimEnv, sim_server::create_shared_driver, sim_server::sim_config};

/// API client type used throughout the world.
pub type LocalApi = ApiClient<Arc<LocalTransport>>;

/// Coordinator type used throughout the world.
pub type LocalCoordinator = Coordinator<SimEnv, Arc<LocalTransport>>;

/// Deterministic identity for tests.
pub fn identity(seed: u8) -> Arc<IdentityKeyPair> {
    Arc::new(IdentityKeyPair::from_secret_bytes(&[seed; 64]))
}

/// A server driver plus one shared transport into it.
pub struct LocalWorld {
    env: SimEnv,
    transport: Arc<LocalTransport>,
    config: ClientConfig,
}

impl LocalWorld {
    /// World with [`sim_config`] and the given seed.
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, sim_config())
    }

    /// World with an explicit driver configuration.
    pub fn with_config(seed: u64, config: DriverConfig) -> Self {
        let env = SimEnv::with_seed(seed);
        let driver = create_shared_driver(env.clone(), MemoryStorage::new(), config);
        Self {
            env,
            transport: Arc::new(LocalTransport::new(driver)),
            config: ClientConfig::default(),
        }
    }

    /// Environment shared by server and clients.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// The transport every client in this world uses.
    pub fn transport(&self) -> &Arc<LocalTransport> {
        &self.transport
    }

    /// A fresh API client bounded by the default request timeout.
    pub fn api(&self) -> LocalApi {
        ApiClient::new(Arc::clone(&self.transport), self.config.request_timeout)
    }

    /// Register `username` with the identity derived from `seed`.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        seed: u8,
    ) -> Result<Session, ClientError> {
        let (session, _welcome) =
            Session::register(&self.api(), &identity(seed), username, password).await?;
        Ok(session)
    }

    /// Coordinator for `session`, storing envelopes under `root`.
    pub fn coordinator(
        &self,
        session: Session,
        seed: u8,
        root: &Path,
    ) -> Result<LocalCoordinator, ClientError> {
        let config = ClientConfig { envelope_root: root.to_path_buf(), ..self.config.clone() };
        Coordinator::new(self.env.clone(), self.api(), session, identity(seed), &config)
    }
}
