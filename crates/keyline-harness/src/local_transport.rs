//! In-process transport straight into a shared driver.
//!
//! No network at all, which makes it the tool for paused-time tests: session
//! and challenge expiry, client timeouts.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use async_trait::async_trait;
use keyline_client::{Transport, TransportError};
use keyline_proto::{Request, Response};
use keyline_server::{MemoryStorage, Storage};

use crate::sim_server::{SharedDriver, dispatch};

/// Transport that hands requests directly to a [`SharedDriver`].
pub struct LocalTransport<S: Storage = MemoryStorage> {
    driver: SharedDriver<S>,
    stalled: AtomicBool,
    request_ids: Arc<AtomicU64>,
}

impl<S: Storage> LocalTransport<S> {
    /// Transport into `driver`.
    pub fn new(driver: SharedDriver<S>) -> Self {
        Self { driver, stalled: AtomicBool::new(false), request_ids: Arc::new(AtomicU64::new(0)) }
    }

    /// While stalled, requests never reach the server and never complete.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// The driver behind this transport.
    pub fn driver(&self) -> &SharedDriver<S> {
        &self.driver
    }
}

#[async_trait]
impl<S: Storage> Transport for LocalTransport<S> {
    async fn round_trip(&self, request: Request) -> Result<Response, TransportError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let request_id = self.request_ids.fetch_add(1, Ordering::Relaxed);
        Ok(dispatch(&self.driver, request_id, request).await)
    }
}
