//! Request/response transport seam.
//!
//! The client speaks one request, one response. Production uses QUIC (see the
//! `quic` module behind the `transport` feature); the simulation harness
//! plugs in turmoil TCP or an in-process driver.

use async_trait::async_trait;
use keyline_proto::{Request, Response};

pub use crate::error::TransportError;

/// Carries a single request to the server and returns its response.
///
/// Implementations need not enforce a timeout; [`crate::ApiClient`] bounds
/// every call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and wait for the matching response.
    async fn round_trip(&self, request: Request) -> Result<Response, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn round_trip(&self, request: Request) -> Result<Response, TransportError> {
        (**self).round_trip(request).await
    }
}
