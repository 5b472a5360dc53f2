//! Quinn-based QUIC transport implementation.
//!
//! Encrypted, multiplexed streams over UDP with TLS 1.3. Every request rides
//! its own bidirectional stream. Supports PEM certificates for deployments and
//! a generated self-signed certificate for local testing.
//!
//! ALPN is pinned to [`ALPN_PROTOCOL`], so a client speaking another protocol
//! version fails the handshake instead of sending frames we cannot parse.

use std::{net::SocketAddr, path::Path, sync::Arc};

use keyline_proto::ALPN_PROTOCOL;
use quinn::{Endpoint, RecvStream, SendStream, ServerConfig};

use crate::error::RuntimeError;

/// QUIC transport using Quinn.
///
/// # Security
///
/// Self-signed certificates (generated via `bind(addr, None, None)`) are only
/// for testing and log a warning. Deployments must use certificates from a CA
/// the clients trust.
pub struct QuinnTransport {
    endpoint: Endpoint,
}

impl QuinnTransport {
    /// Create and bind a new QUIC transport.
    ///
    /// If `cert_path` and `key_path` are both provided they are used for TLS.
    /// Otherwise a self-signed certificate is generated.
    pub fn bind(
        address: &str,
        cert_path: Option<&Path>,
        key_path: Option<&Path>,
    ) -> Result<Self, RuntimeError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| RuntimeError::Config(format!("invalid bind address '{address}': {e}")))?;

        let server_config = match (cert_path, key_path) {
            (Some(cert), Some(key)) => load_tls_config(cert, key)?,
            _ => generate_self_signed_config()?,
        };

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| RuntimeError::Transport(format!("failed to create endpoint: {e}")))?;

        tracing::info!("QUIC transport bound to {}", addr);

        Ok(Self { endpoint })
    }

    /// Accept a new QUIC connection.
    ///
    /// Returns `None` once the endpoint has been closed.
    pub async fn accept(&self) -> Result<Option<QuinnConnection>, RuntimeError> {
        let Some(incoming) = self.endpoint.accept().await else {
            return Ok(None);
        };

        let conn = incoming
            .await
            .map_err(|e| RuntimeError::Transport(format!("connection failed: {e}")))?;

        Ok(Some(QuinnConnection { connection: conn }))
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, RuntimeError> {
        self.endpoint
            .local_addr()
            .map_err(|e| RuntimeError::Transport(format!("failed to get local address: {e}")))
    }
}

/// A QUIC connection wrapper.
///
/// Clones are cheap and share the same underlying connection.
#[derive(Clone)]
pub struct QuinnConnection {
    connection: quinn::Connection,
}

impl QuinnConnection {
    /// Accept the next client-opened bidirectional stream.
    pub async fn accept_bi(&self) -> Result<(SendStream, RecvStream), RuntimeError> {
        self.connection
            .accept_bi()
            .await
            .map_err(|e| RuntimeError::Transport(format!("accept_bi failed: {e}")))
    }

    /// Remote peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_address()
    }
}

fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig, RuntimeError> {
    use std::fs;

    let cert_pem = fs::read(cert_path).map_err(|e| {
        RuntimeError::Config(format!("failed to read cert '{}': {e}", cert_path.display()))
    })?;

    let key_pem = fs::read(key_path).map_err(|e| {
        RuntimeError::Config(format!("failed to read key '{}': {e}", key_path.display()))
    })?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RuntimeError::Config(format!("failed to parse certificates: {e}")))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| RuntimeError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| RuntimeError::Config("no private key found".to_string()))?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| RuntimeError::Config(format!("invalid TLS config: {e}")))?;

    quic_config(tls_config)
}

fn generate_self_signed_config() -> Result<ServerConfig, RuntimeError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| RuntimeError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let cert_der = cert.cert.der().clone();
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key.into())
        .map_err(|e| RuntimeError::Config(format!("invalid TLS config: {e}")))?;

    tracing::warn!("Using self-signed certificate - not for production use!");

    quic_config(tls_config)
}

fn quic_config(mut tls_config: rustls::ServerConfig) -> Result<ServerConfig, RuntimeError> {
    tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    Ok(ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
            .map_err(|e| RuntimeError::Config(format!("QUIC config error: {e}")))?,
    )))
}
