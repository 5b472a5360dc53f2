//! QUIC transport for the client.
//!
//! One connection, one bidirectional stream per request. The request frame is
//! written and the send side finished; the response is whatever the server
//! writes before finishing its side.

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::Path,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::BytesMut;
use keyline_proto::{
    ALPN_PROTOCOL, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE, Request, Response, decode_frame,
    encode_frame,
};
use quinn::{ClientConfig, Endpoint};

use crate::transport::{Transport, TransportError};

const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// How the client decides whether to trust the server certificate.
#[derive(Debug, Clone, Copy)]
pub enum ServerTrust<'a> {
    /// Certificates chaining to the PEM-encoded CA bundle at this path
    CaBundle(&'a Path),
    /// Accept any certificate.
    ///
    /// WARNING: development only. Pairs with the server's self-signed mode.
    Insecure,
}

/// A QUIC connection to a keyline server.
pub struct QuicTransport {
    // Keeps the endpoint driver alive for the connection's lifetime.
    _endpoint: Endpoint,
    connection: quinn::Connection,
}

impl QuicTransport {
    /// Connect to `server_addr`, verifying the server as `server_name`.
    pub async fn connect(
        server_addr: &str,
        server_name: &str,
        trust: ServerTrust<'_>,
    ) -> Result<Self, TransportError> {
        let addr: SocketAddr = server_addr
            .parse()
            .map_err(|e| TransportError::Connection(format!("invalid address: {e}")))?;

        let client_config = match trust {
            ServerTrust::CaBundle(path) => ca_client_config(path)?,
            ServerTrust::Insecure => {
                tracing::warn!(
                    "Server certificate verification disabled - not for production use!"
                );
                insecure_client_config()?
            },
        };

        let mut endpoint = Endpoint::client(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
            .map_err(|e| TransportError::Connection(format!("endpoint creation failed: {e}")))?;
        endpoint.set_default_client_config(client_config);

        let connection = endpoint
            .connect(addr, server_name)
            .map_err(|e| TransportError::Connection(format!("connect failed: {e}")))?
            .await
            .map_err(|e| TransportError::Connection(format!("connection failed: {e}")))?;

        tracing::debug!("Connected to {}", addr);

        Ok(Self { _endpoint: endpoint, connection })
    }

    /// Close the connection. In-flight requests fail with a stream error.
    pub fn close(&self) {
        self.connection.close(0u32.into(), b"bye");
    }
}

#[async_trait]
impl Transport for QuicTransport {
    async fn round_trip(&self, request: Request) -> Result<Response, TransportError> {
        let (mut send, mut recv) = self
            .connection
            .open_bi()
            .await
            .map_err(|e| TransportError::Connection(format!("open_bi failed: {e}")))?;

        let mut buf = BytesMut::new();
        encode_frame(&request, &mut buf)
            .map_err(|e| TransportError::Protocol(format!("encode failed: {e}")))?;
        send.write_all(&buf)
            .await
            .map_err(|e| TransportError::Stream(format!("write failed: {e}")))?;
        send.finish().map_err(|e| TransportError::Stream(format!("finish failed: {e}")))?;

        let bytes = recv
            .read_to_end(MAX_FRAME_SIZE + LENGTH_PREFIX_SIZE)
            .await
            .map_err(|e| TransportError::Stream(format!("read failed: {e}")))?;

        decode_frame(&bytes).map_err(|e| TransportError::Protocol(format!("decode failed: {e}")))
    }
}

fn ca_client_config(path: &Path) -> Result<ClientConfig, TransportError> {
    let pem = std::fs::read(path).map_err(|e| {
        TransportError::Connection(format!("failed to read CA bundle '{}': {e}", path.display()))
    })?;

    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut &pem[..]) {
        let cert = cert
            .map_err(|e| TransportError::Connection(format!("failed to parse CA bundle: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| TransportError::Connection(format!("rejected CA certificate: {e}")))?;
    }

    let crypto =
        rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    quic_config(crypto)
}

fn insecure_client_config() -> Result<ClientConfig, TransportError> {
    let crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier))
        .with_no_client_auth();
    quic_config(crypto)
}

fn quic_config(mut crypto: rustls::ClientConfig) -> Result<ClientConfig, TransportError> {
    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let mut config = ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| TransportError::Connection(format!("QUIC config error: {e}")))?,
    ));

    let mut transport = quinn::TransportConfig::default();
    let idle = IDLE_TIMEOUT
        .try_into()
        .map_err(|e| TransportError::Connection(format!("idle timeout: {e}")))?;
    transport.max_idle_timeout(Some(idle));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Certificate verifier that accepts any certificate.
#[derive(Debug)]
struct InsecureCertVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_ca_bundle_is_a_connection_error() {
        let result = ca_client_config(Path::new("/nonexistent/ca.pem"));
        assert!(matches!(result, Err(TransportError::Connection(_))));
    }

    #[tokio::test]
    async fn invalid_address_is_rejected() {
        let result =
            QuicTransport::connect("not-an-address", "localhost", ServerTrust::Insecure).await;
        assert!(matches!(result, Err(TransportError::Connection(_))));
    }
}
