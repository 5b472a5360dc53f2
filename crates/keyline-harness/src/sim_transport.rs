//! Client transport over turmoil TCP.

use std::io::{self, ErrorKind};

use async_trait::async_trait;
use keyline_client::{Transport, TransportError};
use keyline_proto::{
    LENGTH_PREFIX_SIZE, Request, Response, decode_frame, encode_frame, frame_length,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::Mutex,
};
use turmoil::net::TcpStream;

/// Request/response over one simulated TCP connection.
///
/// The stream is taken out for the duration of a request. If the request is
/// abandoned midway (a client-side timeout), the half-used stream is dropped
/// and the next request dials a fresh connection, so a late response can
/// never be read as the answer to a different request.
pub struct SimTransport {
    address: String,
    stream: Mutex<Option<TcpStream>>,
}

impl SimTransport {
    /// Connect to `address` (e.g. `"server:443"`).
    pub async fn connect(address: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(address).await?;
        Ok(Self { address: address.to_string(), stream: Mutex::new(Some(stream)) })
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn round_trip(&self, request: Request) -> Result<Response, TransportError> {
        let mut slot = self.stream.lock().await;
        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => TcpStream::connect(self.address.as_str())
                .await
                .map_err(|e| TransportError::Connection(format!("reconnect failed: {e}")))?,
        };

        let response = exchange(&mut stream, &request).await?;
        *slot = Some(stream);
        Ok(response)
    }
}

async fn exchange(stream: &mut TcpStream, request: &Request) -> Result<Response, TransportError> {
    let mut buf = Vec::new();
    encode_frame(request, &mut buf)
        .map_err(|e| TransportError::Protocol(format!("encode failed: {e}")))?;
    stream.write_all(&buf).await.map_err(stream_error)?;
    stream.flush().await.map_err(stream_error)?;

    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    stream.read_exact(&mut prefix).await.map_err(stream_error)?;
    let size =
        frame_length(prefix).map_err(|e| TransportError::Protocol(format!("bad prefix: {e}")))?;

    let mut frame = vec![0u8; LENGTH_PREFIX_SIZE + size];
    frame[..LENGTH_PREFIX_SIZE].copy_from_slice(&prefix);
    stream.read_exact(&mut frame[LENGTH_PREFIX_SIZE..]).await.map_err(stream_error)?;

    decode_frame(&frame).map_err(|e| TransportError::Protocol(format!("decode failed: {e}")))
}

fn stream_error(e: io::Error) -> TransportError {
    if e.kind() == ErrorKind::UnexpectedEof {
        TransportError::Connection("server closed the connection".to_string())
    } else {
        TransportError::Stream(e.to_string())
    }
}
