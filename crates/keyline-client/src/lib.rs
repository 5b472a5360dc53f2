//! Client
//!
//! Login flows, end-to-end key exchange and encrypted transcript storage for
//! keyline. The server relays ciphertext only; every key a conversation uses
//! is generated and unwrapped here.
//!
//! # Components
//!
//! - [`ApiClient`]: typed requests over a [`Transport`], bounded by a timeout
//! - [`Session`]: password and certificate login, registration
//! - [`Coordinator`]: per-peer key exchange and messaging
//! - [`EnvelopeStore`]: transcripts at rest, encrypted under a save key that
//!   is itself sealed to the owner's identity
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides
//! [`quic::QuicTransport`], one QUIC stream per request.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod api;
mod chat;
mod config;
mod coordinator;
mod envelope;
mod error;
mod session;
pub mod transport;

#[cfg(feature = "transport")]
pub mod quic;

pub use api::{ApiClient, LoginGrant};
pub use chat::{Chat, ChatMessage, ConversationFault};
pub use config::{ClientConfig, DEFAULT_REQUEST_TIMEOUT};
pub use coordinator::{Coordinator, KeyExchangeBranch, classify};
pub use envelope::{Envelope, EnvelopeStore};
pub use error::{ClientError, TransportError};
pub use keyline_core::Environment;
pub use session::Session;
pub use transport::Transport;
