//! Deterministic simulation harness for keyline.
//!
//! Turmoil-based implementations of the Environment and Transport traits for
//! deterministic, reproducible testing of the full client/server stack.
//!
//! - [`SimEnv`]: virtual clock and seeded RNG
//! - [`SimServer`] / [`SimTransport`]: driver and client over turmoil TCP
//! - [`LocalTransport`] / [`LocalWorld`]: in-process, for paused-time tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod local_transport;
pub mod sim_env;
pub mod sim_server;
pub mod sim_transport;
pub mod world;

pub use local_transport::LocalTransport;
pub use sim_env::{SIM_EPOCH_SECS, SimEnv};
pub use sim_server::{SharedDriver, SimServer, create_shared_driver, dispatch, sim_config};
pub use sim_transport::SimTransport;
pub use world::{LocalApi, LocalCoordinator, LocalWorld, identity};
