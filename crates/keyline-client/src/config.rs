//! Client configuration.

use std::{path::PathBuf, time::Duration};

/// Default bound on a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound on each server round trip
    pub request_timeout: Duration,
    /// Directory holding envelope artifacts, one subdirectory per owner
    pub envelope_root: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { request_timeout: DEFAULT_REQUEST_TIMEOUT, envelope_root: PathBuf::from("./chats") }
    }
}
