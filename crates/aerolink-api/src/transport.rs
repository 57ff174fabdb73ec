// Shared transport configuration for building reqwest::Client instances.
//
// The session manager and the cloud client each own a client built
// through this module, so timeout and user-agent settings stay in sync.

use std::time::Duration;

use crate::error::Error;

/// Client-side HTTP timeout. A hung request fails the call after this
/// long; it does not hold the caller's command mutex for longer.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("aerolink/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::Transport)
    }
}
