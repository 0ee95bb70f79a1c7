// Shared transport configuration for building reqwest::Client instances.
//
// Local adapters, the cloud REST API, the realtime polling session and
// address probing all differ only in their timeout pair and default headers,
// so they share one builder here.

use std::time::Duration;

use reqwest::header::HeaderMap;

use crate::error::Error;

const USER_AGENT: &str = concat!("kumolink/", env!("CARGO_PKG_VERSION"));

/// Connect/read timeout pair plus the builder for HTTP clients.
///
/// Every outbound call carries both timeouts; hitting either one is a
/// soft failure for the caller, never a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::cloud()
    }
}

impl TransportConfig {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }

    /// Local adapter defaults: embedded HTTP servers answer fast or not at all.
    pub fn local() -> Self {
        Self::new(Duration::from_millis(1200), Duration::from_secs(8))
    }

    /// Cloud REST defaults.
    pub fn cloud() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(30))
    }

    /// Address probing defaults: one short budget per (address, credential) pair.
    pub fn probe() -> Self {
        Self::new(Duration::from_secs(3), Duration::from_secs(3))
    }

    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        self.builder().build().map_err(Error::Transport)
    }

    /// Build a `reqwest::Client` with additional default headers.
    ///
    /// Used by the cloud client to inject the app-version header on every request.
    pub fn build_client_with_headers(&self, headers: HeaderMap) -> Result<reqwest::Client, Error> {
        self.builder()
            .default_headers(headers)
            .build()
            .map_err(Error::Transport)
    }

    fn builder(&self) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .user_agent(USER_AGENT)
    }
}
