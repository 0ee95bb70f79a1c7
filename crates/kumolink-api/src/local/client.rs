// Local adapter HTTP client
//
// One client per adapter address. Every request body is signed with a fresh
// token computed over the exact bytes sent; the adapter answers with HTTP 200
// for both results and in-band faults, so fault classification is left to the
// caller (see `fault`).

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::auth::{AuthParams, DeviceKey, TokenComputer};
use crate::error::Error;
use crate::local::query::reboot_command;
use crate::transport::TransportConfig;

const ACCEPT_VALUE: &str = "application/json, text/plain, */*";

/// Raw client for one adapter's local `/api` endpoint.
pub struct LocalClient {
    http: reqwest::Client,
    address: String,
    key: DeviceKey,
    tokens: TokenComputer,
}

impl LocalClient {
    /// Build a client for `address` (host or `host:port`) using `transport`
    /// timeouts, normally [`TransportConfig::local`].
    pub fn new(
        address: impl Into<String>,
        key: DeviceKey,
        params: AuthParams,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, address, key, params))
    }

    /// Wrap a pre-built `reqwest::Client` (probing shares one across many
    /// candidate pairs).
    pub fn with_client(
        http: reqwest::Client,
        address: impl Into<String>,
        key: DeviceKey,
        params: AuthParams,
    ) -> Self {
        Self {
            http,
            address: address.into(),
            key,
            tokens: TokenComputer::new(params),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn key(&self) -> &DeviceKey {
        &self.key
    }

    /// `http://{address}/api?m={token}`
    fn api_url(&self, token: &str) -> Result<Url, Error> {
        let mut url = Url::parse(&format!("http://{}/api", self.address))?;
        url.query_pairs_mut().append_pair("m", token);
        Ok(url)
    }

    /// Send pre-serialized command bytes and parse the JSON reply.
    ///
    /// In-band `_api_error` replies are returned as `Ok`; only transport
    /// failures, non-success statuses and unparseable bodies are errors.
    pub async fn request(&self, payload: &[u8]) -> Result<Value, Error> {
        let token = self.tokens.token(&self.key, payload);
        let url = self.api_url(&token)?;
        debug!(address = %self.address, "PUT /api");
        trace!(payload = %String::from_utf8_lossy(payload), "local request body");

        let resp = self
            .http
            .put(url)
            .header(ACCEPT, ACCEPT_VALUE)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::DeviceApi {
                code: format!("HTTP {status}"),
            });
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        trace!(address = %self.address, body = %body, "local response body");
        serde_json::from_str(&body).map_err(|e| Error::deserialization(&e, body.clone()))
    }

    /// Serialize `command` compactly and send it.
    pub async fn query(&self, command: &Value) -> Result<Value, Error> {
        let payload = serde_json::to_vec(command).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: String::new(),
        })?;
        self.request(&payload).await
    }

    /// Ask the adapter to restart. The reply, if any, is returned as-is.
    pub async fn reboot(&self) -> Result<Value, Error> {
        debug!(address = %self.address, "sending adapter reboot");
        self.query(&reboot_command()).await
    }
}
