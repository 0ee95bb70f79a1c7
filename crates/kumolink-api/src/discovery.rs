// Address discovery by trial authentication.
//
// An adapter only answers a signed status query with a `{"r": ...}` body
// when the token was computed from its own password and cryptoSerial, so a
// successful probe identifies which serial lives at a candidate address.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::{AuthParams, DeviceKey};
use crate::credential::DeviceCredential;
use crate::error::Error;
use crate::local::LocalClient;
use crate::local::query::RESPONSE_KEY;
use crate::transport::TransportConfig;

/// Minimal status query sent to every candidate.
pub const PROBE_QUERY: &[u8] = br#"{"c":{"indoorUnit":{"status":{}}}}"#;

/// Binds serials to candidate addresses.
pub struct AddressMatcher {
    http: reqwest::Client,
    params: AuthParams,
}

impl AddressMatcher {
    /// Build with its own HTTP client, normally [`TransportConfig::probe`].
    pub fn new(params: AuthParams, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self::with_client(transport.build_client()?, params))
    }

    pub fn with_client(http: reqwest::Client, params: AuthParams) -> Self {
        Self { http, params }
    }

    /// `true` if `address` accepts a probe signed with `key`.
    ///
    /// Any transport error, non-JSON body or reply without a top-level `r`
    /// counts as a miss.
    pub async fn probe(&self, address: &str, key: &DeviceKey) -> bool {
        let client = LocalClient::with_client(self.http.clone(), address, key.clone(), self.params);
        match client.request(PROBE_QUERY).await {
            Ok(Value::Object(body)) => body.contains_key(RESPONSE_KEY),
            Ok(_) => false,
            Err(e) => {
                debug!(address, error = %e, "probe failed");
                false
            }
        }
    }

    /// Match credentials to candidate addresses.
    ///
    /// Candidates are tried in order; for each, outstanding credentials are
    /// probed in serial order and the first success claims the address.
    /// Returns serial → address. No address is bound to two serials, and
    /// credentials without usable key material are never probed.
    pub async fn match_addresses<S: AsRef<str>>(
        &self,
        credentials: &BTreeMap<String, DeviceCredential>,
        candidates: &[S],
    ) -> BTreeMap<String, String> {
        let keys: BTreeMap<&str, DeviceKey> = credentials
            .iter()
            .filter_map(|(serial, cred)| match cred.key() {
                Ok(key) => Some((serial.as_str(), key)),
                Err(e) => {
                    debug!(serial = %serial, error = %e, "skipping credential without key");
                    None
                }
            })
            .collect();

        let mut matched = BTreeMap::new();
        if keys.is_empty() || candidates.is_empty() {
            return matched;
        }
        info!(
            candidates = candidates.len(),
            devices = keys.len(),
            "probing candidate addresses"
        );

        let mut outstanding: BTreeSet<&str> = keys.keys().copied().collect();
        let mut seen = BTreeSet::new();
        for candidate in candidates {
            let address = candidate.as_ref();
            if outstanding.is_empty() {
                break;
            }
            if !seen.insert(address) {
                continue;
            }
            for serial in outstanding.clone() {
                if self.probe(address, &keys[serial]).await {
                    info!(serial, address, "matched adapter address");
                    matched.insert(serial.to_owned(), address.to_owned());
                    outstanding.remove(serial);
                    break;
                }
            }
        }

        if outstanding.is_empty() {
            info!(matched = matched.len(), "all adapters matched to addresses");
        } else {
            warn!(
                unmatched = ?outstanding,
                total = keys.len(),
                "some adapters could not be matched"
            );
        }
        matched
    }
}
