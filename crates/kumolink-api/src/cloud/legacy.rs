// Cloud V2 (legacy) login
//
// The V2 service returns the whole account in one heterogeneous array from
// `POST /login`. Unit records live in `zoneTable` maps at
// `[2].children[*]` and one nested `children[*].children[*]` level.
// Unlike V3, V2 hands out passwords and cryptoSerials directly.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use url::Url;

use crate::credential::DeviceCredential;
use crate::error::Error;
use crate::transport::TransportConfig;

pub const LEGACY_BASE_URL: &str = "https://geo-c.kumocloud.com";
pub const LEGACY_APP_VERSION: &str = "2.2.0";

const ACCOUNT_INDEX: usize = 2;

/// One unit record from a V2 zone table. Any field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyUnit {
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub crypto_serial: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub unit_type: Option<String>,
}

impl LegacyUnit {
    /// Decode into a credential (base64 password, hex cryptoSerial).
    pub fn to_credential(&self) -> Result<DeviceCredential, Error> {
        let serial = self
            .serial
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::invalid_credential(None, "zone table entry has no serial"))?;
        let mut cred = DeviceCredential {
            address: non_empty(&self.address),
            label: non_empty(&self.label),
            unit_type: non_empty(&self.unit_type),
            mac: non_empty(&self.mac),
            ..DeviceCredential::new(serial)
        };
        if let Some(password) = self.password.as_deref() {
            cred.set_password_b64(password)?;
        }
        if let Some(crypto_serial) = self.crypto_serial.as_deref() {
            cred.set_crypto_serial_hex(crypto_serial)?;
        }
        Ok(cred)
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.is_empty())
}

/// Extract every unit from a V2 login response.
///
/// Missing or oddly shaped structure yields fewer (or no) units, never an
/// error.
pub fn parse_zone_table(response: &Value) -> Vec<LegacyUnit> {
    let mut units = Vec::new();
    let children = response
        .get(ACCOUNT_INDEX)
        .and_then(|account| account.get("children"))
        .and_then(Value::as_array);
    for child in children.into_iter().flatten() {
        collect_zone_table(child, &mut units);
        let grandchildren = child.get("children").and_then(Value::as_array);
        for grandchild in grandchildren.into_iter().flatten() {
            collect_zone_table(grandchild, &mut units);
        }
    }
    units
}

fn collect_zone_table(node: &Value, units: &mut Vec<LegacyUnit>) {
    let Some(table) = node.get("zoneTable").and_then(Value::as_object) else {
        return;
    };
    for raw in table.values() {
        match serde_json::from_value::<LegacyUnit>(raw.clone()) {
            Ok(unit) if unit.serial.as_deref().is_some_and(|s| !s.is_empty()) => {
                units.push(unit);
            }
            Ok(_) => debug!("zone table entry without serial"),
            Err(e) => debug!(error = %e, "skipping malformed zone table entry"),
        }
    }
}

/// Client for the V2 login endpoint.
pub struct LegacyCloudClient {
    http: reqwest::Client,
    base_url: Url,
}

impl LegacyCloudClient {
    pub fn new(base_url: &str, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            base_url: Url::parse(base_url)?,
        })
    }

    /// `POST /login`, returning the raw account array.
    pub async fn login_raw(&self, username: &str, password: &SecretString) -> Result<Value, Error> {
        let url = self.base_url.join("login")?;
        debug!("legacy login at {url}");

        let resp = self
            .http
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json, text/plain, */*")
            .json(&json!({
                "username": username,
                "password": password.expose_secret(),
                "appVersion": LEGACY_APP_VERSION,
            }))
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Authentication {
                message: format!("legacy login failed (HTTP {status}): {body}"),
            });
        }
        let text = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&text).map_err(|e| Error::deserialization(&e, text))
    }

    /// Log in and decode every unit into a credential.
    ///
    /// Units whose secrets fail to decode are logged and skipped.
    pub async fn credentials(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<Vec<DeviceCredential>, Error> {
        let raw = self.login_raw(username, password).await?;
        let credentials: Vec<DeviceCredential> = parse_zone_table(&raw)
            .iter()
            .filter_map(|unit| match unit.to_credential() {
                Ok(cred) => Some(cred),
                Err(e) => {
                    warn!(error = %e, "skipping legacy unit");
                    None
                }
            })
            .collect();
        info!(count = credentials.len(), "legacy account units");
        Ok(credentials)
    }
}
