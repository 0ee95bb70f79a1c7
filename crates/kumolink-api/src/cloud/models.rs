// Cloud V3 response types
//
// Only the fields needed to resolve credentials are modelled; everything
// else in the payloads is ignored.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::credential::DeviceCredential;

/// Unit type assumed when a zone's adapter does not report one.
pub const DEFAULT_UNIT_TYPE: &str = "ductless";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LoginResponse {
    #[serde(default)]
    pub token: TokenPair,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TokenPair {
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// A site (home) on the account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Site {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A zone within a site; each zone fronts at most one adapter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Zone {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub adapter: Option<ZoneAdapter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneAdapter {
    #[serde(default)]
    pub device_serial: Option<String>,
    #[serde(default)]
    pub unit_type: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
}

/// `GET v3/devices/{serial}/status`; only `cryptoSerial` is interpreted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    #[serde(default)]
    pub crypto_serial: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// One adapter as enumerated through sites and zones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudDevice {
    pub serial: String,
    pub label: Option<String>,
    pub unit_type: String,
    pub mac: Option<String>,
    pub site_id: String,
}

impl CloudDevice {
    /// Build from a zone, or `None` when the zone has no adapter serial.
    pub fn from_zone(site_id: &str, zone: &Zone) -> Option<Self> {
        let adapter = zone.adapter.as_ref()?;
        let serial = adapter
            .device_serial
            .as_deref()
            .filter(|s| !s.is_empty())?;
        Some(Self {
            serial: serial.to_owned(),
            label: zone.name.clone().filter(|n| !n.is_empty()),
            unit_type: adapter
                .unit_type
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_UNIT_TYPE.to_owned()),
            mac: adapter.mac_address.clone().filter(|m| !m.is_empty()),
            site_id: site_id.to_owned(),
        })
    }
}

impl From<&CloudDevice> for DeviceCredential {
    fn from(device: &CloudDevice) -> Self {
        Self {
            label: device.label.clone(),
            unit_type: Some(device.unit_type.clone()),
            mac: device.mac.clone(),
            ..Self::new(device.serial.clone())
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
