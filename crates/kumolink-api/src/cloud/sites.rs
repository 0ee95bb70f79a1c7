// Cloud V3 enumeration endpoints
//
// sites → zones → adapter. List endpoints that answer with anything other
// than a JSON array are treated as empty.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cloud::client::CloudClient;
use crate::cloud::models::{CloudDevice, DeviceStatus, Site, Zone};
use crate::error::Error;

impl CloudClient {
    /// `GET v3/sites/`
    pub async fn sites(&self) -> Result<Vec<Site>, Error> {
        debug!("listing sites");
        Ok(parse_list(self.get_json("v3/sites/").await?))
    }

    /// `GET v3/sites/{id}/zones`
    pub async fn zones(&self, site_id: &str) -> Result<Vec<Zone>, Error> {
        debug!(site_id, "listing zones");
        Ok(parse_list(
            self.get_json(&format!("v3/sites/{site_id}/zones")).await?,
        ))
    }

    /// `GET v3/devices/{serial}/status`
    pub async fn device_status(&self, serial: &str) -> Result<DeviceStatus, Error> {
        debug!(serial, "fetching device status");
        let value = self
            .get_json(&format!("v3/devices/{serial}/status"))
            .await?;
        serde_json::from_value(value.clone())
            .map_err(|e| Error::deserialization(&e, value.to_string()))
    }

    /// Flatten every site's zones into one record per adapter.
    ///
    /// Sites without an id and zones without an adapter serial are skipped.
    /// A serial seen twice keeps its first record.
    pub async fn devices(&self) -> Result<Vec<CloudDevice>, Error> {
        let mut devices: Vec<CloudDevice> = Vec::new();
        for site in self.sites().await? {
            let Some(site_id) = site.id.as_deref() else {
                debug!(name = ?site.name, "skipping site without id");
                continue;
            };
            for zone in self.zones(site_id).await? {
                match CloudDevice::from_zone(site_id, &zone) {
                    Some(device) if devices.iter().all(|d| d.serial != device.serial) => {
                        devices.push(device);
                    }
                    Some(device) => debug!(serial = %device.serial, "duplicate zone adapter"),
                    None => debug!(zone = ?zone.name, "zone has no adapter serial"),
                }
            }
        }
        if devices.is_empty() {
            warn!("no devices found on cloud account");
        }
        Ok(devices)
    }
}

fn parse_list<T: DeserializeOwned>(value: Value) -> Vec<T> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    debug!(error = %e, "skipping malformed list entry");
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn non_array_lists_are_empty() {
        assert!(parse_list::<Site>(json!({ "error": "nope" })).is_empty());
        assert!(parse_list::<Site>(json!(null)).is_empty());
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let sites: Vec<Site> = parse_list(json!([{ "id": "a" }, "junk", { "id": 2 }]));
        let ids: Vec<_> = sites.iter().filter_map(|s| s.id.as_deref()).collect();
        assert_eq!(ids, ["a", "2"]);
    }
}
