// ── Typed status records ──
//
// Projections of the adapter's `indoorUnit.status`, `sensors.N`,
// `indoorUnit.profile` and `adapter.status` objects. Every field is
// optional; a field of the wrong JSON type reads as absent rather than
// failing the whole record.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Placeholder reported for unknown string fields.
pub const UNKNOWN: &str = "unknown";

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Decode a record from an adapter object; non-objects give the empty record.
fn project<T: DeserializeOwned + Default>(raw: &Value) -> T {
    if raw.is_object() {
        serde_json::from_value(raw.clone()).unwrap_or_default()
    } else {
        T::default()
    }
}

// ── Indoor unit ─────────────────────────────────────────────────────

/// `indoorUnit.status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndoorStatus {
    #[serde(default, deserialize_with = "lenient")]
    pub mode: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub standby: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub sp_heat: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub sp_cool: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub room_temp: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub fan_speed: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub vane_dir: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub filter_dirty: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub defrost: Option<bool>,
}

impl IndoorStatus {
    /// Attributes fetched individually when the whole object cannot be.
    pub const ATTRIBUTES: &'static [&'static str] = &[
        "mode",
        "standby",
        "spHeat",
        "spCool",
        "roomTemp",
        "fanSpeed",
        "vaneDir",
        "filterDirty",
        "defrost",
    ];

    pub fn from_value(raw: &Value) -> Self {
        project(raw)
    }

    pub fn mode(&self) -> &str {
        self.mode.as_deref().unwrap_or(UNKNOWN)
    }

    pub fn fan_speed(&self) -> &str {
        self.fan_speed.as_deref().unwrap_or(UNKNOWN)
    }

    pub fn vane_dir(&self) -> &str {
        self.vane_dir.as_deref().unwrap_or(UNKNOWN)
    }
}

// ── Sensors ─────────────────────────────────────────────────────────

/// `sensors.N`, or the humidity-only entry synthesised from a thermostat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    #[serde(default, deserialize_with = "lenient")]
    pub uuid: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub humidity: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub battery: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub rssi: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub tx_power: Option<f64>,
}

impl Sensor {
    pub const ATTRIBUTES: &'static [&'static str] = &[
        "uuid",
        "humidity",
        "temperature",
        "battery",
        "rssi",
        "txPower",
    ];

    pub fn from_value(raw: &Value) -> Self {
        project(raw)
    }

    /// A sensor slot is occupied only when it reports a non-empty uuid.
    pub fn is_present(&self) -> bool {
        self.uuid.as_deref().is_some_and(|u| !u.is_empty())
    }

    pub fn humidity_only(humidity: f64) -> Self {
        Self {
            humidity: Some(humidity),
            ..Self::default()
        }
    }
}

// ── Profile ─────────────────────────────────────────────────────────

/// `indoorUnit.profile`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, deserialize_with = "lenient")]
    pub number_of_fan_speeds: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub has_fan_speed_auto: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub has_vane_swing: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub has_mode_dry: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub has_mode_heat: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub has_mode_vent: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub has_mode_auto: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub has_vane_dir: Option<bool>,
}

impl Profile {
    pub const ATTRIBUTES: &'static [&'static str] = &[
        "numberOfFanSpeeds",
        "hasFanSpeedAuto",
        "hasVaneSwing",
        "hasModeDry",
        "hasModeHeat",
        "hasModeVent",
        "hasModeAuto",
        "hasVaneDir",
    ];

    pub fn from_value(raw: &Value) -> Self {
        project(raw)
    }
}

// ── Adapter ─────────────────────────────────────────────────────────

/// `adapter.status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterStatus {
    #[serde(default, deserialize_with = "lenient")]
    pub auto_mode_prevention: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub user_has_mode_dry: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub user_has_mode_heat: Option<bool>,
    #[serde(default)]
    pub local_network: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub run_state: Option<String>,
}

impl AdapterStatus {
    pub const ATTRIBUTES: &'static [&'static str] = &[
        "autoModePrevention",
        "userHasModeDry",
        "userHasModeHeat",
        "localNetwork",
        "runState",
    ];

    pub fn from_value(raw: &Value) -> Self {
        project(raw)
    }

    /// `localNetwork.stationMode.RSSI`
    pub fn wifi_rssi(&self) -> Option<f64> {
        self.local_network
            .as_ref()?
            .get("stationMode")?
            .get("RSSI")?
            .as_f64()
    }

    pub fn run_state(&self) -> &str {
        self.run_state.as_deref().unwrap_or(UNKNOWN)
    }
}

// ── Capabilities ────────────────────────────────────────────────────

/// What the unit can do once adapter-level user settings are applied
/// on top of the indoor unit's profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capabilities {
    pub fan_speeds: Option<u32>,
    pub fan_speed_auto: bool,
    pub vane_swing: bool,
    pub vane_dir: bool,
    pub mode_dry: bool,
    pub mode_heat: bool,
    pub mode_vent: bool,
    pub mode_auto: bool,
    pub wifi_rssi: Option<f64>,
    pub run_state: String,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::resolve(&Profile::default(), &AdapterStatus::default())
    }
}

impl Capabilities {
    /// Auto mode is allowed unless the adapter prevents it; dry and heat
    /// need both the profile and the adapter's user flag.
    pub fn resolve(profile: &Profile, adapter: &AdapterStatus) -> Self {
        let flag = |value: Option<bool>| value.unwrap_or(false);
        Self {
            fan_speeds: profile.number_of_fan_speeds,
            fan_speed_auto: flag(profile.has_fan_speed_auto),
            vane_swing: flag(profile.has_vane_swing),
            vane_dir: flag(profile.has_vane_dir),
            mode_dry: flag(profile.has_mode_dry) && flag(adapter.user_has_mode_dry),
            mode_heat: flag(profile.has_mode_heat) && flag(adapter.user_has_mode_heat),
            mode_vent: flag(profile.has_mode_vent),
            mode_auto: !flag(adapter.auto_mode_prevention),
            wifi_rssi: adapter.wifi_rssi(),
            run_state: adapter.run_state().to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn wrong_types_read_as_absent() {
        let status = IndoorStatus::from_value(&json!({
            "mode": "heat",
            "spHeat": "twenty",
            "roomTemp": 21.5,
            "standby": null,
            "tempSource": "unit"
        }));
        assert_eq!(status.mode(), "heat");
        assert_eq!(status.sp_heat, None);
        assert_eq!(status.room_temp, Some(21.5));
        assert_eq!(status.standby, None);
        assert_eq!(status.fan_speed(), UNKNOWN);
    }

    #[test]
    fn non_object_gives_empty_record() {
        assert_eq!(IndoorStatus::from_value(&json!("busy")), IndoorStatus::default());
        assert_eq!(Profile::from_value(&Value::Null), Profile::default());
    }

    #[test]
    fn sensor_presence_needs_uuid() {
        assert!(Sensor::from_value(&json!({ "uuid": "abc", "humidity": 41 })).is_present());
        assert!(!Sensor::from_value(&json!({ "uuid": "", "humidity": 41 })).is_present());
        assert!(!Sensor::from_value(&json!({ "uuid": null })).is_present());
        assert!(!Sensor::humidity_only(40.0).is_present());
    }

    #[test]
    fn adapter_settings_override_profile() {
        let profile = Profile::from_value(&json!({
            "numberOfFanSpeeds": 5,
            "hasModeDry": true,
            "hasModeHeat": true,
            "hasModeAuto": false,
            "hasVaneDir": true
        }));
        let adapter = AdapterStatus::from_value(&json!({
            "autoModePrevention": false,
            "userHasModeDry": true,
            "localNetwork": { "stationMode": { "RSSI": -61 } },
            "runState": "normal"
        }));

        let caps = Capabilities::resolve(&profile, &adapter);

        assert_eq!(caps.fan_speeds, Some(5));
        assert!(caps.mode_auto, "auto allowed unless prevented");
        assert!(caps.mode_dry);
        assert!(!caps.mode_heat, "heat needs the user flag");
        assert!(caps.vane_dir);
        assert_eq!(caps.wifi_rssi, Some(-61.0));
        assert_eq!(caps.run_state, "normal");
    }

    #[test]
    fn unknown_defaults() {
        let caps = Capabilities::default();
        assert!(caps.mode_auto);
        assert!(!caps.mode_dry);
        assert_eq!(caps.wifi_rssi, None);
        assert_eq!(caps.run_state, UNKNOWN);
    }
}
