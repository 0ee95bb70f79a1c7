// ── Per-unit client ──
//
// Owns one adapter's query engine and the last projected state. Refreshes
// are throttled by a cache interval; a unit with no known mode always
// refreshes.

use std::time::Duration;

use kumolink_api::local::query::RESPONSE_KEY;
use kumolink_api::{
    ApiFault, AuthParams, DeviceCredential, LocalClient, QueryPath, TransportConfig,
};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::query::{QueryPolicy, ResilientQueryEngine};
use crate::schedule::{self, ScheduleEvents};
use crate::status::{AdapterStatus, Capabilities, IndoorStatus, Profile, Sensor};

/// Sensor slots probed under `sensors.N`.
pub const MAX_SENSORS: usize = 4;

/// Knobs for building a [`KumoUnit`].
#[derive(Debug, Clone, Copy)]
pub struct UnitConfig {
    pub policy: QueryPolicy,
    pub cache_interval: Duration,
    pub transport: TransportConfig,
    pub params: AuthParams,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            policy: QueryPolicy::default(),
            cache_interval: Duration::from_secs(5),
            transport: TransportConfig::local(),
            params: AuthParams::default(),
        }
    }
}

/// One indoor unit reachable over the local API.
pub struct KumoUnit {
    name: String,
    serial: String,
    engine: ResilientQueryEngine,
    cache_interval: Duration,
    last_update: Option<Instant>,
    status: IndoorStatus,
    sensors: Vec<Sensor>,
    profile: Profile,
    adapter: AdapterStatus,
    capabilities: Capabilities,
    mhk2: Option<Value>,
}

impl KumoUnit {
    pub fn new(
        name: impl Into<String>,
        serial: impl Into<String>,
        engine: ResilientQueryEngine,
        cache_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            serial: serial.into(),
            engine,
            cache_interval,
            last_update: None,
            status: IndoorStatus::default(),
            sensors: Vec::new(),
            profile: Profile::default(),
            adapter: AdapterStatus::default(),
            capabilities: Capabilities::default(),
            mhk2: None,
        }
    }

    /// Build from an assembled credential. Needs an address and key material.
    pub fn from_credential(
        name: impl Into<String>,
        credential: &DeviceCredential,
        config: &UnitConfig,
    ) -> Result<Self, CoreError> {
        let address = credential
            .address
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| CoreError::InvalidCredential {
                message: format!("no address known for {}", credential.serial),
            })?;
        let key = credential.key()?;
        let client = LocalClient::new(address, key, config.params, &config.transport)?;
        let engine = ResilientQueryEngine::new(client, config.policy);
        Ok(Self::new(
            name,
            credential.serial.clone(),
            engine,
            config.cache_interval,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn address(&self) -> &str {
        self.engine.client().address()
    }

    pub fn engine(&self) -> &ResilientQueryEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ResilientQueryEngine {
        &mut self.engine
    }

    pub fn status(&self) -> &IndoorStatus {
        &self.status
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn adapter(&self) -> &AdapterStatus {
        &self.adapter
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Raw `mhk2` object when a wired thermostat is attached.
    pub fn mhk2(&self) -> Option<&Value> {
        self.mhk2.as_ref()
    }

    /// First humidity reported by any sensor, including a thermostat.
    pub fn current_humidity(&self) -> Option<f64> {
        self.sensors.iter().find_map(|s| s.humidity)
    }

    fn is_stale(&self) -> bool {
        self.status.mode.is_none()
            || self
                .last_update
                .is_none_or(|at| at.elapsed() > self.cache_interval)
    }

    /// Refresh cached state if the cache interval elapsed or no mode is known.
    ///
    /// Returns `false` when a required object could not be obtained; whatever
    /// was refreshed before that point is kept.
    pub async fn refresh(&mut self) -> bool {
        if !self.is_stale() {
            return true;
        }

        let path = QueryPath::new(["indoorUnit", "status"]);
        let response = self.engine.retrieve(&path, IndoorStatus::ATTRIBUTES).await;
        let Some(raw) = path.extract(&response) else {
            warn!(unit = %self.name, response = %response, "status missing from response");
            return false;
        };
        self.status = IndoorStatus::from_value(raw);
        self.last_update = Some(Instant::now());

        if !self.refresh_sensors().await {
            return false;
        }

        let path = QueryPath::new(["indoorUnit", "profile"]);
        let response = self.engine.retrieve(&path, Profile::ATTRIBUTES).await;
        let Some(raw) = path.extract(&response) else {
            warn!(unit = %self.name, response = %response, "profile missing from response");
            return false;
        };
        self.profile = Profile::from_value(raw);

        let path = QueryPath::new(["adapter", "status"]);
        let response = self.engine.retrieve(&path, AdapterStatus::ATTRIBUTES).await;
        let Some(raw) = path.extract(&response) else {
            warn!(unit = %self.name, response = %response, "adapter status missing from response");
            return false;
        };
        self.adapter = AdapterStatus::from_value(raw);
        self.capabilities = Capabilities::resolve(&self.profile, &self.adapter);

        self.refresh_mhk2().await;
        debug!(unit = %self.name, mode = self.status.mode(), "unit refreshed");
        true
    }

    async fn refresh_sensors(&mut self) -> bool {
        self.sensors.clear();
        for index in 0..MAX_SENSORS {
            let path = QueryPath::new(["sensors".to_owned(), index.to_string()]);
            let response = self.engine.retrieve(&path, Sensor::ATTRIBUTES).await;
            let Some(raw) = path.extract(&response) else {
                warn!(unit = %self.name, index, response = %response, "sensor slot missing from response");
                return false;
            };
            let sensor = Sensor::from_value(raw);
            if !sensor.is_present() {
                break;
            }
            self.sensors.push(sensor);
        }
        true
    }

    /// Optional wired thermostat; failures are informational only.
    async fn refresh_mhk2(&mut self) {
        let path = QueryPath::new(["mhk2", "status"]);
        let response = match self.engine.client().query(&path.to_query()).await {
            Ok(response) => response,
            Err(e) => {
                info!(unit = %self.name, error = %e, "no thermostat status");
                return;
            }
        };
        let Some(mhk2) = response
            .get(RESPONSE_KEY)
            .and_then(|r| r.get("mhk2"))
        else {
            info!(unit = %self.name, response = %response, "no thermostat in response");
            return;
        };
        self.mhk2 = Some(mhk2.clone());
        if let Some(humidity) = mhk2
            .get("status")
            .and_then(|s| s.get("indoorHumid"))
            .and_then(Value::as_f64)
        {
            self.sensors.push(Sensor::humidity_only(humidity));
        }
    }

    pub async fn fetch_schedule(&self) -> Result<ScheduleEvents, CoreError> {
        schedule::fetch_schedule(self.engine.client()).await
    }

    pub async fn push_schedule(&self, events: &ScheduleEvents) -> Result<usize, CoreError> {
        schedule::push_schedule(self.engine.client(), events, schedule::DEFAULT_BATCH_SIZE).await
    }

    /// Ask the adapter to restart, outside the automatic recovery path.
    ///
    /// Once the adapter accepts, cached state is marked stale so the next
    /// [`refresh`](Self::refresh) queries it again.
    pub async fn reboot(&mut self) -> Result<(), CoreError> {
        let response = self.engine.client().reboot().await?;
        if let Some(fault) = ApiFault::classify(&response) {
            warn!(unit = %self.name, fault = %fault, "reboot not accepted");
            return Err(CoreError::Api {
                message: format!("reboot rejected: {fault}"),
                status: None,
            });
        }
        info!(unit = %self.name, "reboot requested");
        self.last_update = None;
        Ok(())
    }
}
