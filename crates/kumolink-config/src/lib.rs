//! Shared configuration for kumolink consumers.
//!
//! TOML file + `KUMOLINK_` environment overrides, account password
//! resolution (env + keyring + plaintext), cached per-device credentials,
//! and translation into the core/api configuration values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use kumolink_core::kumolink_api::cloud::client::DEFAULT_BASE_URL;
use kumolink_core::kumolink_api::cloud::legacy::LEGACY_BASE_URL;
use kumolink_core::kumolink_api::realtime::harvester::DEFAULT_SOCKET_URL;
use kumolink_core::kumolink_api::{
    CloudClient, DeviceCredential, HarvestConfig, LegacyCloudClient, TransportConfig,
};
use kumolink_core::{Credentials, QueryPolicy, ResolveOptions, UnitConfig};

/// Keyring service name for account passwords.
pub const KEYRING_SERVICE: &str = "kumolink";

/// Fallback environment variable for the account password.
pub const PASSWORD_ENV: &str = "KUMOLINK_PASSWORD";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no password configured for account '{username}'")]
    NoCredentials { username: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("client setup failed: {0}")]
    Client(#[from] kumolink_core::kumolink_api::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub account: Account,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default)]
    pub harvest: Harvest,

    #[serde(default)]
    pub query: Query,

    #[serde(default)]
    pub cloud: Cloud,

    /// Addresses tried for devices whose address is unknown.
    #[serde(default)]
    pub candidates: Vec<String>,

    /// Cached credentials keyed by serial.
    #[serde(default)]
    pub devices: BTreeMap<String, CachedDevice>,
}

/// Cloud account used for enumeration and password harvesting.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Account {
    #[serde(default)]
    pub username: String,

    /// Plaintext password (prefer keyring or env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable name containing the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Timeouts {
    #[serde(default = "default_unit_connect_ms")]
    pub unit_connect_ms: u64,
    #[serde(default = "default_unit_response_ms")]
    pub unit_response_ms: u64,
    #[serde(default = "default_cloud_connect_secs")]
    pub cloud_connect_secs: u64,
    #[serde(default = "default_cloud_read_secs")]
    pub cloud_read_secs: u64,
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            unit_connect_ms: default_unit_connect_ms(),
            unit_response_ms: default_unit_response_ms(),
            cloud_connect_secs: default_cloud_connect_secs(),
            cloud_read_secs: default_cloud_read_secs(),
            probe_secs: default_probe_secs(),
        }
    }
}

fn default_unit_connect_ms() -> u64 {
    1200
}
fn default_unit_response_ms() -> u64 {
    8000
}
fn default_cloud_connect_secs() -> u64 {
    10
}
fn default_cloud_read_secs() -> u64 {
    30
}
fn default_probe_secs() -> u64 {
    3
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Harvest {
    /// Overall budget for one password harvest, retries included.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "default_max_poll_secs")]
    pub max_poll_secs: u64,
}

impl Default for Harvest {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            max_poll_secs: default_max_poll_secs(),
        }
    }
}

fn default_deadline_secs() -> u64 {
    60
}
fn default_max_poll_secs() -> u64 {
    25
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Query {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_reboot_settle_secs")]
    pub reboot_settle_secs: u64,
    #[serde(default = "default_reboot_cooldown_mins")]
    pub reboot_cooldown_mins: u64,
    #[serde(default = "default_cache_interval_secs")]
    pub cache_interval_secs: u64,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            reboot_settle_secs: default_reboot_settle_secs(),
            reboot_cooldown_mins: default_reboot_cooldown_mins(),
            cache_interval_secs: default_cache_interval_secs(),
        }
    }
}

fn default_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_reboot_settle_secs() -> u64 {
    5
}
fn default_reboot_cooldown_mins() -> u64 {
    30
}
fn default_cache_interval_secs() -> u64 {
    5
}

/// Cloud endpoints. Overridable for staging servers and tests.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Cloud {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_socket_url")]
    pub socket_url: String,
    #[serde(default = "default_legacy_url")]
    pub legacy_url: String,
}

impl Default for Cloud {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            socket_url: default_socket_url(),
            legacy_url: default_legacy_url(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}
fn default_socket_url() -> String {
    DEFAULT_SOCKET_URL.into()
}
fn default_legacy_url() -> String {
    LEGACY_BASE_URL.into()
}

/// One cached device credential, stored in its cloud encodings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CachedDevice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Base64 password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Hex cryptoSerial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_serial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_type: Option<String>,
}

impl CachedDevice {
    /// Decode into a [`DeviceCredential`] for `serial`.
    pub fn to_credential(&self, serial: &str) -> Result<DeviceCredential, ConfigError> {
        let mut cred = DeviceCredential::new(serial);
        cred.label.clone_from(&self.label);
        cred.address.clone_from(&self.address);
        cred.unit_type.clone_from(&self.unit_type);
        if let Some(ref encoded) = self.password {
            cred.set_password_b64(encoded)
                .map_err(|e| invalid(&format!("devices.{serial}.password"), e.to_string()))?;
        }
        if let Some(ref encoded) = self.crypto_serial {
            cred.set_crypto_serial_hex(encoded)
                .map_err(|e| invalid(&format!("devices.{serial}.crypto_serial"), e.to_string()))?;
        }
        Ok(cred)
    }
}

impl From<&DeviceCredential> for CachedDevice {
    fn from(cred: &DeviceCredential) -> Self {
        Self {
            label: cred.label.clone(),
            address: cred.address.clone(),
            password: (!cred.password.is_empty()).then(|| BASE64.encode(&cred.password)),
            crypto_serial: (!cred.crypto_serial.is_empty()).then(|| hex::encode(&cred.crypto_serial)),
            unit_type: cred.unit_type.clone(),
        }
    }
}

// ── Translation to core/api values ──────────────────────────────────

impl Config {
    /// Check values that would otherwise fail deep inside a request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("cloud.base_url", &self.cloud.base_url),
            ("cloud.socket_url", &self.cloud.socket_url),
            ("cloud.legacy_url", &self.cloud.legacy_url),
        ] {
            url::Url::parse(value).map_err(|e| invalid(field, format!("{value}: {e}")))?;
        }
        if self.query.retries == 0 {
            return Err(invalid("query.retries", "must be at least 1"));
        }
        if self.harvest.deadline_secs == 0 {
            return Err(invalid("harvest.deadline_secs", "must be positive"));
        }
        if self.candidates.iter().any(|c| c.trim().is_empty()) {
            return Err(invalid("candidates", "empty address"));
        }
        Ok(())
    }

    pub fn unit_transport(&self) -> TransportConfig {
        TransportConfig::new(
            Duration::from_millis(self.timeouts.unit_connect_ms),
            Duration::from_millis(self.timeouts.unit_response_ms),
        )
    }

    pub fn cloud_transport(&self) -> TransportConfig {
        TransportConfig::new(
            Duration::from_secs(self.timeouts.cloud_connect_secs),
            Duration::from_secs(self.timeouts.cloud_read_secs),
        )
    }

    pub fn probe_transport(&self) -> TransportConfig {
        let budget = Duration::from_secs(self.timeouts.probe_secs);
        TransportConfig::new(budget, budget)
    }

    pub fn harvest_config(&self) -> HarvestConfig {
        HarvestConfig {
            socket_url: self.cloud.socket_url.clone(),
            deadline: Duration::from_secs(self.harvest.deadline_secs),
            max_poll: Duration::from_secs(self.harvest.max_poll_secs),
            ..HarvestConfig::default()
        }
    }

    pub fn query_policy(&self) -> QueryPolicy {
        QueryPolicy {
            retries: self.query.retries,
            retry_delay: Duration::from_millis(self.query.retry_delay_ms),
            reboot_settle: Duration::from_secs(self.query.reboot_settle_secs),
            reboot_cooldown: Duration::from_secs(
                self.query.reboot_cooldown_mins.saturating_mul(60),
            ),
        }
    }

    pub fn unit_config(&self) -> UnitConfig {
        UnitConfig {
            policy: self.query_policy(),
            cache_interval: Duration::from_secs(self.query.cache_interval_secs),
            transport: self.unit_transport(),
            ..UnitConfig::default()
        }
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            harvest: self.harvest_config(),
            candidates: self.candidates.clone(),
            probe_transport: self.probe_transport(),
            ..ResolveOptions::default()
        }
    }

    pub fn cloud_client(&self) -> Result<CloudClient, ConfigError> {
        Ok(CloudClient::new(&self.cloud.base_url, &self.cloud_transport())?)
    }

    pub fn legacy_client(&self) -> Result<LegacyCloudClient, ConfigError> {
        Ok(LegacyCloudClient::new(
            &self.cloud.legacy_url,
            &self.cloud_transport(),
        )?)
    }

    /// Decode every cached device. One bad entry fails the whole set.
    pub fn cached_credentials(&self) -> Result<Credentials, ConfigError> {
        self.devices
            .iter()
            .map(|(serial, device)| Ok((serial.clone(), device.to_credential(serial)?)))
            .collect()
    }

    /// Store resolved credentials, keeping cached fields they lack.
    pub fn remember_credentials(&mut self, credentials: &Credentials) {
        for (serial, cred) in credentials {
            let incoming = CachedDevice::from(cred);
            let entry = self.devices.entry(serial.clone()).or_default();
            for (slot, value) in [
                (&mut entry.label, incoming.label),
                (&mut entry.address, incoming.address),
                (&mut entry.password, incoming.password),
                (&mut entry.crypto_serial, incoming.crypto_serial),
                (&mut entry.unit_type, incoming.unit_type),
            ] {
                if value.is_some() {
                    *slot = value;
                }
            }
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "kumolink", "kumolink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("kumolink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load Config from `path` + environment. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("KUMOLINK_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    debug!(path = %path.display(), devices = config.devices.len(), "config loaded");
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_else(|e| {
        warn!(error = %e, "falling back to default config");
        Config::default()
    })
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Password resolution ─────────────────────────────────────────────

/// Resolve the account password.
///
/// Order: the env var named by `password_env`, then `KUMOLINK_PASSWORD`,
/// then the system keyring entry `kumolink/<username>`, then plaintext.
pub fn resolve_password(account: &Account) -> Result<SecretString, ConfigError> {
    resolve_password_with(
        account,
        |name| std::env::var(name).ok(),
        |username| {
            keyring::Entry::new(KEYRING_SERVICE, username)
                .and_then(|entry| entry.get_password())
                .ok()
        },
    )
}

fn resolve_password_with(
    account: &Account,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    // 1. Account's password_env, then the fixed fallback
    for name in account.password_env.as_deref().into_iter().chain([PASSWORD_ENV]) {
        if let Some(val) = env(name).filter(|v| !v.is_empty()) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if !account.username.is_empty() {
        if let Some(secret) = keyring(&account.username) {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref pw) = account.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        username: account.username.clone(),
    })
}

/// Save the account password to the system keyring.
pub fn store_password(username: &str, password: &SecretString) -> Result<(), ConfigError> {
    if username.is_empty() {
        return Err(invalid("account.username", "required to store a password"));
    }
    keyring::Entry::new(KEYRING_SERVICE, username)?.set_password(password.expose_secret())?;
    Ok(())
}

// ── Tracing ─────────────────────────────────────────────────────────

/// Install a fmt subscriber. `RUST_LOG` wins over `verbosity`.
///
/// Returns `false` if a global subscriber was already set.
pub fn init_tracing(verbosity: u8) -> bool {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .try_init()
        .is_ok()
}
