// ── Credential assembly ──
//
// login → enumerate → cryptoSerials → harvest passwords → match addresses.
// Each stage only fills gaps; a field once known is never cleared.

use std::collections::{BTreeMap, BTreeSet};

use kumolink_api::{
    AddressMatcher, AuthParams, CloudClient, CredentialHarvester, DeviceCredential,
    HarvestConfig, LegacyCloudClient, TransportConfig,
};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::unit::{KumoUnit, UnitConfig};

/// Serial → credential, the pipeline's working set.
pub type Credentials = BTreeMap<String, DeviceCredential>;

/// Settings for [`CredentialResolver`].
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub harvest: HarvestConfig,
    /// Addresses to try for credentials that lack one. Empty skips matching.
    pub candidates: Vec<String>,
    pub params: AuthParams,
    pub probe_transport: TransportConfig,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            harvest: HarvestConfig::default(),
            candidates: Vec::new(),
            params: AuthParams::default(),
            probe_transport: TransportConfig::probe(),
        }
    }
}

/// Runs the full credential pipeline against one cloud account.
pub struct CredentialResolver<'a> {
    cloud: &'a CloudClient,
    options: ResolveOptions,
    cancel: CancellationToken,
}

impl<'a> CredentialResolver<'a> {
    pub fn new(cloud: &'a CloudClient, options: ResolveOptions) -> Self {
        Self {
            cloud,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Share a cancellation token with the password harvest.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Log in and assemble credentials, starting from `known` (e.g. cached).
    ///
    /// Only login and enumeration failures are errors. Per-device gaps
    /// (no cryptoSerial, no password, no address) are logged and left for
    /// the caller to treat as unresolved.
    pub async fn resolve(
        &self,
        username: &str,
        password: &SecretString,
        known: Credentials,
    ) -> Result<Credentials, CoreError> {
        self.cloud.login(username, password).await?;

        let mut credentials = known;
        for device in self.cloud.devices().await? {
            credentials
                .entry(device.serial.clone())
                .or_insert_with(|| DeviceCredential::new(device.serial.clone()))
                .merge(&DeviceCredential::from(&device));
        }

        self.fill_crypto_serials(&mut credentials).await;
        self.fill_passwords(&mut credentials).await;
        self.fill_addresses(&mut credentials).await?;

        log_summary(&credentials);
        Ok(credentials)
    }

    async fn fill_crypto_serials(&self, credentials: &mut Credentials) {
        for cred in credentials.values_mut() {
            if !cred.crypto_serial.is_empty() {
                continue;
            }
            let status = match self.cloud.device_status(&cred.serial).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(serial = %cred.serial, error = %e, "device status unavailable");
                    continue;
                }
            };
            match status.crypto_serial.as_deref() {
                Some(encoded) => {
                    if let Err(e) = cred.set_crypto_serial_hex(encoded) {
                        warn!(serial = %cred.serial, error = %e, "unusable cryptoSerial");
                    }
                }
                None => debug!(serial = %cred.serial, "no cryptoSerial in device status"),
            }
        }
    }

    async fn fill_passwords(&self, credentials: &mut Credentials) {
        let missing: Vec<String> = credentials
            .values()
            .filter(|c| c.password.is_empty())
            .map(|c| c.serial.clone())
            .collect();
        if missing.is_empty() {
            return;
        }

        let harvest = CredentialHarvester::new(self.cloud, self.options.harvest.clone())
            .with_cancellation(self.cancel.clone())
            .harvest(&missing)
            .await;
        info!(
            requested = missing.len(),
            collected = harvest.passwords.len(),
            state = %harvest.state,
            polls = harvest.polls,
            "password harvest finished"
        );

        for (serial, encoded) in &harvest.passwords {
            let Some(cred) = credentials.get_mut(serial) else {
                continue;
            };
            if let Err(e) = cred.set_password_b64(encoded) {
                warn!(serial = %serial, error = %e, "unusable harvested password");
            }
        }
    }

    async fn fill_addresses(&self, credentials: &mut Credentials) -> Result<(), CoreError> {
        if self.options.candidates.is_empty() {
            return Ok(());
        }
        let unaddressed: Credentials = credentials
            .iter()
            .filter(|(_, c)| c.is_valid() && c.address.is_none())
            .map(|(serial, c)| (serial.clone(), c.clone()))
            .collect();
        if unaddressed.is_empty() {
            return Ok(());
        }

        let matcher = AddressMatcher::new(self.options.params, &self.options.probe_transport)?;
        let matched = matcher
            .match_addresses(&unaddressed, &self.options.candidates)
            .await;
        for (serial, address) in matched {
            if let Some(cred) = credentials.get_mut(&serial) {
                cred.address = Some(address);
            }
        }
        Ok(())
    }
}

fn log_summary(credentials: &Credentials) {
    let count = |pred: fn(&DeviceCredential) -> bool| credentials.values().filter(|c| pred(c)).count();
    info!(
        devices = credentials.len(),
        crypto_serials = count(|c| !c.crypto_serial.is_empty()),
        passwords = count(|c| !c.password.is_empty()),
        addresses = count(|c| c.address.is_some()),
        "credentials assembled"
    );
    for cred in credentials.values().filter(|c| !c.is_valid()) {
        warn!(serial = %cred.serial, "credential incomplete");
    }
}

/// Fetch credentials through the legacy V2 login, merged over `known`.
pub async fn legacy_credentials(
    legacy: &LegacyCloudClient,
    username: &str,
    password: &SecretString,
    known: Credentials,
) -> Result<Credentials, CoreError> {
    let mut credentials = known;
    for cred in legacy.credentials(username, password).await? {
        credentials
            .entry(cred.serial.clone())
            .or_insert_with(|| DeviceCredential::new(cred.serial.clone()))
            .merge(&cred);
    }
    log_summary(&credentials);
    Ok(credentials)
}

// ── Naming ──────────────────────────────────────────────────────────

/// Assign each unit a distinct display name.
///
/// Units are visited in serial order and named by their label, or their
/// serial when the label is empty. Every base name is reserved up front:
/// the first unit with a base keeps it, and each later duplicate gets the
/// smallest ` (n)`, n ≥ 2, that is neither a reserved base nor already
/// assigned. Returns serial → name.
pub fn unique_names(credentials: &Credentials) -> BTreeMap<String, String> {
    let bases: BTreeMap<&str, String> = credentials
        .iter()
        .map(|(serial, cred)| {
            let base = cred
                .label
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .unwrap_or(serial.as_str())
                .to_owned();
            (serial.as_str(), base)
        })
        .collect();
    let reserved: BTreeSet<&str> = bases.values().map(String::as_str).collect();

    let mut taken: BTreeSet<String> = BTreeSet::new();
    let mut names = BTreeMap::new();
    for (serial, base) in &bases {
        let name = if taken.contains(base) {
            (2..)
                .map(|n| format!("{base} ({n})"))
                .find(|candidate| {
                    !reserved.contains(candidate.as_str()) && !taken.contains(candidate)
                })
                .unwrap_or_else(|| (*serial).to_owned())
        } else {
            base.clone()
        };
        taken.insert(name.clone());
        names.insert((*serial).to_owned(), name);
    }
    names
}

/// Build a [`KumoUnit`] for every credential that is usable locally.
///
/// Credentials without an address or key material are skipped with a warning.
pub fn make_units(credentials: &Credentials, config: &UnitConfig) -> Vec<KumoUnit> {
    let names = unique_names(credentials);
    credentials
        .values()
        .filter_map(|cred| {
            let name = names.get(&cred.serial).cloned().unwrap_or_else(|| cred.serial.clone());
            match KumoUnit::from_credential(name, cred, config) {
                Ok(unit) => Some(unit),
                Err(e) => {
                    warn!(serial = %cred.serial, error = %e, "skipping unit");
                    None
                }
            }
        })
        .collect()
}
