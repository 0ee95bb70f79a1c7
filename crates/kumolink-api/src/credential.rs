// Per-device credential record assembled from cloud enumeration,
// realtime harvesting and address discovery.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::auth::DeviceKey;
use crate::error::Error;

/// Everything needed to talk to one adapter over the local API.
///
/// Fields are filled in incrementally. A credential is only usable once
/// both `password` and `crypto_serial` are present; see [`is_valid`](Self::is_valid).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DeviceCredential {
    pub serial: String,
    pub password: Vec<u8>,
    pub crypto_serial: Vec<u8>,
    pub address: Option<String>,
    pub label: Option<String>,
    pub unit_type: Option<String>,
    pub mac: Option<String>,
}

impl DeviceCredential {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            ..Self::default()
        }
    }

    /// `true` once both secret fields are present.
    pub fn is_valid(&self) -> bool {
        !self.password.is_empty() && !self.crypto_serial.is_empty()
    }

    /// Decoded key material, or an error naming what is missing.
    pub fn key(&self) -> Result<DeviceKey, Error> {
        if !self.is_valid() {
            return Err(Error::invalid_credential(
                Some(&self.serial),
                "password or cryptoSerial missing",
            ));
        }
        DeviceKey::new(&self.password, &self.crypto_serial).map_err(|e| match e {
            Error::InvalidCredential { reason, .. } => {
                Error::invalid_credential(Some(&self.serial), reason)
            }
            other => other,
        })
    }

    /// Set the password from its cloud (base64) encoding.
    pub fn set_password_b64(&mut self, encoded: &str) -> Result<(), Error> {
        let decoded = BASE64.decode(encoded.trim()).map_err(|e| {
            Error::invalid_credential(Some(&self.serial), format!("password is not base64: {e}"))
        })?;
        if !decoded.is_empty() {
            self.password = decoded;
        }
        Ok(())
    }

    /// Set the cryptoSerial from its cloud (hex) encoding.
    pub fn set_crypto_serial_hex(&mut self, encoded: &str) -> Result<(), Error> {
        let decoded = hex::decode(encoded.trim()).map_err(|e| {
            Error::invalid_credential(Some(&self.serial), format!("cryptoSerial is not hex: {e}"))
        })?;
        if !decoded.is_empty() {
            self.crypto_serial = decoded;
        }
        Ok(())
    }

    /// Merge newly discovered fields from `other`.
    ///
    /// Present fields in `other` win; absent ones never clear what is
    /// already known. Merging the same record twice is a no-op.
    pub fn merge(&mut self, other: &Self) {
        if self.serial.is_empty() {
            self.serial.clone_from(&other.serial);
        }
        if !other.password.is_empty() {
            self.password.clone_from(&other.password);
        }
        if !other.crypto_serial.is_empty() {
            self.crypto_serial.clone_from(&other.crypto_serial);
        }
        merge_option(&mut self.address, &other.address);
        merge_option(&mut self.label, &other.label);
        merge_option(&mut self.unit_type, &other.unit_type);
        merge_option(&mut self.mac, &other.mac);
    }
}

fn merge_option(current: &mut Option<String>, incoming: &Option<String>) {
    if let Some(value) = incoming.as_deref().filter(|v| !v.is_empty()) {
        *current = Some(value.to_owned());
    }
}

impl fmt::Debug for DeviceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCredential")
            .field("serial", &self.serial)
            .field(
                "password",
                &if self.password.is_empty() {
                    "<missing>"
                } else {
                    "[REDACTED]"
                },
            )
            .field("crypto_serial", &hex::encode(&self.crypto_serial))
            .field("address", &self.address)
            .field("label", &self.label)
            .field("unit_type", &self.unit_type)
            .field("mac", &self.mac)
            .finish()
    }
}
