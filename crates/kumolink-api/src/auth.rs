// Per-request authentication tokens for the local adapter API.
//
// Every `PUT /api` carries `?m=<token>`, where the token is a keyed hash
// over the exact request body. The construction is a fixed vendor scheme:
//
//   digest = SHA-256(password ‖ payload)
//   B[0..32]  = W          B[32..64] = digest
//   B[64..66] = 08 40      B[66]     = S
//   B[79]     = cs[8]      B[80..84] = cs[4..8]     B[84..88] = cs[0..4]
//   token = hex(SHA-256(B))         (all other bytes of B are zero)

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};

use crate::error::Error;

/// Bytes of cryptoSerial consumed by the token construction.
pub const CRYPTO_SERIAL_LEN: usize = 9;

const DEFAULT_W: [u8; 32] = [
    0x44, 0xc7, 0x32, 0x83, 0xb4, 0x98, 0xd4, 0x32, 0xff, 0x25, 0xf5, 0xc8, 0xe0, 0x6a, 0x01, 0x6a,
    0xef, 0x93, 0x1e, 0x68, 0xf0, 0xa0, 0x0e, 0xa7, 0x10, 0xe3, 0x6e, 0x63, 0x38, 0xfb, 0x22, 0xdb,
];
const DEFAULT_S: u8 = 0;

const BUFFER_LEN: usize = 88;

/// Frozen token-derivation constants (W and S).
///
/// `Default` yields the vendor values; there is no way to mutate a value
/// once built, so one instance can be shared by every client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthParams {
    w: [u8; 32],
    s: u8,
}

impl Default for AuthParams {
    fn default() -> Self {
        Self {
            w: DEFAULT_W,
            s: DEFAULT_S,
        }
    }
}

impl AuthParams {
    pub const fn new(w: [u8; 32], s: u8) -> Self {
        Self { w, s }
    }

    pub fn w(&self) -> &[u8; 32] {
        &self.w
    }

    pub fn s(&self) -> u8 {
        self.s
    }
}

/// Decoded secret material for one adapter: raw password and cryptoSerial.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceKey {
    password: Vec<u8>,
    crypto_serial: [u8; CRYPTO_SERIAL_LEN],
}

impl DeviceKey {
    /// Build from raw bytes. The password must be non-empty and the
    /// cryptoSerial at least [`CRYPTO_SERIAL_LEN`] bytes (extra bytes are ignored).
    pub fn new(password: &[u8], crypto_serial: &[u8]) -> Result<Self, Error> {
        if password.is_empty() {
            return Err(Error::invalid_credential(None, "empty password"));
        }
        let crypto_serial: [u8; CRYPTO_SERIAL_LEN] = crypto_serial
            .get(..CRYPTO_SERIAL_LEN)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| {
                Error::invalid_credential(
                    None,
                    format!(
                        "cryptoSerial has {} bytes, need {CRYPTO_SERIAL_LEN}",
                        crypto_serial.len()
                    ),
                )
            })?;
        Ok(Self {
            password: password.to_vec(),
            crypto_serial,
        })
    }

    /// Build from the cloud encodings: base64 password, hex cryptoSerial.
    pub fn from_encoded(password_b64: &str, crypto_serial_hex: &str) -> Result<Self, Error> {
        let password = BASE64
            .decode(password_b64.trim())
            .map_err(|e| Error::invalid_credential(None, format!("password is not base64: {e}")))?;
        let crypto_serial = hex::decode(crypto_serial_hex.trim()).map_err(|e| {
            Error::invalid_credential(None, format!("cryptoSerial is not hex: {e}"))
        })?;
        Self::new(&password, &crypto_serial)
    }

    pub fn password(&self) -> &[u8] {
        &self.password
    }

    pub fn crypto_serial(&self) -> &[u8; CRYPTO_SERIAL_LEN] {
        &self.crypto_serial
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceKey")
            .field("password", &"[REDACTED]")
            .field("crypto_serial", &hex::encode(self.crypto_serial))
            .finish()
    }
}

/// Derives request tokens from a [`DeviceKey`] and the outgoing payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenComputer {
    params: AuthParams,
}

impl TokenComputer {
    pub fn new(params: AuthParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &AuthParams {
        &self.params
    }

    /// Compute the 64-hex-character token for `payload`.
    ///
    /// Pure and deterministic: the same key and payload always give the
    /// same token.
    pub fn token(&self, key: &DeviceKey, payload: &[u8]) -> String {
        let digest = Sha256::new()
            .chain_update(&key.password)
            .chain_update(payload)
            .finalize();

        let cs = &key.crypto_serial;
        let mut buffer = [0u8; BUFFER_LEN];
        buffer[0..32].copy_from_slice(&self.params.w);
        buffer[32..64].copy_from_slice(&digest);
        buffer[64] = 0x08;
        buffer[65] = 0x40;
        buffer[66] = self.params.s;
        buffer[79] = cs[8];
        buffer[80..84].copy_from_slice(&cs[4..8]);
        buffer[84..88].copy_from_slice(&cs[0..4]);

        hex::encode(Sha256::digest(buffer))
    }
}
