// kumolink-api: Async Rust clients for Kumo HVAC adapters (local signed API,
// cloud V3 + legacy V2, realtime password harvesting, address discovery)

pub mod auth;
pub mod cloud;
pub mod credential;
pub mod discovery;
pub mod error;
pub mod local;
pub mod realtime;
pub mod transport;

pub use auth::{AuthParams, CRYPTO_SERIAL_LEN, DeviceKey, TokenComputer};
pub use cloud::{CloudClient, CloudDevice, LegacyCloudClient};
pub use credential::DeviceCredential;
pub use discovery::AddressMatcher;
pub use error::Error;
pub use local::{ApiFault, LocalClient, QueryPath};
pub use realtime::{CredentialHarvester, Harvest, HarvestConfig, HarvestState};
pub use transport::TransportConfig;
