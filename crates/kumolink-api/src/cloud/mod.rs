// Cloud REST surfaces: the V3 app API (session + enumeration) and the
// V2 legacy login that returns the whole account in one response.

pub mod client;
pub mod legacy;
pub mod models;
mod sites;

pub use client::{CloudClient, decode_user_id};
pub use legacy::{LegacyCloudClient, LegacyUnit, parse_zone_table};
pub use models::{CloudDevice, DeviceStatus, Site, Zone, ZoneAdapter};
