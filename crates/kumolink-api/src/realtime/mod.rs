// Cloud realtime channel (Socket.IO over Engine.IO v4 long-polling).

pub mod codec;
pub mod harvester;

pub use codec::{AdapterUpdate, Frame, Handshake};
pub use harvester::{CredentialHarvester, Harvest, HarvestConfig, HarvestState};
