//! Credential assembly and resilient unit access on top of `kumolink-api`.
//!
//! - **[`CredentialResolver`]** — Runs the account pipeline: cloud login,
//!   device enumeration, cryptoSerial lookup, realtime password harvest and
//!   (optionally) address matching. Per-device gaps are logged, not raised.
//!
//! - **[`ResilientQueryEngine`]** — Queries one adapter with retries,
//!   per-attribute fallback merged via [`merge`](merge::merge), and at most
//!   one adapter reboot per cooldown window. Never returns an error.
//!
//! - **[`KumoUnit`]** — Per-unit client caching typed status, sensor,
//!   profile and adapter records ([`status`]) behind a refresh interval.
//!
//! - **[`schedule`]** — Raw schedule slot fetch/push. Unlike status reads,
//!   every failure here surfaces as [`CoreError`].

pub mod account;
pub mod error;
pub mod merge;
pub mod query;
pub mod schedule;
pub mod status;
pub mod unit;

// ── Primary re-exports ──────────────────────────────────────────────
pub use account::{CredentialResolver, Credentials, ResolveOptions, make_units, unique_names};
pub use error::CoreError;
pub use query::{QueryPolicy, RebootRecord, ResilientQueryEngine};
pub use schedule::{ScheduleEvents, fetch_schedule, push_schedule};
pub use status::{AdapterStatus, Capabilities, IndoorStatus, Profile, Sensor};
pub use unit::{KumoUnit, UnitConfig};

// Re-export the protocol crate for downstream convenience.
pub use kumolink_api;
