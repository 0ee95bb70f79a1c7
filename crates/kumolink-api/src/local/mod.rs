// Local adapter API: signed `PUT /api?m=<token>` requests carrying nested
// `{"c": {...}}` queries, answered with `{"r": {...}}` or `{"_api_error": ...}`.

pub mod client;
pub mod fault;
pub mod query;

pub use client::LocalClient;
pub use fault::ApiFault;
pub use query::{QueryPath, reboot_command};
