// ── Resilient query engine ──
//
// Adapters are small embedded HTTP servers that routinely answer with
// transient faults. Retrieval runs a top-level query, falls back to one
// query per required attribute, and reboots the adapter at most once per
// cooldown window when it reports a serializer or memory fault.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use kumolink_api::local::query::RESPONSE_KEY;
use kumolink_api::{ApiFault, LocalClient, QueryPath};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::merge::merge;

/// Re-entries of the whole retrieval after a reboot.
const MAX_REBOOT_REENTRIES: u32 = 1;

/// Retry, reboot-settle and cooldown timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPolicy {
    /// Attempts per query (top-level and per attribute).
    pub retries: u32,
    /// Pause between attempts of the same query.
    pub retry_delay: Duration,
    /// Pause after sending a reboot before querying again.
    pub reboot_settle: Duration,
    /// Minimum spacing between two reboots of the same adapter.
    pub reboot_cooldown: Duration,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay: Duration::from_secs(1),
            reboot_settle: Duration::from_secs(5),
            reboot_cooldown: Duration::from_secs(30 * 60),
        }
    }
}

/// When this adapter was last asked to reboot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebootRecord {
    last: Option<DateTime<Utc>>,
}

impl RebootRecord {
    pub fn new(last: Option<DateTime<Utc>>) -> Self {
        Self { last }
    }

    pub fn last_reboot(&self) -> Option<DateTime<Utc>> {
        self.last
    }

    /// `true` if no reboot happened within `cooldown` before `now`.
    pub fn allows(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        let cooldown = TimeDelta::from_std(cooldown).unwrap_or(TimeDelta::MAX);
        self.last
            .is_none_or(|last| now.signed_duration_since(last) > cooldown)
    }

    pub fn record(&mut self, now: DateTime<Utc>) {
        self.last = Some(now);
    }
}

/// How a response was judged after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accepted,
    Retryable,
    Reboot,
}

/// Outcome of one pass over the top-level query and attribute fallback.
struct Pass {
    response: Option<Value>,
    reboot: bool,
}

/// Issues queries against one adapter and survives its bad moods.
///
/// Never returns an error: transport and protocol failures are logged and
/// the last response obtained (possibly `{}`) is returned instead.
pub struct ResilientQueryEngine {
    client: LocalClient,
    policy: QueryPolicy,
    reboots: RebootRecord,
}

impl ResilientQueryEngine {
    pub fn new(client: LocalClient, policy: QueryPolicy) -> Self {
        Self {
            client,
            policy,
            reboots: RebootRecord::default(),
        }
    }

    /// Start from a known reboot history (e.g. carried over from a previous client).
    pub fn with_reboot_record(mut self, reboots: RebootRecord) -> Self {
        self.reboots = reboots;
        self
    }

    pub fn client(&self) -> &LocalClient {
        &self.client
    }

    pub fn policy(&self) -> &QueryPolicy {
        &self.policy
    }

    pub fn reboot_record(&self) -> RebootRecord {
        self.reboots
    }

    /// Retrieve `path`, falling back to the `needed` attributes one by one.
    ///
    /// The result is `r`-rooted like an adapter response. When the fallback
    /// produced at least one attribute the merged sub-responses are returned.
    pub async fn retrieve(&mut self, path: &QueryPath, needed: &[&str]) -> Value {
        let mut reentries = 0;
        loop {
            let pass = self.run_pass(path, needed).await;
            let response = pass.response.unwrap_or_else(|| Value::Object(Map::new()));

            if !pass.reboot {
                return response;
            }
            let now = Utc::now();
            if reentries >= MAX_REBOOT_REENTRIES
                || !self.reboots.allows(now, self.policy.reboot_cooldown)
            {
                debug!(
                    address = self.client.address(),
                    path = %path,
                    "reboot warranted but suppressed"
                );
                return response;
            }

            warn!(
                address = self.client.address(),
                path = %path,
                "attempting to reboot adapter"
            );
            self.reboots.record(now);
            if let Err(e) = self.client.reboot().await {
                warn!(address = self.client.address(), error = %e, "reboot request failed");
            }
            tokio::time::sleep(self.policy.reboot_settle).await;
            reentries += 1;
        }
    }

    async fn run_pass(&self, path: &QueryPath, needed: &[&str]) -> Pass {
        let top = self.send_with_retries(&path.to_query(), path, None).await;
        let mut reboot = matches!(top, Some((_, Verdict::Reboot)));
        let needs_fallback = match &top {
            None => true,
            Some((response, verdict)) => {
                *verdict == Verdict::Retryable || is_empty_response(response)
            }
        };
        let mut response = top.map(|(response, _)| response);

        if reboot || !needs_fallback {
            return Pass { response, reboot };
        }

        let mut built = json!({ RESPONSE_KEY: {} });
        for &attribute in needed {
            let query = path.attribute_query(attribute);
            match self.send_with_retries(&query, path, Some(attribute)).await {
                Some((_, Verdict::Reboot)) => {
                    reboot = true;
                    break;
                }
                Some((sub, Verdict::Accepted)) if mentions(&sub, attribute) => {
                    merge(&mut built, &sub);
                }
                Some((sub, _)) => {
                    warn!(
                        address = self.client.address(),
                        path = %path,
                        attribute,
                        response = %sub,
                        "attribute missing from sub-response"
                    );
                }
                None => {}
            }
        }

        if built
            .get(RESPONSE_KEY)
            .and_then(Value::as_object)
            .is_some_and(|r| !r.is_empty())
        {
            response = Some(built);
        }
        Pass { response, reboot }
    }

    /// Send `command` up to `retries` times. `None` only when `retries` is zero.
    async fn send_with_retries(
        &self,
        command: &Value,
        path: &QueryPath,
        attribute: Option<&str>,
    ) -> Option<(Value, Verdict)> {
        let mut last = None;
        for attempt in 0..self.policy.retries {
            if attempt > 0 {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
            let response = self.send(command).await;
            let verdict = match ApiFault::classify(&response) {
                Some(fault) if fault.is_rebootable() => Verdict::Reboot,
                Some(fault) if fault.is_retryable() => {
                    info!(
                        address = self.client.address(),
                        path = %path,
                        attribute,
                        attempt,
                        fault = %fault,
                        "retrying query"
                    );
                    Verdict::Retryable
                }
                _ => Verdict::Accepted,
            };
            if verdict != Verdict::Retryable {
                return Some((response, verdict));
            }
            last = Some((response, verdict));
        }
        last
    }

    /// One request; transport and parse failures become `{}`.
    async fn send(&self, command: &Value) -> Value {
        match self.client.query(command).await {
            Ok(response) => response,
            Err(e) => {
                warn!(address = self.client.address(), error = %e, "adapter request failed");
                Value::Object(Map::new())
            }
        }
    }
}

fn is_empty_response(response: &Value) -> bool {
    match response {
        Value::Object(map) => map.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

/// Whether `response` carries any trace of `attribute` as a key.
fn mentions(response: &Value, attribute: &str) -> bool {
    match response {
        Value::Object(map) => map
            .iter()
            .any(|(key, value)| key == attribute || mentions(value, attribute)),
        Value::Array(items) => items.iter().any(|item| mentions(item, attribute)),
        _ => false,
    }
}
