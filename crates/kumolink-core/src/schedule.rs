// ── Schedule transport ──
//
// Moves raw program slots to and from `indoorUnit.schedule.events`. Unlike
// status queries, nothing here degrades silently: every failure is an `Err`.

use std::collections::BTreeMap;

use kumolink_api::{ApiFault, LocalClient, QueryPath};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::CoreError;

/// Slots written per request. Larger writes trip the adapter's auth check.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Slot name → raw event object.
pub type ScheduleEvents = BTreeMap<String, Value>;

fn schedule_path() -> QueryPath {
    QueryPath::new(["indoorUnit", "schedule"])
}

/// Read every schedule slot.
pub async fn fetch_schedule(client: &LocalClient) -> Result<ScheduleEvents, CoreError> {
    let path = schedule_path();
    let response = client.query(&path.to_query()).await?;

    if let Some(fault) = ApiFault::classify(&response) {
        return Err(CoreError::ScheduleRejected {
            code: fault.code().to_owned(),
        });
    }

    let events = path
        .extract(&response)
        .and_then(|schedule| schedule.get("events"))
        .and_then(Value::as_object)
        .ok_or_else(|| CoreError::ScheduleUnavailable {
            address: client.address().to_owned(),
        })?;

    debug!(address = client.address(), slots = events.len(), "schedule fetched");
    Ok(events
        .iter()
        .map(|(slot, event)| (slot.clone(), event.clone()))
        .collect())
}

/// Write `events` in sorted slot order, `batch_size` slots per request.
///
/// Stops at the first rejected batch; earlier batches stay applied.
/// Returns the number of requests sent.
pub async fn push_schedule(
    client: &LocalClient,
    events: &ScheduleEvents,
    batch_size: usize,
) -> Result<usize, CoreError> {
    if batch_size == 0 {
        return Err(CoreError::ValidationFailed {
            message: "schedule batch size must be positive".into(),
        });
    }

    let path = schedule_path();
    let slots: Vec<(&String, &Value)> = events.iter().collect();
    let mut sent = 0;
    for batch in slots.chunks(batch_size) {
        let chunk: Map<String, Value> = batch
            .iter()
            .map(|(slot, event)| ((*slot).clone(), (*event).clone()))
            .collect();
        let mut body = Map::new();
        body.insert("events".into(), Value::Object(chunk));

        let response = client.query(&path.command(Value::Object(body))).await?;
        sent += 1;
        if let Some(code) = response.get("_api_error") {
            return Err(CoreError::ScheduleRejected {
                code: code.as_str().map_or_else(|| code.to_string(), str::to_owned),
            });
        }
    }

    info!(
        address = client.address(),
        slots = events.len(),
        batches = sent,
        "schedule pushed"
    );
    Ok(sent)
}
