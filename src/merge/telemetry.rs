use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::dedup::{merge_logs, telemetry_event_key};
use super::{log_slice, overlay, TELEMETRY_DAYS_CAP, TELEMETRY_EVENTS_CAP};

/// Merge the usage-telemetry sub-record: a bounded event log plus per-day
/// metric buckets keyed by ISO date.
pub fn merge_telemetry(existing: Option<&Value>, incoming: Option<&Value>) -> Value {
    let mut out = overlay(existing, incoming);

    let events = merge_logs(
        log_slice(existing, "events"),
        log_slice(incoming, "events"),
        Some("timestamp"),
        TELEMETRY_EVENTS_CAP,
        telemetry_event_key,
    );
    out.insert("events".to_string(), Value::Array(events));
    out.insert("daily".to_string(), merge_daily(existing, incoming));

    Value::Object(out)
}

/// Union of both sides' day buckets, trimmed to the lexicographically
/// greatest `TELEMETRY_DAYS_CAP` keys. Within a retained day each metric is
/// the maximum of the two sides; a metric missing (or non-numeric) on one
/// side is ignored, never treated as zero.
fn merge_daily(existing: Option<&Value>, incoming: Option<&Value>) -> Value {
    let mut days: BTreeMap<String, Map<String, Value>> = BTreeMap::new();

    for side in [existing, incoming] {
        let Some(buckets) = side.and_then(|v| v.get("daily")).and_then(|v| v.as_object()) else {
            continue;
        };
        for (day, metrics) in buckets {
            let slot = days.entry(day.clone()).or_default();
            let Some(metrics) = metrics.as_object() else {
                continue;
            };
            for (name, value) in metrics {
                let Some(n) = value.as_f64() else {
                    continue;
                };
                let keep = match slot.get(name).and_then(|v| v.as_f64()) {
                    Some(prev) => n > prev,
                    None => true,
                };
                if keep {
                    slot.insert(name.clone(), value.clone());
                }
            }
        }
    }

    while days.len() > TELEMETRY_DAYS_CAP {
        let Some(oldest) = days.keys().next().cloned() else {
            break;
        };
        days.remove(&oldest);
    }

    let mut out = Map::new();
    for (day, metrics) in days {
        out.insert(day, Value::Object(metrics));
    }
    Value::Object(out)
}
