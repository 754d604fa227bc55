use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::clock::normalize_ts;
use super::dedup::{merge_logs_desc, ticket_response_key};
use super::{overlay, TICKET_RESPONSES_CAP};

/// Merge ticket responses: one record per dispatch id, newest answer wins,
/// incoming preferred on exact `answeredAt` ties. The stored list is ordered
/// newest-first, with the cap dropping the oldest answers.
pub fn merge_ticket_responses(existing: &[Value], incoming: &[Value]) -> Vec<Value> {
    merge_logs_desc(
        existing,
        incoming,
        Some("answeredAt"),
        TICKET_RESPONSES_CAP,
        ticket_response_key,
    )
}

/// Merge the reveal map (dispatch id -> timestamp the answer key was made
/// visible). Reveals only ever move forward: per key keep the maximum of the
/// two sides, and drop keys that resolve to 0.
pub fn merge_reveal_map(existing: Option<&Value>, incoming: Option<&Value>) -> Value {
    let mut best: BTreeMap<String, (f64, Value)> = BTreeMap::new();

    for side in [existing, incoming] {
        let Some(map) = side.and_then(|v| v.as_object()) else {
            continue;
        };
        for (dispatch_id, raw) in map {
            let ts = normalize_ts(Some(raw));
            match best.get(dispatch_id) {
                Some((prev, _)) if *prev > ts => {}
                _ => {
                    best.insert(dispatch_id.clone(), (ts, raw.clone()));
                }
            }
        }
    }

    let mut out = Map::new();
    for (dispatch_id, (ts, raw)) in best {
        if ts > 0.0 {
            out.insert(dispatch_id, raw);
        }
    }
    Value::Object(out)
}

fn inbox_recency(inbox: &Value) -> f64 {
    ["updatedAt", "publishedAt", "clearedAt"]
        .iter()
        .map(|f| normalize_ts(inbox.get(*f)))
        .fold(0.0, f64::max)
}

/// Merge the ticket inbox, a single nested record rather than a log. The
/// side with the greater lifecycle timestamp overlays field-by-field onto
/// the other; if only one side has an inbox it wins outright.
pub fn merge_ticket_inbox(existing: Option<&Value>, incoming: Option<&Value>) -> Option<Value> {
    let existing = existing.filter(|v| v.is_object());
    let incoming = incoming.filter(|v| v.is_object());

    match (existing, incoming) {
        (None, None) => None,
        (Some(only), None) | (None, Some(only)) => Some(only.clone()),
        (Some(ex), Some(inc)) => {
            let merged = if inbox_recency(inc) >= inbox_recency(ex) {
                overlay(Some(ex), Some(inc))
            } else {
                overlay(Some(inc), Some(ex))
            };
            Some(Value::Object(merged))
        }
    }
}
