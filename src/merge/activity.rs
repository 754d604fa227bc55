use serde_json::Value;

use super::clock::normalize_ts;
use super::{json_num, overlay};

fn max_field(existing: Option<&Value>, incoming: Option<&Value>, field: &str) -> Option<Value> {
    let ex_raw = existing.and_then(|v| v.get(field));
    let inc_raw = incoming.and_then(|v| v.get(field));
    let ex = normalize_ts(ex_raw);
    let inc = normalize_ts(inc_raw);
    if ex == 0.0 && inc == 0.0 {
        return None;
    }
    // Clone the winning side's raw value so integer timestamps stay integers.
    if inc >= ex {
        inc_raw.cloned()
    } else {
        ex_raw.cloned()
    }
}

/// Merge presence/focus signals. The side seen more recently supplies the
/// point-in-time fields (`page`, `inFocus`, `visibilityState`); the two
/// monotonic timestamps each take their maximum, and `createdAt` keeps the
/// earliest known value.
pub fn merge_activity(existing: Option<&Value>, incoming: Option<&Value>, now_ms: i64) -> Value {
    let ex_presence = normalize_ts(existing.and_then(|v| v.get("lastPresenceAt")));
    let inc_presence = normalize_ts(incoming.and_then(|v| v.get("lastPresenceAt")));

    let mut out = if inc_presence >= ex_presence {
        overlay(existing, incoming)
    } else {
        overlay(incoming, existing)
    };

    for field in ["lastPresenceAt", "lastInteractionAt"] {
        match max_field(existing, incoming, field) {
            Some(v) => {
                out.insert(field.to_string(), v);
            }
            None => {
                out.insert(field.to_string(), json_num(0.0));
            }
        }
    }

    let ex_created = normalize_ts(existing.and_then(|v| v.get("createdAt")));
    let inc_created = normalize_ts(incoming.and_then(|v| v.get("createdAt")));
    let created = match (ex_created > 0.0, inc_created > 0.0) {
        (true, true) => json_num(ex_created.min(inc_created)),
        (true, false) => json_num(ex_created),
        (false, true) => json_num(inc_created),
        (false, false) => Value::from(now_ms),
    };
    out.insert("createdAt".to_string(), created);

    Value::Object(out)
}
