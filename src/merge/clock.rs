use serde_json::Value;

/// Coerce an arbitrary JSON field into a usable epoch-millis value.
/// Clients submit timestamps as numbers, numeric strings, or garbage;
/// anything non-finite or negative collapses to 0, which all downstream
/// comparisons treat as "unknown", never as a valid instant.
pub fn normalize_ts(v: Option<&Value>) -> f64 {
    let Some(v) = v else {
        return 0.0;
    };
    let n = match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if n.is_finite() && n >= 0.0 {
        n
    } else {
        0.0
    }
}

fn scan_log(profile: &Value, field: &str, ts_field: &str, best: &mut f64) {
    let Some(items) = profile.get(field).and_then(|v| v.as_array()) else {
        return;
    };
    for item in items {
        let ts = normalize_ts(item.get(ts_field));
        if ts > *best {
            *best = ts;
        }
    }
}

fn scan_field(record: Option<&Value>, field: &str, best: &mut f64) {
    let ts = normalize_ts(record.and_then(|v| v.get(field)));
    if ts > *best {
        *best = ts;
    }
}

/// Overall freshness of a profile copy: the maximum timestamp embedded
/// anywhere in its record entries. This single scalar decides which side
/// supplies defaults for fields without their own timestamp during the
/// top-level merge. Keep this as the one source of "which side is newer";
/// per-field freshness is re-derived nowhere else.
pub fn profile_freshness(profile: &Value) -> f64 {
    let mut best = 0.0_f64;

    scan_log(profile, "recentProblems", "timestamp", &mut best);
    scan_log(profile, "problemLog", "timestamp", &mut best);

    if let Some(drill) = profile.get("tableDrill") {
        scan_log(drill, "completions", "timestamp", &mut best);
    }

    scan_log(profile, "ticketResponses", "answeredAt", &mut best);

    let inbox = profile.get("ticketInbox");
    scan_field(inbox, "updatedAt", &mut best);
    scan_field(inbox, "publishedAt", &mut best);
    scan_field(inbox, "clearedAt", &mut best);

    let activity = profile.get("activity");
    scan_field(activity, "lastPresenceAt", &mut best);
    scan_field(activity, "lastInteractionAt", &mut best);

    scan_field(profile.get("auth"), "lastLoginAt", &mut best);

    best
}
