mod activity;
pub mod clock;
pub mod credentials;
pub mod dedup;
mod drill;
mod membership;
mod stats;
mod telemetry;
mod tickets;

use serde_json::{Map, Value};

use self::clock::{normalize_ts, profile_freshness};
use self::dedup::{merge_logs, problem_key};

// Storage bounds. Every merged collection is truncated to these, dropping
// the oldest entries first.
pub const RECENT_PROBLEMS_CAP: usize = 250;
pub const PROBLEM_LOG_CAP: usize = 5000;
pub const COMPLETIONS_CAP: usize = 1000;
pub const TELEMETRY_EVENTS_CAP: usize = 1200;
pub const TELEMETRY_DAYS_CAP: usize = 120;
pub const TICKET_RESPONSES_CAP: usize = 500;

/// Shallow field-by-field overlay: `top`'s fields shadow `base`'s. Sides
/// that are absent or not objects contribute nothing.
pub(crate) fn overlay(base: Option<&Value>, top: Option<&Value>) -> Map<String, Value> {
    let mut out = base
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();
    if let Some(top) = top.and_then(|v| v.as_object()) {
        for (k, v) in top {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

/// Borrow a log array off a sub-record, tolerating absence and junk.
pub(crate) fn log_slice<'a>(record: Option<&'a Value>, field: &str) -> &'a [Value] {
    record
        .and_then(|v| v.get(field))
        .and_then(|v| v.as_array())
        .map(|a| a.as_slice())
        .unwrap_or(&[])
}

/// Render a computed number without forcing whole counts into floats.
pub(crate) fn json_num(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or_else(|| Value::from(0))
    }
}

fn top_log<'a>(profile: &'a Value, field: &str) -> &'a [Value] {
    log_slice(Some(profile), field)
}

/// Merge a stored profile with a client submission into the single canonical
/// record the caller persists verbatim.
///
/// This is a pure function: no I/O, no locking, no clock reads (`now_ms`
/// comes from the caller). It never fails; absent or malformed sub-records
/// are replaced with empty defaults, so the output always satisfies the
/// storage invariants. Merging a canonical profile with itself returns it
/// unchanged.
pub fn merge_profiles(existing: Option<&Value>, incoming: &Value, now_ms: i64) -> Value {
    let empty = Value::Object(Map::new());
    let ex = existing.unwrap_or(&empty);

    // The side with more recent embedded activity supplies defaults for
    // every scalar without its own sub-merger. Incoming wins exact ties,
    // matching the dedup-log source-rank asymmetry.
    let incoming_fresher = profile_freshness(incoming) >= profile_freshness(ex);
    let (older, fresher) = if incoming_fresher {
        (ex, incoming)
    } else {
        (incoming, ex)
    };
    let mut out = overlay(Some(older), Some(fresher));

    let recent = merge_logs(
        top_log(ex, "recentProblems"),
        top_log(incoming, "recentProblems"),
        Some("timestamp"),
        RECENT_PROBLEMS_CAP,
        problem_key,
    );
    let log = merge_logs(
        top_log(ex, "problemLog"),
        top_log(incoming, "problemLog"),
        Some("timestamp"),
        PROBLEM_LOG_CAP,
        problem_key,
    );

    out.insert(
        "tableDrill".to_string(),
        drill::merge_table_drill(ex.get("tableDrill"), incoming.get("tableDrill")),
    );
    out.insert(
        "telemetry".to_string(),
        telemetry::merge_telemetry(ex.get("telemetry"), incoming.get("telemetry")),
    );
    out.insert(
        "ticketResponses".to_string(),
        Value::Array(tickets::merge_ticket_responses(
            top_log(ex, "ticketResponses"),
            top_log(incoming, "ticketResponses"),
        )),
    );
    out.insert(
        "ticketRevealAll".to_string(),
        tickets::merge_reveal_map(ex.get("ticketRevealAll"), incoming.get("ticketRevealAll")),
    );
    match tickets::merge_ticket_inbox(ex.get("ticketInbox"), incoming.get("ticketInbox")) {
        Some(inbox) => {
            out.insert("ticketInbox".to_string(), inbox);
        }
        None => {
            out.remove("ticketInbox");
        }
    }
    out.insert(
        "activity".to_string(),
        activity::merge_activity(ex.get("activity"), incoming.get("activity"), now_ms),
    );

    let m = membership::merge_membership(ex, incoming, incoming_fresher);
    out.insert(
        "classIds".to_string(),
        Value::Array(m.class_ids.into_iter().map(Value::String).collect()),
    );
    match m.class_id {
        Some(id) => {
            out.insert("classId".to_string(), Value::String(id));
        }
        None => {
            out.insert("classId".to_string(), Value::Null);
        }
    }
    match m.class_name {
        Some(name) => {
            out.insert("className".to_string(), Value::String(name));
        }
        None => {
            out.remove("className");
        }
    }

    out.insert(
        "stats".to_string(),
        stats::merge_stats(
            ex.get("stats"),
            incoming.get("stats"),
            incoming_fresher,
            &log,
            &recent,
        ),
    );

    // Difficulty comes from the freshness overlay, clamped to the invariants.
    let current = out
        .get("currentDifficulty")
        .and_then(|v| v.as_f64())
        .filter(|n| n.is_finite())
        .unwrap_or(1.0)
        .max(1.0);
    let highest = out
        .get("highestDifficulty")
        .and_then(|v| v.as_f64())
        .filter(|n| n.is_finite())
        .unwrap_or(current)
        .max(current);
    out.insert("currentDifficulty".to_string(), json_num(current));
    out.insert("highestDifficulty".to_string(), json_num(highest));

    let ex_created = normalize_ts(ex.get("created_at"));
    let inc_created = normalize_ts(incoming.get("created_at"));
    let created = match (ex_created > 0.0, inc_created > 0.0) {
        (true, true) => json_num(ex_created.min(inc_created)),
        (true, false) => json_num(ex_created),
        (false, true) => json_num(inc_created),
        (false, false) => Value::from(now_ms),
    };
    out.insert("created_at".to_string(), created);

    let mut auth = credentials::merge_auth(ex.get("auth"), incoming.get("auth"));
    credentials::normalize_auth(&mut auth);
    if auth.as_object().map(|m| m.is_empty()).unwrap_or(true) {
        out.remove("auth");
    } else {
        out.insert("auth".to_string(), auth);
    }

    out.insert("recentProblems".to_string(), Value::Array(recent));
    out.insert("problemLog".to_string(), Value::Array(log));

    Value::Object(out)
}
