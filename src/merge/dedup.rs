use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use super::clock::normalize_ts;

/// Source rank of the previously stored side. Incoming records carry rank 1
/// and win exact-timestamp ties; this asymmetry is intentional and load-bearing
/// (a re-submission of the same record with corrections must stick).
const RANK_EXISTING: u8 = 0;
const RANK_INCOMING: u8 = 1;

struct Winner {
    ts: f64,
    rank: u8,
    seq: usize,
    record: Value,
}

/// Merge two chronological record logs into one deduplicated, capped log.
///
/// Records are grouped by `key_of`; within a group the winner is the record
/// with the strictly greater timestamp, or on an exact tie the one with the
/// greater-or-equal source rank (so incoming beats existing). The output is
/// sorted ascending by timestamp and truncated to the most recent `cap`
/// entries, dropping from the front.
pub fn merge_logs<F>(
    existing: &[Value],
    incoming: &[Value],
    ts_field: Option<&str>,
    cap: usize,
    key_of: F,
) -> Vec<Value>
where
    F: Fn(&Value) -> String,
{
    let mut out = pick_winners(existing, incoming, ts_field, key_of);
    out.sort_by(|a, b| {
        a.ts.partial_cmp(&b.ts)
            .unwrap_or(Ordering::Equal)
            .then(a.seq.cmp(&b.seq))
    });
    if out.len() > cap {
        out.drain(..out.len() - cap);
    }
    out.into_iter().map(|w| w.record).collect()
}

/// Like `merge_logs` but ordered newest-first, truncating the oldest
/// entries off the back. Records with equal timestamps keep their
/// first-seen relative order in either direction, so a list that is
/// already in storage order merges with itself unchanged.
pub fn merge_logs_desc<F>(
    existing: &[Value],
    incoming: &[Value],
    ts_field: Option<&str>,
    cap: usize,
    key_of: F,
) -> Vec<Value>
where
    F: Fn(&Value) -> String,
{
    let mut out = pick_winners(existing, incoming, ts_field, key_of);
    out.sort_by(|a, b| {
        b.ts.partial_cmp(&a.ts)
            .unwrap_or(Ordering::Equal)
            .then(a.seq.cmp(&b.seq))
    });
    out.truncate(cap);
    out.into_iter().map(|w| w.record).collect()
}

fn pick_winners<F>(
    existing: &[Value],
    incoming: &[Value],
    ts_field: Option<&str>,
    key_of: F,
) -> Vec<Winner>
where
    F: Fn(&Value) -> String,
{
    let mut winners: HashMap<String, Winner> = HashMap::new();
    let mut seq = 0usize;

    for (rank, side) in [(RANK_EXISTING, existing), (RANK_INCOMING, incoming)] {
        for record in side {
            let key = key_of(record);
            let ts = match ts_field {
                Some(f) => normalize_ts(record.get(f)),
                None => 0.0,
            };
            match winners.get_mut(&key) {
                Some(w) => {
                    if ts > w.ts || (ts == w.ts && rank >= w.rank) {
                        w.ts = ts;
                        w.rank = rank;
                        w.record = record.clone();
                    }
                }
                None => {
                    winners.insert(
                        key,
                        Winner {
                            ts,
                            rank,
                            seq,
                            record: record.clone(),
                        },
                    );
                    seq += 1;
                }
            }
        }
    }

    winners.into_values().collect()
}

/// Deterministic fingerprint of a JSON value: object keys sorted at every
/// level so that two structurally equal records always serialize the same.
pub fn stable_json(v: &Value) -> String {
    match v {
        Value::Object(map) => {
            let mut sorted: BTreeMap<&String, String> = BTreeMap::new();
            for (k, val) in map {
                sorted.insert(k, stable_json(val));
            }
            let inner: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{:?}:{}", k, v))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(stable_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}

fn present(v: Option<&Value>) -> Option<&Value> {
    v.filter(|v| !v.is_null())
}

/// Identity of a problem-history entry. Entries with a `problemId` collapse
/// on it; legacy entries without one collapse on a composite of what the
/// client could not have varied between duplicate submissions.
pub fn problem_key(record: &Value) -> String {
    if let Some(id) = present(record.get("problemId")) {
        return format!("id:{}", stable_json(id));
    }
    let kind = record.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let ts = normalize_ts(record.get("timestamp")).round();
    let answer = record.get("answer").map(stable_json).unwrap_or_default();
    let correct = record
        .get("correctAnswer")
        .map(stable_json)
        .unwrap_or_default();

    let mut aux: BTreeMap<&String, String> = BTreeMap::new();
    if let Some(obj) = record.as_object() {
        for (k, v) in obj {
            match k.as_str() {
                "problemId" | "type" | "timestamp" | "answer" | "correctAnswer" => {}
                _ => {
                    aux.insert(k, stable_json(v));
                }
            }
        }
    }
    let aux: Vec<String> = aux
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    format!("{}|{}|{}|{}|{}", kind, ts, answer, correct, aux.join(","))
}

/// Table-drill completions are unique per (table, timestamp).
pub fn completion_key(record: &Value) -> String {
    format!(
        "{}@{}",
        record.get("table").map(stable_json).unwrap_or_default(),
        normalize_ts(record.get("timestamp"))
    )
}

/// Ticket responses are unique per dispatch; a response that somehow lost
/// its dispatch id only ever collapses with an exact duplicate of itself.
pub fn ticket_response_key(record: &Value) -> String {
    match present(record.get("dispatchId")) {
        Some(id) => format!("dispatch:{}", stable_json(id)),
        None => stable_json(record),
    }
}

/// Telemetry events are unique per (timestamp, type, payload).
pub fn telemetry_event_key(record: &Value) -> String {
    let kind = record.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let ts = normalize_ts(record.get("timestamp"));
    let mut payload: BTreeMap<&String, String> = BTreeMap::new();
    if let Some(obj) = record.as_object() {
        for (k, v) in obj {
            if k != "type" && k != "timestamp" {
                payload.insert(k, stable_json(v));
            }
        }
    }
    let payload: Vec<String> = payload
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    format!("{}|{}|{}", ts, kind, payload.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn incoming_wins_exact_timestamp_tie() {
        let existing = vec![json!({ "problemId": "a", "timestamp": 1 })];
        let incoming = vec![json!({ "problemId": "a", "timestamp": 1, "answer": "x" })];
        let merged = merge_logs(&existing, &incoming, Some("timestamp"), 100, problem_key);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].get("answer"), Some(&json!("x")));
    }

    #[test]
    fn strictly_newer_existing_record_survives() {
        let existing = vec![json!({ "problemId": "a", "timestamp": 5, "answer": "keep" })];
        let incoming = vec![json!({ "problemId": "a", "timestamp": 3, "answer": "stale" })];
        let merged = merge_logs(&existing, &incoming, Some("timestamp"), 100, problem_key);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].get("answer"), Some(&json!("keep")));
    }

    #[test]
    fn output_sorted_ascending_and_capped_from_front() {
        let existing: Vec<Value> = (0..5)
            .map(|i| json!({ "problemId": format!("e{i}"), "timestamp": i * 10 }))
            .collect();
        let incoming = vec![json!({ "problemId": "n", "timestamp": 35 })];
        let merged = merge_logs(&existing, &incoming, Some("timestamp"), 3, problem_key);
        let stamps: Vec<f64> = merged
            .iter()
            .map(|r| normalize_ts(r.get("timestamp")))
            .collect();
        assert_eq!(stamps, vec![30.0, 35.0, 40.0]);
    }

    #[test]
    fn descending_merge_caps_off_the_oldest() {
        let existing: Vec<Value> = (0..4)
            .map(|i| json!({ "dispatchId": format!("d{i}"), "answeredAt": 100 - i * 10 }))
            .collect();
        let merged = merge_logs_desc(&existing, &[], Some("answeredAt"), 2, ticket_response_key);
        let stamps: Vec<f64> = merged
            .iter()
            .map(|r| normalize_ts(r.get("answeredAt")))
            .collect();
        assert_eq!(stamps, vec![100.0, 90.0]);
    }

    #[test]
    fn identical_resubmission_without_id_collapses() {
        let rec = json!({
            "type": "multiplication",
            "timestamp": 1000,
            "answer": 42,
            "correctAnswer": 42,
            "timeSpent": 7
        });
        let merged = merge_logs(
            std::slice::from_ref(&rec),
            std::slice::from_ref(&rec),
            Some("timestamp"),
            100,
            problem_key,
        );
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn near_duplicates_without_id_stay_distinct() {
        let a = json!({ "type": "addition", "timestamp": 1000, "answer": 4, "correctAnswer": 4 });
        let b = json!({ "type": "addition", "timestamp": 1000, "answer": 5, "correctAnswer": 4 });
        let merged = merge_logs(&[a], &[b], Some("timestamp"), 100, problem_key);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn stable_json_ignores_key_order() {
        let a = serde_json::from_str::<Value>(r#"{"b":1,"a":{"y":2,"x":3}}"#).unwrap();
        let b = serde_json::from_str::<Value>(r#"{"a":{"x":3,"y":2},"b":1}"#).unwrap();
        assert_eq!(stable_json(&a), stable_json(&b));
    }
}
