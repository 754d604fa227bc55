use serde_json::Value;

use super::dedup::{completion_key, merge_logs};
use super::{log_slice, overlay, COMPLETIONS_CAP};

/// Merge the multiplication-table practice sub-record. Completions are a
/// dedup log keyed (table, timestamp); `dailyBossShownDate` is an ISO date
/// string, so the lexicographically greatest non-empty value is the latest.
/// Every other field follows incoming-shadows-existing precedence.
pub fn merge_table_drill(existing: Option<&Value>, incoming: Option<&Value>) -> Value {
    let mut out = overlay(existing, incoming);

    let completions = merge_logs(
        log_slice(existing, "completions"),
        log_slice(incoming, "completions"),
        Some("timestamp"),
        COMPLETIONS_CAP,
        completion_key,
    );
    out.insert("completions".to_string(), Value::Array(completions));

    let boss_date = [existing, incoming]
        .iter()
        .filter_map(|side| {
            side.and_then(|v| v.get("dailyBossShownDate"))
                .and_then(|v| v.as_str())
        })
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .max()
        .map(str::to_string);
    match boss_date {
        Some(date) => {
            out.insert("dailyBossShownDate".to_string(), Value::String(date));
        }
        None => {
            out.remove("dailyBossShownDate");
        }
    }

    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completions_union_and_incoming_scalars_shadow() {
        let existing = json!({
            "completions": [{ "table": 3, "timestamp": 100 }],
            "currentTable": 3,
            "streak": 4
        });
        let incoming = json!({
            "completions": [
                { "table": 3, "timestamp": 100 },
                { "table": 4, "timestamp": 200 }
            ],
            "currentTable": 5
        });
        let merged = merge_table_drill(Some(&existing), Some(&incoming));
        assert_eq!(merged["completions"].as_array().map(|a| a.len()), Some(2));
        assert_eq!(merged["currentTable"], json!(5));
        assert_eq!(merged["streak"], json!(4));
    }

    #[test]
    fn boss_date_takes_lexicographic_max() {
        let existing = json!({ "dailyBossShownDate": "2026-03-02" });
        let incoming = json!({ "dailyBossShownDate": "2026-02-28" });
        let merged = merge_table_drill(Some(&existing), Some(&incoming));
        assert_eq!(merged["dailyBossShownDate"], json!("2026-03-02"));
    }

    #[test]
    fn empty_boss_dates_are_dropped() {
        let existing = json!({ "dailyBossShownDate": "" });
        let merged = merge_table_drill(Some(&existing), None);
        assert!(merged.get("dailyBossShownDate").is_none());
        assert_eq!(merged["completions"], json!([]));
    }
}
