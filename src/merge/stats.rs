use serde_json::Value;

use super::{json_num, overlay};

fn counter(side: Option<&Value>, field: &str) -> f64 {
    let n = side
        .and_then(|v| v.get(field))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    if n.is_finite() && n >= 0.0 {
        n
    } else {
        0.0
    }
}

fn correct_entries(log: &[Value]) -> usize {
    log.iter()
        .filter(|r| r.get("correct").and_then(|v| v.as_bool()) == Some(true))
        .count()
}

fn type_stat_keys(side: Option<&Value>) -> usize {
    side.and_then(|v| v.get("typeStats"))
        .and_then(|v| v.as_object())
        .map(|m| m.len())
        .unwrap_or(0)
}

fn non_empty_list<'a>(side: Option<&'a Value>, field: &str) -> Option<&'a Value> {
    side.and_then(|v| v.get(field))
        .filter(|v| v.as_array().map(|a| !a.is_empty()).unwrap_or(false))
}

/// Aggregate stats are not merged field-by-field; they are re-derived.
/// Lifetime counters take the maximum of both sides' claims and the merged
/// history logs, so history-derived counts can only grow. Rates are always
/// recomputed from the merged totals and never carried over verbatim.
pub fn merge_stats(
    existing: Option<&Value>,
    incoming: Option<&Value>,
    incoming_fresher: bool,
    problem_log: &[Value],
    recent_problems: &[Value],
) -> Value {
    let (older, fresher) = if incoming_fresher {
        (existing, incoming)
    } else {
        (incoming, existing)
    };
    let mut out = overlay(older, fresher);

    let log_floor = problem_log.len().max(recent_problems.len()) as f64;
    let correct_floor = correct_entries(problem_log).max(correct_entries(recent_problems)) as f64;

    let total = counter(existing, "lifetimeProblems")
        .max(counter(incoming, "lifetimeProblems"))
        .max(log_floor);
    let correct = counter(existing, "lifetimeCorrectAnswers")
        .max(counter(incoming, "lifetimeCorrectAnswers"))
        .max(correct_floor)
        .min(total);
    let time_spent =
        counter(existing, "lifetimeTimeSpent").max(counter(incoming, "lifetimeTimeSpent"));
    let speed_problems = counter(existing, "speedProblems").max(counter(incoming, "speedProblems"));
    let speed_time = counter(existing, "speedTimeSpent").max(counter(incoming, "speedTimeSpent"));

    out.insert("lifetimeProblems".to_string(), json_num(total));
    out.insert("lifetimeCorrectAnswers".to_string(), json_num(correct));
    out.insert("lifetimeTimeSpent".to_string(), json_num(time_spent));
    out.insert("speedProblems".to_string(), json_num(speed_problems));
    out.insert("speedTimeSpent".to_string(), json_num(speed_time));

    let rate = if total > 0.0 { correct / total } else { 0.0 };
    let avg_time = if total > 0.0 { time_spent / total } else { 0.0 };
    let avg_speed_time = if speed_problems > 0.0 {
        speed_time / speed_problems
    } else {
        0.0
    };
    out.insert("overallSuccessRate".to_string(), json_num(rate));
    out.insert("avgTimePerProblem".to_string(), json_num(avg_time));
    out.insert("avgSpeedTimePerProblem".to_string(), json_num(avg_speed_time));

    // Per-type breakdowns carry no timestamps; the side that has seen more
    // distinct problem types is the one that has seen more of the world.
    let (first, second) = if incoming_fresher {
        (incoming, existing)
    } else {
        (existing, incoming)
    };
    let type_stats = if type_stat_keys(first) >= type_stat_keys(second) {
        first.and_then(|v| v.get("typeStats")).cloned()
    } else {
        second.and_then(|v| v.get("typeStats")).cloned()
    };
    match type_stats.filter(|v| v.is_object()) {
        Some(v) => {
            out.insert("typeStats".to_string(), v);
        }
        None => {
            out.insert("typeStats".to_string(), Value::Object(Default::default()));
        }
    }

    for field in ["weakestTypes", "strongestTypes"] {
        let list = non_empty_list(fresher, field)
            .or_else(|| non_empty_list(older, field))
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        out.insert(field.to_string(), list);
    }

    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log_of(n: usize, correct: usize) -> Vec<Value> {
        (0..n)
            .map(|i| json!({ "problemId": format!("p{i}"), "timestamp": i, "correct": i < correct }))
            .collect()
    }

    #[test]
    fn counters_never_shrink_below_either_side_or_merged_log() {
        let existing = json!({ "lifetimeProblems": 10, "lifetimeCorrectAnswers": 8 });
        let incoming = json!({ "lifetimeProblems": 7, "lifetimeCorrectAnswers": 9 });
        let log = log_of(12, 3);
        let merged = merge_stats(Some(&existing), Some(&incoming), true, &log, &[]);
        assert_eq!(merged["lifetimeProblems"], json!(12));
        assert_eq!(merged["lifetimeCorrectAnswers"], json!(9));
    }

    #[test]
    fn correct_is_clamped_to_total() {
        let existing = json!({ "lifetimeProblems": 5, "lifetimeCorrectAnswers": 40 });
        let merged = merge_stats(Some(&existing), None, false, &[], &[]);
        assert_eq!(merged["lifetimeCorrectAnswers"], merged["lifetimeProblems"]);
    }

    #[test]
    fn rates_are_recomputed_not_carried() {
        let existing = json!({
            "lifetimeProblems": 4,
            "lifetimeCorrectAnswers": 2,
            "lifetimeTimeSpent": 40,
            "overallSuccessRate": 0.99,
            "avgTimePerProblem": 123.0
        });
        let merged = merge_stats(Some(&existing), None, false, &[], &[]);
        assert_eq!(merged["overallSuccessRate"], json!(0.5));
        assert_eq!(merged["avgTimePerProblem"], json!(10));
    }

    #[test]
    fn type_stats_come_from_the_side_with_more_keys() {
        let existing = json!({
            "typeStats": { "add": {}, "sub": {}, "mul": {} },
            "weakestTypes": ["mul"]
        });
        let incoming = json!({ "typeStats": { "add": {} }, "weakestTypes": [] });
        let merged = merge_stats(Some(&existing), Some(&incoming), true, &[], &[]);
        assert_eq!(merged["typeStats"].as_object().unwrap().len(), 3);
        assert_eq!(merged["weakestTypes"], json!(["mul"]));
    }

    #[test]
    fn empty_inputs_produce_zeroed_stats() {
        let merged = merge_stats(None, None, true, &[], &[]);
        assert_eq!(merged["lifetimeProblems"], json!(0));
        assert_eq!(merged["overallSuccessRate"], json!(0));
        assert_eq!(merged["typeStats"], json!({}));
        assert_eq!(merged["weakestTypes"], json!([]));
    }
}
