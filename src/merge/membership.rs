use serde_json::Value;

/// Resolved class membership for a merged profile.
pub struct Membership {
    pub class_id: Option<String>,
    pub class_ids: Vec<String>,
    pub class_name: Option<String>,
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    let id = id.trim();
    if !id.is_empty() && !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

// The roster list goes first so a canonical profile (whose classId is
// already a member of classIds) re-merges to the same order.
fn collect_side(ids: &mut Vec<String>, side: &Value) {
    if let Some(list) = side.get("classIds").and_then(|v| v.as_array()) {
        for entry in list {
            if let Some(id) = entry.as_str() {
                push_unique(ids, id);
            }
        }
    }
    if let Some(id) = side.get("classId").and_then(|v| v.as_str()) {
        push_unique(ids, id);
    }
}

fn side_class_id(side: &Value) -> Option<&str> {
    side.get("classId")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn side_class_name(side: &Value) -> Option<&str> {
    side.get("className")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

/// Union both sides' class memberships in first-seen order (existing side
/// first), then pick the preferred class: the fresher side's `classId` when
/// it survived the union, else the first member. `className` follows the
/// chosen id, preferring the fresher side's label for it.
pub fn merge_membership(existing: &Value, incoming: &Value, incoming_fresher: bool) -> Membership {
    let mut class_ids = Vec::new();
    collect_side(&mut class_ids, existing);
    collect_side(&mut class_ids, incoming);

    let (fresher, older) = if incoming_fresher {
        (incoming, existing)
    } else {
        (existing, incoming)
    };

    let class_id = side_class_id(fresher)
        .filter(|id| class_ids.iter().any(|c| c == id))
        .map(str::to_string)
        .or_else(|| class_ids.first().cloned());

    // The label must describe the chosen class; a side whose classId points
    // elsewhere has no say, even if it is the only side carrying a name.
    let class_name = class_id.as_deref().and_then(|chosen| {
        [fresher, older]
            .iter()
            .filter(|side| side_class_id(side) == Some(chosen))
            .find_map(|side| side_class_name(side))
            .map(str::to_string)
    });

    Membership {
        class_id,
        class_ids,
        class_name,
    }
}
