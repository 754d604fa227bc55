use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::merge;
use crate::merge::credentials;
use serde_json::json;

/// Pull the plaintext password a client attached to a save request: either
/// a top-level param or embedded in the submitted profile's auth record.
fn submitted_password<'a>(req: &'a Request, profile: &'a serde_json::Value) -> Option<&'a str> {
    req.params
        .get("password")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            profile
                .get("auth")
                .and_then(|a| a.get("password"))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
        })
}

fn handle_profile_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first");
    };

    let username = match req.params.get("username").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => db::normalize_student_id(v),
        _ => return err(&req.id, "bad_params", "missing username"),
    };
    let Some(profile) = req.params.get("profile").filter(|v| v.is_object()) else {
        return err(&req.id, "bad_params", "profile must be an object");
    };

    let key = db::profile_key(&username);
    let existing = match db::profile_get(conn, &key) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "storage_unavailable", e.to_string()),
    };

    // Authorization is a precondition of the merge, not part of it: a write
    // needs a teacher override, a password matching the stored credentials,
    // or no stored profile at all (first write establishes credentials).
    let teacher_override = req
        .params
        .get("teacherOverride")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !teacher_override {
        if let Some(stored) = existing.as_ref() {
            let stored_auth = stored.get("auth").cloned().unwrap_or(json!({}));
            if credentials::requires_password(&stored_auth) {
                let authorized = submitted_password(req, profile)
                    .map(|p| credentials::verify_password(&stored_auth, p))
                    .unwrap_or(false);
                if !authorized {
                    return err(
                        &req.id,
                        "unauthorized",
                        "password does not match stored credentials",
                    );
                }
            }
        }
    }

    let now_ms = chrono::Utc::now().timestamp_millis();
    let merged = merge::merge_profiles(existing.as_ref(), profile, now_ms);

    if let Err(e) = db::profile_set(conn, &key, &merged) {
        return err(&req.id, "storage_unavailable", e.to_string());
    }
    if let Err(e) = db::add_to_index(conn, db::STUDENT_INDEX, &username) {
        return err(&req.id, "storage_unavailable", e.to_string());
    }

    ok(
        &req.id,
        json!({
            "username": username,
            "created": existing.is_none(),
            "profile": merged
        }),
    )
}

fn handle_profile_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first");
    };
    let username = match req.params.get("username").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => db::normalize_student_id(v),
        _ => return err(&req.id, "bad_params", "missing username"),
    };

    match db::profile_get(conn, &db::profile_key(&username)) {
        Ok(Some(profile)) => ok(
            &req.id,
            json!({ "username": username, "profile": profile }),
        ),
        Ok(None) => err(&req.id, "not_found", "no profile for student"),
        Err(e) => err(&req.id, "storage_unavailable", e.to_string()),
    }
}

fn handle_profile_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first");
    };
    match db::index_members(conn, db::STUDENT_INDEX) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "storage_unavailable", e.to_string()),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "profile.save" => Some(handle_profile_save(state, req)),
        "profile.get" => Some(handle_profile_get(state, req)),
        "profile.list" => Some(handle_profile_list(state, req)),
        _ => None,
    }
}
