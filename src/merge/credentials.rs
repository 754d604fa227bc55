use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::clock::normalize_ts;
use super::{json_num, overlay};

/// Credential scheme written by this daemon. Legacy records may still carry
/// a bare `password` field; those are hashed on the next write and the
/// plaintext is never persisted again.
pub const HASH_SCHEME: &str = "sha256-v1";

const CREDENTIAL_FIELDS: [&str; 4] = ["scheme", "salt", "hash", "password"];

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn non_empty_str<'a>(auth: &'a Value, field: &str) -> Option<&'a str> {
    auth.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// A valid hashed credential is the full triple; a partial triple is treated
/// as absent rather than guessed at.
pub fn has_hashed_triple(auth: &Value) -> bool {
    non_empty_str(auth, "scheme").is_some()
        && non_empty_str(auth, "salt").is_some()
        && non_empty_str(auth, "hash").is_some()
}

#[allow(dead_code)]
pub fn has_plaintext(auth: &Value) -> bool {
    non_empty_str(auth, "password").is_some()
}

/// Whether a stored profile gates writes behind a password check.
pub fn requires_password(auth: &Value) -> bool {
    has_hashed_triple(auth) || has_plaintext(auth)
}

/// Check a submitted plaintext password against stored credentials.
pub fn verify_password(auth: &Value, password: &str) -> bool {
    if let (Some(salt), Some(hash)) = (non_empty_str(auth, "salt"), non_empty_str(auth, "hash")) {
        return hash_password(salt, password) == hash;
    }
    match non_empty_str(auth, "password") {
        Some(stored) => stored == password,
        None => false,
    }
}

/// Pick a single password source and assemble the merged auth record.
///
/// The side with the greater `passwordUpdatedAt` supplies the credential
/// fields exclusively; on an exact tie a side holding a valid hashed triple
/// beats a side holding only legacy plaintext, and incoming beats existing.
/// `lastLoginAt` and `loginCount` take their maxima regardless of source.
pub fn merge_auth(existing: Option<&Value>, incoming: Option<&Value>) -> Value {
    let empty = Value::Object(Map::new());
    let ex = existing.unwrap_or(&empty);
    let inc = incoming.unwrap_or(&empty);

    let ex_ts = normalize_ts(ex.get("passwordUpdatedAt"));
    let inc_ts = normalize_ts(inc.get("passwordUpdatedAt"));
    let source = if inc_ts > ex_ts {
        inc
    } else if ex_ts > inc_ts {
        ex
    } else if has_hashed_triple(ex) && !has_hashed_triple(inc) {
        ex
    } else {
        inc
    };

    let mut out = overlay(Some(ex), Some(inc));
    for field in CREDENTIAL_FIELDS {
        out.remove(field);
    }
    if has_hashed_triple(source) {
        for field in ["scheme", "salt", "hash"] {
            if let Some(v) = source.get(field) {
                out.insert(field.to_string(), v.clone());
            }
        }
    } else if let Some(password) = source.get("password").filter(|v| !v.is_null()) {
        out.insert("password".to_string(), password.clone());
    }
    match source.get("passwordUpdatedAt") {
        Some(v) if !v.is_null() => {
            out.insert("passwordUpdatedAt".to_string(), v.clone());
        }
        _ => {
            out.remove("passwordUpdatedAt");
        }
    }

    let ex_login = normalize_ts(ex.get("lastLoginAt"));
    let inc_login = normalize_ts(inc.get("lastLoginAt"));
    if ex_login > 0.0 || inc_login > 0.0 {
        let winner = if inc_login >= ex_login { inc } else { ex };
        if let Some(v) = winner.get("lastLoginAt") {
            out.insert("lastLoginAt".to_string(), v.clone());
        }
    }
    let logins = counter(ex, "loginCount").max(counter(inc, "loginCount"));
    if logins > 0.0 {
        out.insert("loginCount".to_string(), json_num(logins));
    }

    Value::Object(out)
}

fn counter(auth: &Value, field: &str) -> f64 {
    let n = auth.get(field).and_then(|v| v.as_f64()).unwrap_or(0.0);
    if n.is_finite() && n >= 0.0 {
        n
    } else {
        0.0
    }
}

/// Storage normalization: a plaintext password surviving the merge is hashed
/// with a fresh salt before persistence, so the stored record holds exactly
/// one of the hashed triple or nothing.
pub fn normalize_auth(auth: &mut Value) {
    let Some(map) = auth.as_object_mut() else {
        return;
    };
    let password = map
        .get("password")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let Some(password) = password else {
        map.remove("password");
        return;
    };
    let already_hashed = ["scheme", "salt", "hash"].iter().all(|f| {
        map.get(*f)
            .and_then(|v| v.as_str())
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    });
    if already_hashed {
        map.remove("password");
        return;
    }
    let salt = Uuid::new_v4().simple().to_string();
    let hash = hash_password(&salt, &password);
    map.insert("scheme".to_string(), Value::String(HASH_SCHEME.to_string()));
    map.insert("salt".to_string(), Value::String(salt));
    map.insert("hash".to_string(), Value::String(hash));
    map.remove("password");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hashed_auth(password: &str, updated_at: i64) -> Value {
        let salt = "fixedsalt";
        json!({
            "scheme": HASH_SCHEME,
            "salt": salt,
            "hash": hash_password(salt, password),
            "passwordUpdatedAt": updated_at
        })
    }

    #[test]
    fn hash_beats_plaintext_on_exact_tie() {
        let existing = hashed_auth("secret", 100);
        let incoming = json!({ "password": "secret", "passwordUpdatedAt": 100 });
        let merged = merge_auth(Some(&existing), Some(&incoming));
        assert!(has_hashed_triple(&merged));
        assert!(!has_plaintext(&merged));
    }

    #[test]
    fn fresher_source_wins_and_fields_are_exclusive() {
        let existing = hashed_auth("old-secret", 100);
        let incoming = json!({ "password": "new-secret", "passwordUpdatedAt": 200 });
        let mut merged = merge_auth(Some(&existing), Some(&incoming));
        assert!(has_plaintext(&merged));
        assert!(!has_hashed_triple(&merged));

        normalize_auth(&mut merged);
        assert!(has_hashed_triple(&merged));
        assert!(!has_plaintext(&merged));
        assert!(verify_password(&merged, "new-secret"));
    }

    #[test]
    fn login_bookkeeping_takes_maxima_across_sides() {
        let existing = json!({ "lastLoginAt": 500, "loginCount": 12 });
        let incoming = json!({ "lastLoginAt": 300, "loginCount": 14 });
        let merged = merge_auth(Some(&existing), Some(&incoming));
        assert_eq!(merged["lastLoginAt"], json!(500));
        assert_eq!(merged["loginCount"], json!(14));
    }

    #[test]
    fn verify_accepts_hash_and_legacy_plaintext() {
        assert!(verify_password(&hashed_auth("pw", 1), "pw"));
        assert!(!verify_password(&hashed_auth("pw", 1), "other"));
        assert!(verify_password(&json!({ "password": "legacy" }), "legacy"));
        assert!(!verify_password(&json!({}), "anything"));
    }

    #[test]
    fn normalize_is_stable_for_already_hashed_auth() {
        let mut auth = hashed_auth("pw", 1);
        let before = auth.clone();
        normalize_auth(&mut auth);
        assert_eq!(auth, before);
    }

    #[test]
    fn empty_sides_merge_to_credential_free_auth() {
        let merged = merge_auth(None, None);
        assert!(!requires_password(&merged));
        assert_eq!(merged, json!({}));
    }
}
