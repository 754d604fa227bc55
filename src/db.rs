use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;

/// Index set holding every student id that has a stored profile.
pub const STUDENT_INDEX: &str = "students";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("abacus.sqlite3");
    let conn = Connection::open(db_path)?;

    // The storage collaborator is a plain key-value store: canonical profile
    // JSON under a per-student key, plus named index sets for enumeration.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS index_sets(
            set_name TEXT NOT NULL,
            member TEXT NOT NULL,
            PRIMARY KEY(set_name, member)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_index_sets_set ON index_sets(set_name)",
        [],
    )?;

    Ok(conn)
}

/// Storage key for a student identifier. Identifiers are case-insensitive;
/// the lowercased form is canonical.
pub fn profile_key(student_id: &str) -> String {
    format!("profile:{}", normalize_student_id(student_id))
}

pub fn normalize_student_id(student_id: &str) -> String {
    student_id.trim().to_ascii_lowercase()
}

pub fn profile_get(conn: &Connection, key: &str) -> anyhow::Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM profiles WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_str(&raw)?))
}

pub fn profile_set(conn: &Connection, key: &str, profile: &Value) -> anyhow::Result<()> {
    let raw = serde_json::to_string(profile)?;
    conn.execute(
        "INSERT INTO profiles(key, value, updated_at) VALUES(?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        (key, &raw, Utc::now().to_rfc3339()),
    )?;
    Ok(())
}

pub fn add_to_index(conn: &Connection, set_name: &str, member: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO index_sets(set_name, member) VALUES(?, ?)",
        (set_name, member),
    )?;
    Ok(())
}

pub fn index_members(conn: &Connection, set_name: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT member FROM index_sets WHERE set_name = ? ORDER BY member")?;
    let members = stmt
        .query_map([set_name], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace() -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!(
            "abacus-db-test-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn set_get_roundtrip_and_overwrite() {
        let ws = temp_workspace();
        let conn = open_db(&ws).expect("open");
        let key = profile_key("  Ada ");
        assert_eq!(key, "profile:ada");

        assert!(profile_get(&conn, &key).expect("get").is_none());
        profile_set(&conn, &key, &json!({ "v": 1 })).expect("set");
        profile_set(&conn, &key, &json!({ "v": 2 })).expect("overwrite");
        assert_eq!(profile_get(&conn, &key).expect("get"), Some(json!({"v":2})));

        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn open_is_idempotent_and_index_dedupes() {
        let ws = temp_workspace();
        {
            let conn = open_db(&ws).expect("open once");
            add_to_index(&conn, STUDENT_INDEX, "ada").expect("add");
            add_to_index(&conn, STUDENT_INDEX, "ada").expect("add again");
            add_to_index(&conn, STUDENT_INDEX, "alan").expect("add");
        }
        let conn = open_db(&ws).expect("open twice");
        let members = index_members(&conn, STUDENT_INDEX).expect("members");
        assert_eq!(members, vec!["ada", "alan"]);

        let _ = std::fs::remove_dir_all(ws);
    }
}
