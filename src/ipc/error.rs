use serde_json::json;

/// Success envelope: `{ id, ok: true, result }`.
pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

/// Error envelope: `{ id, ok: false, error: { code, message } }`. Codes are
/// stable strings the client switches on; messages are for humans.
pub fn err(id: &str, code: &str, message: impl Into<String>) -> serde_json::Value {
    json!({
        "id": id,
        "ok": false,
        "error": {
            "code": code,
            "message": message.into(),
        },
    })
}
