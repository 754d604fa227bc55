use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One request line off stdin. `params` defaults to null so methods that
/// take no arguments can omit it.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Mutable daemon state threaded through every handler. Both fields stay
/// `None` until a `workspace.select` succeeds; profile methods check for
/// the open database and fail with `no_workspace` before then.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            workspace: None,
            db: None,
        }
    }
}
