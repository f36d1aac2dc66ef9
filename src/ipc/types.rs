use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One request line off the wire: `{id, method, params}`. Params default to
/// null so bare methods like `health` need no params object.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Everything the sidecar holds between requests. Both fields stay None
/// until the shell selects a workspace.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
