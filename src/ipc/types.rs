use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One line of the stdin protocol: `{"id": "...", "method": "programs.list",
/// "params": {...}}`. Methods are namespaced per portal screen.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// No per-request session: the shell keeps the logged-in user, the daemon
/// keeps only the open portal database.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
