use rusqlite::Connection;
use serde::Deserialize;
use std::path::PathBuf;

/// One request line from the shell. `params` defaults to JSON null so
/// parameterless methods like `health` can omit it.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The daemon's whole mutable state: the selected board workspace and its
/// open database. Both stay `None` until `workspace.select` succeeds, and
/// `db` is dropped while a backup bundle swaps the file underneath it.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
