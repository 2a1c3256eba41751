use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::snapshot;
use serde_json::json;
use std::path::PathBuf;

fn required_path(req: &Request, key: &str) -> Result<PathBuf, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match required_path(req, "path") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let snap = match snapshot::load_snapshot(conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let text = match serde_json::to_string_pretty(&snap) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };
    match std::fs::write(&path, text) {
        Ok(()) => ok(
            &req.id,
            json!({
                "path": path.to_string_lossy(),
                "students": snap.students.len(),
                "problemCount": snap.problem_count,
            }),
        ),
        Err(e) => err(&req.id, "io_failed", e.to_string(), None),
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match required_path(req, "path") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let text = match std::fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "io_failed", e.to_string(), None),
    };
    let snap: snapshot::Snapshot = match serde_json::from_str(&text) {
        Ok(s) => s,
        Err(e) => {
            return err(
                &req.id,
                "bad_snapshot",
                format!("snapshot is not valid JSON: {}", e),
                None,
            )
        }
    };

    match snapshot::apply_snapshot(conn, &snap) {
        Ok(()) => ok(
            &req.id,
            json!({
                "students": snap.students.len(),
                "calledStudents": snap.called_students.len(),
                "problemCount": snap.problem_count,
            }),
        ),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match required_path(req, "outPath") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "outPath": out_path.to_string_lossy(),
                "bundleFormat": summary.bundle_format,
                "dbSha256": summary.db_sha256,
            }),
        ),
        Err(e) => err(&req.id, "backup_failed", format!("{e:#}"), None),
    }
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match required_path(req, "inPath") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Release the open handle before swapping the database file underneath it.
    state.db = None;

    if let Err(e) = backup::import_workspace_bundle(&in_path, &workspace) {
        // Reopen whatever is on disk so the daemon stays usable.
        state.db = db::open_db(&workspace).ok();
        return err(&req.id, "restore_failed", format!("{e:#}"), None);
    }

    match db::open_db(&workspace) {
        Ok(conn) => {
            state.db = Some(conn);
            ok(
                &req.id,
                json!({ "workspacePath": workspace.to_string_lossy() }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "snapshot.export" => Some(handle_export(state, req)),
        "snapshot.import" => Some(handle_import(state, req)),
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
