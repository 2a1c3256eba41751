use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare("SELECT id, name, sort_order FROM students ORDER BY sort_order")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "sortOrder": r.get::<_, i64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(students) => {
            let count = students.len();
            ok(&req.id, json!({ "students": students, "count": count }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(raw) = req.params.get("names").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing params.names", None);
    };
    let mut names = Vec::new();
    for v in raw {
        let Some(name) = v.as_str() else {
            return err(&req.id, "bad_params", "names must contain only strings", None);
        };
        names.push(name.trim().to_string());
    }

    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let existing = match crate::db::roster_names(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut seen: HashSet<String> = existing.iter().cloned().collect();
    let mut next_order = existing.len() as i64;

    let mut added = 0usize;
    let mut skipped = 0usize;
    for name in names {
        if name.is_empty() {
            continue;
        }
        if !seen.insert(name.clone()) {
            skipped += 1;
            continue;
        }
        let res = conn.execute(
            "INSERT INTO students(id, name, sort_order) VALUES(?, ?, ?)",
            (Uuid::new_v4().to_string(), &name, next_order),
        );
        if let Err(e) = res {
            return err(&req.id, "db_write_failed", e.to_string(), None);
        }
        next_order += 1;
        added += 1;
    }

    ok(&req.id, json!({ "added": added, "skipped": skipped }))
}

fn handle_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    // Clearing the roster also drops the pick history: call records
    // without a roster are meaningless.
    for sql in ["DELETE FROM students", "DELETE FROM pick_log"] {
        if let Err(e) = conn.execute(sql, []) {
            return err(&req.id, "db_write_failed", e.to_string(), None);
        }
    }
    ok(&req.id, json!({ "cleared": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_list(state, req)),
        "students.add" => Some(handle_add(state, req)),
        "students.clear" => Some(handle_clear(state, req)),
        _ => None,
    }
}
