use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::snapshot;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const MAX_PROBLEM_COUNT: i64 = 200;
// Questions this close to a missed one are considered related
// (a +-2 window around the incremented question).
const RELATED_WINDOW: i64 = 2;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn handle_set_count(state: &mut AppState, req: &Request) -> serde_json::Value {
    let count = match required_i64(req, "count") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if count < 1 || count > MAX_PROBLEM_COUNT {
        return err(
            &req.id,
            "invalid_input",
            format!("question count must be in 1..={}", MAX_PROBLEM_COUNT),
            Some(json!({ "count": count })),
        );
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match db::set_problem_count(conn, count) {
        Ok(()) => ok(&req.id, json!({ "problemCount": count })),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

fn handle_increment(state: &mut AppState, req: &Request) -> serde_json::Value {
    let number = match required_i64(req, "number") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let problem_count = match db::get_problem_count(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if number < 1 || number > problem_count {
        return err(
            &req.id,
            "invalid_input",
            format!("question number must be in 1..={}", problem_count),
            Some(json!({ "number": number })),
        );
    }

    let res = conn.execute(
        "INSERT INTO problems(question, wrong_count) VALUES(?, 1)
         ON CONFLICT(question) DO UPDATE SET wrong_count = wrong_count + 1",
        [number],
    );
    if let Err(e) = res {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    let wrong_count: i64 = match conn.query_row(
        "SELECT wrong_count FROM problems WHERE question = ?",
        [number],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Neighboring questions that also have misses become the related set.
    // Only written when non-empty; an existing entry is left alone otherwise.
    let mut related: Vec<i64> = Vec::new();
    for i in (number - RELATED_WINDOW).max(1)..=(number + RELATED_WINDOW) {
        if i == number {
            continue;
        }
        let count: Option<i64> = match conn
            .query_row(
                "SELECT wrong_count FROM problems WHERE question = ?",
                [i],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if count.unwrap_or(0) > 0 {
            related.push(i);
        }
    }
    if !related.is_empty() {
        let raw = match serde_json::to_string(&related) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "internal", e.to_string(), None),
        };
        let res = conn.execute(
            "INSERT INTO related_problems(question, related) VALUES(?, ?)
             ON CONFLICT(question) DO UPDATE SET related = excluded.related",
            (number, raw),
        );
        if let Err(e) = res {
            return err(&req.id, "db_write_failed", e.to_string(), None);
        }
    }

    ok(
        &req.id,
        json!({ "number": number, "wrongCount": wrong_count, "related": related }),
    )
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let problem_count = match db::get_problem_count(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let settings = match snapshot::board_settings(conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let hot_threshold = settings.hot_threshold as i64;

    // Rows outside the configured question range are kept in the store (the
    // count may be raised again) but never reported.
    let mut stmt = match conn.prepare(
        "SELECT question, wrong_count FROM problems
         WHERE question <= ? AND wrong_count > 0
         ORDER BY wrong_count DESC, question ASC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([problem_count], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let entries = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let total_wrong: i64 = entries.iter().map(|(_, c)| c).sum();
    let hot_count = entries.iter().filter(|(_, c)| *c >= hot_threshold).count();
    let problems: Vec<serde_json::Value> = entries
        .iter()
        .map(|(number, count)| {
            json!({
                "number": number,
                "wrongCount": count,
                "hot": *count >= hot_threshold,
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "problemCount": problem_count,
            "problems": problems,
            "totalWrong": total_wrong,
            "hotCount": hot_count,
        }),
    )
}

fn handle_related_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let number = match required_i64(req, "number") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(raw) = req.params.get("related").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing params.related", None);
    };
    let mut related = Vec::new();
    for v in raw {
        let Some(n) = v.as_i64() else {
            return err(
                &req.id,
                "bad_params",
                "related must contain only integers",
                None,
            );
        };
        related.push(n);
    }

    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let raw = match serde_json::to_string(&related) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };
    let res = conn.execute(
        "INSERT INTO related_problems(question, related) VALUES(?, ?)
         ON CONFLICT(question) DO UPDATE SET related = excluded.related",
        (number, raw),
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "number": number, "related": related })),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

fn handle_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    for sql in ["DELETE FROM problems", "DELETE FROM related_problems"] {
        if let Err(e) = conn.execute(sql, []) {
            return err(&req.id, "db_write_failed", e.to_string(), None);
        }
    }
    ok(&req.id, json!({ "reset": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "problems.setCount" => Some(handle_set_count(state, req)),
        "problems.increment" => Some(handle_increment(state, req)),
        "problems.list" => Some(handle_list(state, req)),
        "problems.related.set" => Some(handle_related_set(state, req)),
        "problems.reset" => Some(handle_reset(state, req)),
        _ => None,
    }
}
