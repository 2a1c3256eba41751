use crate::calc::{self, SortMode, WrongRecord};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn parse_sort_mode(req: &Request) -> Result<SortMode, serde_json::Value> {
    match req.params.get("sortMode").and_then(|v| v.as_str()) {
        None => Ok(SortMode::Sequence),
        Some(raw) => SortMode::parse(raw).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "sortMode must be one of: sequence, errorRate",
                Some(json!({ "sortMode": raw })),
            )
        }),
    }
}

fn load_records(conn: &Connection) -> anyhow::Result<Vec<WrongRecord>> {
    let mut stmt =
        conn.prepare("SELECT student_name, wrong FROM wrong_records ORDER BY sort_order")?;
    let rows = stmt
        .query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = Vec::with_capacity(rows.len());
    for (name, raw) in rows {
        let wrong: Vec<u32> = serde_json::from_str(&raw)?;
        records.push(WrongRecord { name, wrong });
    }
    Ok(records)
}

fn handle_record_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be blank", None);
    }
    let Some(raw) = req.params.get("wrong").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing params.wrong", None);
    };

    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let problem_count = match db::get_problem_count(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut wrong: Vec<u32> = Vec::with_capacity(raw.len());
    for v in raw {
        let Some(n) = v.as_i64() else {
            return err(
                &req.id,
                "bad_params",
                "wrong must contain only integers",
                None,
            );
        };
        if n < 1 || n > problem_count {
            return err(
                &req.id,
                "invalid_input",
                format!("question numbers must be in 1..={}", problem_count),
                Some(json!({ "number": n })),
            );
        }
        wrong.push(n as u32);
    }
    wrong.sort_unstable();
    wrong.dedup();

    let raw_wrong = match serde_json::to_string(&wrong) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };

    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM wrong_records WHERE student_name = ?",
            [&name],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let res = match existing {
        Some(id) => conn.execute(
            "UPDATE wrong_records SET wrong = ? WHERE id = ?",
            (&raw_wrong, &id),
        ),
        None => {
            let next_order: i64 = match conn.query_row(
                "SELECT COUNT(*) FROM wrong_records",
                [],
                |r| r.get(0),
            ) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            conn.execute(
                "INSERT INTO wrong_records(id, student_name, wrong, sort_order) VALUES(?, ?, ?, ?)",
                (Uuid::new_v4().to_string(), &name, &raw_wrong, next_order),
            )
        }
    };
    match res {
        Ok(_) => ok(&req.id, json!({ "name": name, "wrong": wrong })),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

fn handle_record_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match load_records(conn) {
        Ok(records) => {
            let count = records.len();
            ok(
                &req.id,
                json!({ "records": records, "count": count }),
            )
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_record_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match conn.execute("DELETE FROM wrong_records", []) {
        Ok(_) => ok(&req.id, json!({ "cleared": true })),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

fn handle_statistics(state: &mut AppState, req: &Request) -> serde_json::Value {
    let sort_mode = match parse_sort_mode(req) {
        Ok(m) => m,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let records = match load_records(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let problem_count = match db::get_problem_count(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match calc::compute_statistics(&records, problem_count, sort_mode) {
        Ok(stats) => match serde_json::to_value(&stats) {
            Ok(v) => ok(&req.id, v),
            Err(e) => err(&req.id, "internal", e.to_string(), None),
        },
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match required_str(req, "path") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let records = match load_records(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let problem_count = match db::get_problem_count(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let stats = match calc::compute_statistics(&records, problem_count, SortMode::Sequence) {
        Ok(s) => s,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };
    let csv = calc::question_report_csv(&stats.question_stats);
    match std::fs::write(&path, csv.as_bytes()) {
        Ok(()) => ok(
            &req.id,
            json!({ "path": path, "rows": stats.question_stats.len() }),
        ),
        Err(e) => err(&req.id, "io_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.set" => Some(handle_record_set(state, req)),
        "records.list" => Some(handle_record_list(state, req)),
        "records.clear" => Some(handle_record_clear(state, req)),
        "report.statistics" => Some(handle_statistics(state, req)),
        "report.exportCsv" => Some(handle_export_csv(state, req)),
        _ => None,
    }
}
