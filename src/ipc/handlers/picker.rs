use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::snapshot;
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

const DEFAULT_REVEAL_STEPS: usize = 12;
const MAX_REVEAL_STEPS: usize = 100;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn handle_pick(state: &mut AppState, req: &Request) -> serde_json::Value {
    let count = req.params.get("count").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
    let reveal_steps = req
        .params
        .get("revealSteps")
        .and_then(|v| v.as_u64())
        .map(|v| (v as usize).min(MAX_REVEAL_STEPS))
        .unwrap_or(DEFAULT_REVEAL_STEPS);

    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let roster = match crate::db::roster_names(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let settings = match snapshot::board_settings(conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Mirror the shell: never ask for more students than the roster holds.
    let requested = count.min(roster.len());

    let mut rng = rand::thread_rng();
    let picks = match calc::allocate(roster.len(), &settings.pick_ratios, requested, &mut rng) {
        Ok(p) => p,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };
    let allocations = match calc::band_allocations(roster.len(), &settings.pick_ratios, requested)
    {
        Ok(a) => a,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };
    let reveal = calc::reveal_sequence(roster.len(), reveal_steps, &mut rng);

    let picked_at = Utc::now().to_rfc3339();
    let mut picked = Vec::with_capacity(picks.len());
    for &index in &picks {
        let name = &roster[index];
        let res = conn.execute(
            "INSERT INTO pick_log(id, student_name, picked_at) VALUES(?, ?, ?)",
            (Uuid::new_v4().to_string(), name, &picked_at),
        );
        if let Err(e) = res {
            return err(&req.id, "db_write_failed", e.to_string(), None);
        }
        picked.push(json!({ "index": index, "name": name }));
    }

    ok(
        &req.id,
        json!({
            "picks": picked,
            "allocations": allocations.to_vec(),
            "revealSequence": reveal,
            "pickedAt": picked_at,
        }),
    )
}

fn handle_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut stmt = match conn
        .prepare("SELECT student_name, picked_at FROM pick_log ORDER BY picked_at DESC, rowid DESC")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "name": r.get::<_, String>(0)?,
                "time": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(called) => {
            let count = called.len();
            ok(&req.id, json!({ "called": called, "count": count }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_clear_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match conn.execute("DELETE FROM pick_log", []) {
        Ok(_) => ok(&req.id, json!({ "cleared": true })),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "picker.pick" => Some(handle_pick(state, req)),
        "picker.history" => Some(handle_history(state, req)),
        "picker.clearHistory" => Some(handle_clear_history(state, req)),
        _ => None,
    }
}
