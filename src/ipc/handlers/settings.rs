use crate::calc::BAND_COUNT;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::snapshot::{self, AnimationSpeed, BoardSettings};
use rusqlite::Connection;
use serde_json::json;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

struct FieldErr {
    message: String,
    details: Option<serde_json::Value>,
}

fn apply_field(
    settings: &mut BoardSettings,
    key: &str,
    value: &serde_json::Value,
) -> Result<(), FieldErr> {
    match key {
        "pickRatios" => {
            let Some(arr) = value.as_array() else {
                return Err(FieldErr {
                    message: "pickRatios must be an array".to_string(),
                    details: None,
                });
            };
            if arr.len() != BAND_COUNT {
                return Err(FieldErr {
                    message: format!("pickRatios must hold exactly {} values", BAND_COUNT),
                    details: Some(json!({ "len": arr.len() })),
                });
            }
            let mut ratios = [0u32; BAND_COUNT];
            for (i, v) in arr.iter().enumerate() {
                let Some(n) = v.as_u64().and_then(|n| u32::try_from(n).ok()) else {
                    return Err(FieldErr {
                        message: "pickRatios must contain non-negative integers".to_string(),
                        details: Some(json!({ "index": i })),
                    });
                };
                ratios[i] = n;
            }
            settings.pick_ratios = ratios;
        }
        "animationSpeed" => {
            let speed = value.as_str().and_then(|s| match s {
                "fast" => Some(AnimationSpeed::Fast),
                "medium" => Some(AnimationSpeed::Medium),
                "slow" => Some(AnimationSpeed::Slow),
                _ => None,
            });
            let Some(speed) = speed else {
                return Err(FieldErr {
                    message: "animationSpeed must be one of: fast, medium, slow".to_string(),
                    details: Some(json!({ "animationSpeed": value })),
                });
            };
            settings.animation_speed = speed;
        }
        "hotThreshold" => {
            let Some(n) = value
                .as_u64()
                .filter(|&n| n >= 1)
                .and_then(|n| u32::try_from(n).ok())
            else {
                return Err(FieldErr {
                    message: "hotThreshold must be an integer >= 1".to_string(),
                    details: Some(json!({ "hotThreshold": value })),
                });
            };
            settings.hot_threshold = n;
        }
        "soundEnabled" => {
            let Some(b) = value.as_bool() else {
                return Err(FieldErr {
                    message: "soundEnabled must be a boolean".to_string(),
                    details: None,
                });
            };
            settings.sound_enabled = b;
        }
        "zoomLevel" => {
            let Some(z) = value.as_f64().filter(|z| (0.5..=2.0).contains(z)) else {
                return Err(FieldErr {
                    message: "zoomLevel must be a number in 0.5..=2.0".to_string(),
                    details: Some(json!({ "zoomLevel": value })),
                });
            };
            settings.zoom_level = z;
        }
        other => {
            return Err(FieldErr {
                message: format!("unknown settings key: {}", other),
                details: None,
            });
        }
    }
    Ok(())
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match snapshot::board_settings(conn) {
        Ok(settings) => match serde_json::to_value(&settings) {
            Ok(v) => ok(&req.id, json!({ "settings": v })),
            Err(e) => err(&req.id, "internal", e.to_string(), None),
        },
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(patch) = req.params.get("settings").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing params.settings", None);
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mut settings = match snapshot::board_settings(conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    for (key, value) in patch {
        if let Err(fe) = apply_field(&mut settings, key, value) {
            return err(&req.id, "bad_params", fe.message, fe.details);
        }
    }

    if let Err(e) = snapshot::save_board_settings(conn, &settings) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    match serde_json::to_value(&settings) {
        Ok(v) => ok(&req.id, json!({ "settings": v })),
        Err(e) => err(&req.id, "internal", e.to_string(), None),
    }
}

fn handle_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let defaults = BoardSettings::default();
    if let Err(e) = snapshot::save_board_settings(conn, &defaults) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    match serde_json::to_value(&defaults) {
        Ok(v) => ok(&req.id, json!({ "settings": v })),
        Err(e) => err(&req.id, "internal", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_get(state, req)),
        "settings.update" => Some(handle_update(state, req)),
        "settings.reset" => Some(handle_reset(state, req)),
        _ => None,
    }
}
