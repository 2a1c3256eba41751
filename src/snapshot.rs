use crate::calc::BAND_COUNT;
use crate::db;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const SETTINGS_KEY: &str = "board.settings";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimationSpeed {
    Fast,
    Medium,
    Slow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSettings {
    pub pick_ratios: [u32; BAND_COUNT],
    pub animation_speed: AnimationSpeed,
    pub hot_threshold: u32,
    pub sound_enabled: bool,
    pub zoom_level: f64,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            pick_ratios: [10, 15, 25, 25, 25],
            animation_speed: AnimationSpeed::Medium,
            hot_threshold: 4,
            sound_enabled: true,
            zoom_level: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalledStudent {
    pub name: String,
    pub time: String,
}

/// The whole persisted classroom state as one unit. This is the JSON shape
/// the surrounding shell imports and exports; map keys are 1-based question
/// numbers (serialized as strings, as JSON object keys always are).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub students: Vec<String>,
    #[serde(default)]
    pub called_students: Vec<CalledStudent>,
    #[serde(default)]
    pub problems: BTreeMap<u32, i64>,
    #[serde(default)]
    pub related_problems: BTreeMap<u32, Vec<u32>>,
    #[serde(default = "default_problem_count")]
    pub problem_count: i64,
    #[serde(default)]
    pub settings: BoardSettings,
}

fn default_problem_count() -> i64 {
    db::DEFAULT_PROBLEM_COUNT
}

pub fn board_settings(conn: &Connection) -> anyhow::Result<BoardSettings> {
    match db::settings_get_json(conn, SETTINGS_KEY)? {
        Some(value) => Ok(serde_json::from_value(value).unwrap_or_default()),
        None => Ok(BoardSettings::default()),
    }
}

pub fn save_board_settings(conn: &Connection, settings: &BoardSettings) -> anyhow::Result<()> {
    db::settings_set_json(conn, SETTINGS_KEY, &serde_json::to_value(settings)?)
}

/// Read the whole store into a snapshot. Pick-log entries come back newest
/// first, matching the shell's display order.
pub fn load_snapshot(conn: &Connection) -> anyhow::Result<Snapshot> {
    let students = db::roster_names(conn)?;

    let mut stmt =
        conn.prepare("SELECT student_name, picked_at FROM pick_log ORDER BY picked_at DESC, rowid DESC")?;
    let called_students = stmt
        .query_map([], |r| {
            Ok(CalledStudent {
                name: r.get(0)?,
                time: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare("SELECT question, wrong_count FROM problems")?;
    let problems = stmt
        .query_map([], |r| Ok((r.get::<_, i64>(0)? as u32, r.get::<_, i64>(1)?)))?
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    let mut stmt = conn.prepare("SELECT question, related FROM related_problems")?;
    let mut related_problems = BTreeMap::new();
    let rows = stmt
        .query_map([], |r| {
            Ok((r.get::<_, i64>(0)? as u32, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (question, raw) in rows {
        let related: Vec<u32> = serde_json::from_str(&raw)?;
        related_problems.insert(question, related);
    }

    Ok(Snapshot {
        students,
        called_students,
        problems,
        related_problems,
        problem_count: db::get_problem_count(conn)?,
        settings: board_settings(conn)?,
    })
}

/// Replace the whole store with the snapshot's contents. Last write wins;
/// there is no merge.
pub fn apply_snapshot(conn: &Connection, snapshot: &Snapshot) -> anyhow::Result<()> {
    conn.execute("DELETE FROM students", [])?;
    conn.execute("DELETE FROM pick_log", [])?;
    conn.execute("DELETE FROM problems", [])?;
    conn.execute("DELETE FROM related_problems", [])?;

    for (i, name) in snapshot.students.iter().enumerate() {
        conn.execute(
            "INSERT INTO students(id, name, sort_order) VALUES(?, ?, ?)",
            (Uuid::new_v4().to_string(), name, i as i64),
        )?;
    }
    for entry in &snapshot.called_students {
        conn.execute(
            "INSERT INTO pick_log(id, student_name, picked_at) VALUES(?, ?, ?)",
            (Uuid::new_v4().to_string(), &entry.name, &entry.time),
        )?;
    }
    for (&question, &count) in &snapshot.problems {
        conn.execute(
            "INSERT INTO problems(question, wrong_count) VALUES(?, ?)",
            (question as i64, count),
        )?;
    }
    for (&question, related) in &snapshot.related_problems {
        conn.execute(
            "INSERT INTO related_problems(question, related) VALUES(?, ?)",
            (question as i64, serde_json::to_string(related)?),
        )?;
    }

    db::set_problem_count(conn, snapshot.problem_count)?;
    save_board_settings(conn, &snapshot.settings)?;
    Ok(())
}
