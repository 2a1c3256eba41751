use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Number of performance bands the roster is partitioned into (A-E).
pub const BAND_COUNT: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new("invalid_input", message)
    }
}

/// Half-up percentage rounding shared by error rates and scores:
/// `floor(100 * numer / denom + 0.5)`, 0 when the denominator is not positive.
pub fn round_half_up_percent(numer: f64, denom: f64) -> i64 {
    if denom <= 0.0 {
        return 0;
    }
    ((100.0 * numer / denom) + 0.5).floor() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub start: usize,
    pub end: usize,
}

impl Band {
    pub fn size(&self) -> usize {
        self.end - self.start
    }
}

/// Split the roster into 5 contiguous bands of `ceil(n / 5)` students each,
/// the last band absorbing the remainder (possibly empty).
pub fn partition_bands(roster_size: usize) -> [Band; BAND_COUNT] {
    let group = (roster_size + BAND_COUNT - 1) / BAND_COUNT;
    let mut bands = [Band { start: 0, end: 0 }; BAND_COUNT];
    for (i, band) in bands.iter_mut().enumerate() {
        band.start = (i * group).min(roster_size);
        band.end = (band.start + group).min(roster_size);
    }
    bands
}

/// Distribute `requested` pick slots across the 5 bands proportional to
/// `weights`, never exceeding a band's population and always summing to
/// exactly `requested`.
pub fn band_allocations(
    roster_size: usize,
    weights: &[u32; BAND_COUNT],
    requested: usize,
) -> Result<[usize; BAND_COUNT], CalcError> {
    if roster_size == 0 {
        return Err(CalcError::invalid_input("roster is empty"));
    }
    if requested == 0 {
        return Err(CalcError::invalid_input(
            "requested count must be at least 1",
        ));
    }
    if requested > roster_size {
        return Err(CalcError::invalid_input(
            "requested count exceeds roster size",
        ));
    }
    let weight_sum: u32 = weights.iter().sum();
    if weight_sum == 0 {
        return Err(CalcError::invalid_input("pick ratios sum to zero"));
    }

    let bands = partition_bands(roster_size);

    let mut allocations = [0usize; BAND_COUNT];
    for i in 0..BAND_COUNT {
        let share = ((weights[i] as f64 / weight_sum as f64) * requested as f64).round() as usize;
        allocations[i] = share.min(bands[i].size());
    }

    let mut total: usize = allocations.iter().sum();
    // Shortfall: forward scans, bumping any band that still has headroom.
    // Terminates because the total population is >= requested.
    while total < requested {
        for i in 0..BAND_COUNT {
            if total >= requested {
                break;
            }
            if allocations[i] < bands[i].size() {
                allocations[i] += 1;
                total += 1;
            }
        }
    }
    // Overshoot: reverse scans, shaving any band with a positive allocation.
    while total > requested {
        for i in (0..BAND_COUNT).rev() {
            if total <= requested {
                break;
            }
            if allocations[i] > 0 {
                allocations[i] -= 1;
                total -= 1;
            }
        }
    }

    Ok(allocations)
}

/// Pick exactly `requested` distinct roster indices, weighted across bands.
/// Within each band the draw is uniform without replacement (Fisher-Yates);
/// the result is concatenated in band order.
pub fn allocate<R: Rng>(
    roster_size: usize,
    weights: &[u32; BAND_COUNT],
    requested: usize,
    rng: &mut R,
) -> Result<Vec<usize>, CalcError> {
    let allocations = band_allocations(roster_size, weights, requested)?;
    let bands = partition_bands(roster_size);

    let mut picked = Vec::with_capacity(requested);
    for (i, band) in bands.iter().enumerate() {
        if allocations[i] == 0 {
            continue;
        }
        let mut indices: Vec<usize> = (band.start..band.end).collect();
        indices.shuffle(rng);
        indices.truncate(allocations[i]);
        picked.extend(indices);
    }
    Ok(picked)
}

/// Timer-free stand-in for the rolling highlight animation: a finite list of
/// random roster indices the shell replays at its own pace. The final
/// highlight state is the pick result itself, not part of this sequence.
pub fn reveal_sequence<R: Rng>(roster_size: usize, steps: usize, rng: &mut R) -> Vec<usize> {
    if roster_size == 0 {
        return Vec::new();
    }
    (0..steps).map(|_| rng.gen_range(0..roster_size)).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WrongRecord {
    pub name: String,
    pub wrong: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Perfect,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Presentation band for an error rate in 0..=100. Total and
    /// non-overlapping over the integer domain.
    pub fn classify(rate: i64) -> Self {
        match rate {
            i64::MIN..=0 => Severity::Perfect,
            1..=20 => Severity::Low,
            21..=50 => Severity::Medium,
            51..=70 => Severity::High,
            _ => Severity::Critical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Perfect => "perfect",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    Sequence,
    ErrorRate,
}

impl SortMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sequence" => Some(Self::Sequence),
            "errorRate" => Some(Self::ErrorRate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionStat {
    pub q_num: u32,
    pub count: usize,
    pub rate: i64,
    pub severity: Severity,
    pub students: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StudentDetail {
    pub name: String,
    pub wrong: Vec<u32>,
    pub wrong_count: usize,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_students: usize,
    pub total_questions: u32,
    pub question_stats: Vec<QuestionStat>,
    pub student_details: Vec<StudentDetail>,
}

/// Derive the per-question and per-student report views from the wrong
/// records. Pure: identical inputs always yield identical output.
pub fn compute_statistics(
    records: &[WrongRecord],
    total_questions: i64,
    sort_mode: SortMode,
) -> Result<Statistics, CalcError> {
    if total_questions <= 0 {
        return Err(CalcError::invalid_input("question count must be positive"));
    }
    let total_questions = total_questions as u32;

    let mut question_stats: Vec<QuestionStat> = (1..=total_questions)
        .map(|q_num| {
            let students: Vec<String> = records
                .iter()
                .filter(|r| r.wrong.contains(&q_num))
                .map(|r| r.name.clone())
                .collect();
            let count = students.len();
            let rate = round_half_up_percent(count as f64, records.len() as f64);
            QuestionStat {
                q_num,
                count,
                rate,
                severity: Severity::classify(rate),
                students,
            }
        })
        .collect();

    match sort_mode {
        SortMode::Sequence => {}
        SortMode::ErrorRate => {
            // Most-missed first, ties broken by ascending question number.
            question_stats.sort_by(|a, b| match b.count.cmp(&a.count) {
                Ordering::Equal => a.q_num.cmp(&b.q_num),
                other => other,
            });
        }
    }

    let mut student_details: Vec<StudentDetail> = records
        .iter()
        .map(|r| {
            let mut wrong = r.wrong.clone();
            wrong.sort_unstable();
            wrong.dedup();
            let wrong_count = wrong.len();
            let score = round_half_up_percent(
                (total_questions as usize).saturating_sub(wrong_count) as f64,
                total_questions as f64,
            );
            StudentDetail {
                name: r.name.clone(),
                wrong,
                wrong_count,
                score,
            }
        })
        .collect();
    // Worst performers first; the stable sort keeps input order on ties.
    student_details.sort_by(|a, b| b.wrong_count.cmp(&a.wrong_count));

    Ok(Statistics {
        total_students: records.len(),
        total_questions,
        question_stats,
        student_details,
    })
}

/// CSV report over the per-question stats, one row per question ascending by
/// number. UTF-8 with BOM so spreadsheet apps pick up the Chinese header.
pub fn question_report_csv(stats: &[QuestionStat]) -> String {
    let mut rows: Vec<&QuestionStat> = stats.iter().collect();
    rows.sort_by_key(|s| s.q_num);

    let mut out = String::from("\u{FEFF}");
    out.push_str("题号,错误人数,错误率,错误学生\n");
    for stat in rows {
        out.push_str(&format!(
            "第{}题,{},{}%,\"{}\"\n",
            stat.q_num,
            stat.count,
            stat.rate,
            stat.students.join(", ")
        ));
    }
    out
}
