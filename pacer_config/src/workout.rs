//! Row-oriented workout file format.
//!
//! A workout is an ordered `[[steps]]` array. A `repeat` row is followed by
//! the rows it repeats, each marked `child = true`:
//!
//! ```toml
//! name = "4x4"
//!
//! [[steps]]
//! kind = "warmup"
//! duration_s = 600
//! pace_kmh = 8.0
//!
//! [[steps]]
//! kind = "repeat"
//! count = 4
//!
//! [[steps]]
//! kind = "run"
//! child = true
//! duration_s = 240
//! pace_kmh = 12.0
//! hr_min_pct = 88
//! hr_max_pct = 94
//! auto_adjust = "hr_speed"
//! ```
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepKindRow {
    Warmup,
    Run,
    Recover,
    Rest,
    Cooldown,
    Repeat,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AutoAdjustRow {
    HrSpeed,
    HrIncline,
    PowerSpeed,
    PowerIncline,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EarlyEndRow {
    Open,
    HrRange,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StepRow {
    pub kind: StepKindRow,
    /// Belongs to the nearest preceding `repeat` row.
    #[serde(default)]
    pub child: bool,
    /// Repeat count (repeat rows only).
    pub count: Option<i64>,
    pub duration_s: Option<f64>,
    pub distance_m: Option<f64>,
    pub pace_kmh: Option<f64>,
    /// End pace for a progression step.
    pub end_pace_kmh: Option<f64>,
    pub incline_pct: Option<f64>,
    pub hr_min_pct: Option<f64>,
    pub hr_max_pct: Option<f64>,
    pub power_min_pct: Option<f64>,
    pub power_max_pct: Option<f64>,
    pub auto_adjust: Option<AutoAdjustRow>,
    pub early_end: Option<EarlyEndRow>,
    pub early_end_hr_min_bpm: Option<f64>,
    pub early_end_hr_max_bpm: Option<f64>,
    /// Overrides the engine's default HR hold time.
    pub early_end_hold_s: Option<f64>,
}

impl StepRow {
    fn has_leaf_fields(&self) -> bool {
        self.duration_s.is_some()
            || self.distance_m.is_some()
            || self.pace_kmh.is_some()
            || self.end_pace_kmh.is_some()
            || self.incline_pct.is_some()
            || self.hr_min_pct.is_some()
            || self.hr_max_pct.is_some()
            || self.power_min_pct.is_some()
            || self.power_max_pct.is_some()
            || self.auto_adjust.is_some()
            || self.early_end.is_some()
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkoutFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub steps: Vec<StepRow>,
}

pub fn load_workout_toml(s: &str) -> Result<WorkoutFile, toml::de::Error> {
    toml::from_str::<WorkoutFile>(s)
}

fn check_band(row: usize, what: &str, lo: Option<f64>, hi: Option<f64>) -> eyre::Result<()> {
    match (lo, hi) {
        (None, None) => Ok(()),
        (Some(lo), Some(hi)) => {
            if !(lo.is_finite() && hi.is_finite() && lo > 0.0) {
                eyre::bail!("steps[{row}]: {what} bounds must be finite and > 0");
            }
            if lo > hi {
                eyre::bail!("steps[{row}]: {what} min must be <= max");
            }
            Ok(())
        }
        _ => eyre::bail!("steps[{row}]: {what} needs both min and max"),
    }
}

impl WorkoutFile {
    /// Shape checks on individual rows.
    ///
    /// Orphan children and steps without any duration pass here; the former
    /// are skipped when flattening and the latter are rejected when a run starts.
    pub fn validate(&self) -> eyre::Result<()> {
        for (i, row) in self.steps.iter().enumerate() {
            if row.kind == StepKindRow::Repeat {
                if row.child {
                    eyre::bail!("steps[{i}]: nested repeat blocks are not supported");
                }
                if row.has_leaf_fields() {
                    eyre::bail!("steps[{i}]: repeat rows only carry `count`");
                }
                continue;
            }
            if row.count.is_some() {
                eyre::bail!("steps[{i}]: `count` is only valid on repeat rows");
            }
            if row.duration_s.is_some() && row.distance_m.is_some() {
                eyre::bail!("steps[{i}]: set either duration_s or distance_m, not both");
            }
            for (name, v) in [("duration_s", row.duration_s), ("distance_m", row.distance_m)] {
                if let Some(v) = v
                    && !(v.is_finite() && v > 0.0)
                {
                    eyre::bail!("steps[{i}]: {name} must be > 0");
                }
            }
            check_band(i, "hr_*_pct", row.hr_min_pct, row.hr_max_pct)?;
            check_band(i, "power_*_pct", row.power_min_pct, row.power_max_pct)?;
            if row.early_end == Some(EarlyEndRow::HrRange) {
                if row.early_end_hr_min_bpm.is_none() || row.early_end_hr_max_bpm.is_none() {
                    eyre::bail!("steps[{i}]: early_end = \"hr_range\" needs early_end_hr_min_bpm and early_end_hr_max_bpm");
                }
                check_band(
                    i,
                    "early_end_hr_*_bpm",
                    row.early_end_hr_min_bpm,
                    row.early_end_hr_max_bpm,
                )?;
            }
            if let Some(h) = row.early_end_hold_s
                && !(h.is_finite() && h > 0.0)
            {
                eyre::bail!("steps[{i}]: early_end_hold_s must be > 0");
            }
        }
        Ok(())
    }
}
