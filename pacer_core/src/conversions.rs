//! `From` implementations bridging `pacer_config` types to `pacer_core` types.

use pacer_config::{AutoAdjustRow, EarlyEndRow, StepKindRow, StepRow};

use crate::calibration::{Calibration, LinearModel, PolynomialModel};
use crate::config::{
    AdjustCfg, AdjustScope, CalibrationCfg, CalibrationMode, EngineCfg, InBandPolicy,
    RegressionCfg,
};
use crate::regression::RegressionSample;
use crate::runner::{RunParams, SamplingMode};
use crate::util::secs_to_ms;
use crate::workout::{
    AutoAdjust, EarlyEnd, LeafStep, Lever, Metric, PaceTarget, PercentBand, StepDuration,
    StepEntry, StepKind, WorkoutDefinition,
};

// ── EngineCfg ────────────────────────────────────────────────────────────────

impl From<&pacer_config::EngineCfg> for EngineCfg {
    fn from(c: &pacer_config::EngineCfg) -> Self {
        Self {
            heart_rate_threshold_bpm: c.heart_rate_threshold_bpm,
            power_threshold_watts: c.power_threshold_watts,
            hr_hold_ms: c.hr_hold_ms,
            pace_resolution_kmh: c.pace_resolution_kmh,
        }
    }
}

// ── AdjustCfg ────────────────────────────────────────────────────────────────

impl From<pacer_config::AdjustScope> for AdjustScope {
    fn from(s: pacer_config::AdjustScope) -> Self {
        match s {
            pacer_config::AdjustScope::AllSteps => Self::AllSteps,
            pacer_config::AdjustScope::OneStep => Self::OneStep,
        }
    }
}

impl From<&pacer_config::AdjustCfg> for AdjustCfg {
    fn from(c: &pacer_config::AdjustCfg) -> Self {
        let in_band = match c.in_band {
            pacer_config::InBand::Hold => InBandPolicy::Hold,
            pacer_config::InBand::Drift => InBandPolicy::DriftToNeutral { rate: c.drift_rate },
        };
        Self {
            scope: c.scope.into(),
            min_coefficient: c.min_coefficient,
            max_coefficient: c.max_coefficient,
            gain: c.gain,
            max_step: c.max_step,
            settle_ms: c.settle_ms,
            trend_window: c.trend_window,
            converging_scale: c.converging_scale,
            in_band,
        }
    }
}

// ── CalibrationCfg ───────────────────────────────────────────────────────────

impl From<pacer_config::CalibrationMode> for CalibrationMode {
    fn from(m: pacer_config::CalibrationMode) -> Self {
        match m {
            pacer_config::CalibrationMode::Linear => Self::Linear,
            pacer_config::CalibrationMode::Polynomial => Self::Polynomial,
        }
    }
}

impl From<&pacer_config::CalibrationCfg> for CalibrationCfg {
    fn from(c: &pacer_config::CalibrationCfg) -> Self {
        Self {
            mode: c.mode.into(),
            domain_min_kmh: c.domain_min_kmh,
            domain_max_kmh: c.domain_max_kmh,
            newton_max_iterations: c.newton_max_iterations,
            newton_tolerance: c.newton_tolerance,
        }
    }
}

// ── Calibration ──────────────────────────────────────────────────────────────

/// Invalid persisted models fall back to identity so a run can still start.
impl From<&pacer_config::CalibrationCfg> for Calibration {
    fn from(c: &pacer_config::CalibrationCfg) -> Self {
        let mut cal = Self::from_cfg(&CalibrationCfg::from(c));
        cal.linear = LinearModel::new(c.linear_a, c.linear_b).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "invalid linear calibration; using identity");
            LinearModel::IDENTITY
        });
        if let Some(p) = &c.polynomial {
            cal.polynomial =
                PolynomialModel::from_slice(&p.coefficients, p.degree).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "invalid persisted polynomial; using identity");
                    PolynomialModel::identity()
                });
        }
        cal
    }
}

/// The persisted form of a calibration, for `pacer fit --write`.
impl From<&Calibration> for pacer_config::CalibrationCfg {
    fn from(c: &Calibration) -> Self {
        let degree = c.polynomial.degree();
        Self {
            mode: match c.mode {
                CalibrationMode::Linear => pacer_config::CalibrationMode::Linear,
                CalibrationMode::Polynomial => pacer_config::CalibrationMode::Polynomial,
            },
            linear_a: c.linear.a,
            linear_b: c.linear.b,
            domain_min_kmh: c.domain.min_kmh,
            domain_max_kmh: c.domain.max_kmh,
            newton_max_iterations: c.newton_max_iterations,
            newton_tolerance: c.newton_tolerance,
            polynomial: Some(pacer_config::PersistedPolynomial {
                coefficients: c.polynomial.coefficients()[..=usize::from(degree)].to_vec(),
                degree,
            }),
        }
    }
}

// ── RegressionCfg ────────────────────────────────────────────────────────────

impl From<&pacer_config::RegressionCfg> for RegressionCfg {
    fn from(c: &pacer_config::RegressionCfg) -> Self {
        Self {
            min_samples: c.min_samples,
            max_degree: c.max_degree,
            max_runs: c.max_runs,
        }
    }
}

impl From<&pacer_config::SampleRow> for RegressionSample {
    fn from(r: &pacer_config::SampleRow) -> Self {
        Self {
            raw_speed: r.raw_speed,
            reference_speed: r.reference_speed,
            run_id: r.run_id,
        }
    }
}

impl From<&RegressionSample> for pacer_config::SampleRow {
    fn from(s: &RegressionSample) -> Self {
        Self {
            raw_speed: s.raw_speed,
            reference_speed: s.reference_speed,
            run_id: s.run_id,
        }
    }
}

// ── RunParams ────────────────────────────────────────────────────────────────

impl From<&pacer_config::RunnerCfg> for RunParams {
    fn from(c: &pacer_config::RunnerCfg) -> Self {
        let mode = match c.mode {
            pacer_config::RunMode::Direct => SamplingMode::Direct,
            pacer_config::RunMode::Sampler => SamplingMode::Paced(c.tick_hz),
        };
        Self {
            mode,
            tick_hz: c.tick_hz,
            sensor_timeout_ms: c.sensor_timeout_ms,
        }
    }
}

// ── WorkoutDefinition ────────────────────────────────────────────────────────

fn step_kind(k: StepKindRow) -> Option<StepKind> {
    Some(match k {
        StepKindRow::Warmup => StepKind::Warmup,
        StepKindRow::Run => StepKind::Run,
        StepKindRow::Recover => StepKind::Recover,
        StepKindRow::Rest => StepKind::Rest,
        StepKindRow::Cooldown => StepKind::Cooldown,
        StepKindRow::Repeat => return None,
    })
}

fn auto_adjust(a: AutoAdjustRow) -> AutoAdjust {
    let (metric, lever) = match a {
        AutoAdjustRow::HrSpeed => (Metric::HeartRate, Lever::Speed),
        AutoAdjustRow::HrIncline => (Metric::HeartRate, Lever::Incline),
        AutoAdjustRow::PowerSpeed => (Metric::Power, Lever::Speed),
        AutoAdjustRow::PowerIncline => (Metric::Power, Lever::Incline),
    };
    AutoAdjust { metric, lever }
}

fn band(lo: Option<f64>, hi: Option<f64>) -> Option<PercentBand> {
    Some(PercentBand::new(lo?, hi?))
}

/// Missing bpm bounds become 0, which `start()` rejects.
fn early_end(row: &StepRow) -> Option<EarlyEnd> {
    Some(match row.early_end? {
        EarlyEndRow::Open => EarlyEnd::Open,
        EarlyEndRow::HrRange => EarlyEnd::HeartRateRange {
            min_bpm: row.early_end_hr_min_bpm.unwrap_or(0.0),
            max_bpm: row.early_end_hr_max_bpm.unwrap_or(0.0),
            hold_ms: row.early_end_hold_s.map(secs_to_ms),
        },
    })
}

fn leaf(kind: StepKind, row: &StepRow) -> LeafStep {
    let duration = match (row.duration_s, row.distance_m) {
        (Some(s), _) => Some(StepDuration::Time { ms: secs_to_ms(s) }),
        (None, Some(m)) => Some(StepDuration::Distance { m }),
        (None, None) => None,
    };
    // An end pace alone is a static pace.
    let pace = match (row.pace_kmh, row.end_pace_kmh) {
        (Some(start_kmh), end_kmh) => Some(PaceTarget { start_kmh, end_kmh }),
        (None, Some(kmh)) => Some(PaceTarget {
            start_kmh: kmh,
            end_kmh: None,
        }),
        (None, None) => None,
    };
    LeafStep {
        kind,
        duration,
        pace,
        incline_pct: row.incline_pct,
        hr_band: band(row.hr_min_pct, row.hr_max_pct),
        power_band: band(row.power_min_pct, row.power_max_pct),
        auto_adjust: row.auto_adjust.map(auto_adjust),
        early_end: early_end(row),
    }
}

impl From<&pacer_config::WorkoutFile> for WorkoutDefinition {
    fn from(w: &pacer_config::WorkoutFile) -> Self {
        let steps = w
            .steps
            .iter()
            .map(|row| match step_kind(row.kind) {
                None => StepEntry::Repeat {
                    count: row.count.unwrap_or(1),
                },
                Some(kind) if row.child => StepEntry::RepeatChild(leaf(kind, row)),
                Some(kind) => StepEntry::Leaf(leaf(kind, row)),
            })
            .collect();
        Self {
            name: w.name.clone(),
            steps,
        }
    }
}
