#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas, workout files and calibration samples for the pacer stack.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - `WorkoutFile` is the flat, row-oriented workout definition format.
//! - The sample CSV loader enforces headers before any regression runs.
use serde::{Deserialize, Serialize};

pub mod samples;
pub mod workout;

pub use samples::{SampleRow, load_samples_csv, write_samples_csv};
pub use workout::{
    AutoAdjustRow, EarlyEndRow, StepKindRow, StepRow, WorkoutFile, load_workout_toml,
};

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EngineCfg {
    /// Threshold heart rate used to turn % bands into bpm.
    pub heart_rate_threshold_bpm: f64,
    /// Threshold power used to turn % bands into watts.
    pub power_threshold_watts: f64,
    /// How long HR must stay inside an early-end band before the step ends.
    pub hr_hold_ms: u64,
    /// Planned pace is rounded to a multiple of this.
    pub pace_resolution_kmh: f64,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            heart_rate_threshold_bpm: 170.0,
            power_threshold_watts: 250.0,
            hr_hold_ms: 30_000,
            pace_resolution_kmh: 0.1,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdjustScope {
    #[default]
    AllSteps,
    OneStep,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InBand {
    #[default]
    Hold,
    Drift,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AdjustCfg {
    pub scope: AdjustScope,
    pub min_coefficient: f64,
    pub max_coefficient: f64,
    /// Coefficient delta per unit of relative out-of-band error
    pub gain: f64,
    /// Per-adjustment magnitude cap
    pub max_step: f64,
    pub settle_ms: u64,
    pub trend_window: usize,
    /// Correction multiplier applied while the metric already converges
    pub converging_scale: f64,
    pub in_band: InBand,
    /// Drift toward 1.0 per settle interval when `in_band = "drift"`
    pub drift_rate: f64,
}

impl Default for AdjustCfg {
    fn default() -> Self {
        Self {
            scope: AdjustScope::AllSteps,
            min_coefficient: 0.5,
            max_coefficient: 1.5,
            gain: 1.0,
            max_step: 0.05,
            settle_ms: 10_000,
            trend_window: 5,
            converging_scale: 0.25,
            in_band: InBand::Hold,
            drift_rate: 0.01,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMode {
    #[default]
    Linear,
    Polynomial,
}

/// Persisted auto-fitted polynomial. `coefficients[k]` multiplies `raw^k`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PersistedPolynomial {
    pub coefficients: Vec<f64>,
    pub degree: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CalibrationCfg {
    pub mode: CalibrationMode,
    pub linear_a: f64,
    pub linear_b: f64,
    pub domain_min_kmh: f64,
    pub domain_max_kmh: f64,
    pub newton_max_iterations: u32,
    pub newton_tolerance: f64,
    /// Optional persisted polynomial; identity when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polynomial: Option<PersistedPolynomial>,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            mode: CalibrationMode::Linear,
            linear_a: 1.0,
            linear_b: 0.0,
            domain_min_kmh: 0.0,
            domain_max_kmh: 25.0,
            newton_max_iterations: 50,
            newton_tolerance: 1e-6,
            polynomial: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RegressionCfg {
    pub min_samples: usize,
    pub max_degree: u8,
    /// Number of most recent runs whose samples are retained
    pub max_runs: usize,
}

impl Default for RegressionCfg {
    fn default() -> Self {
        Self {
            min_samples: 20,
            max_degree: 3,
            max_runs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Direct,
    Sampler,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunnerCfg {
    /// Orchestration mode: "direct" (read inside the loop) or "sampler" (background thread)
    pub mode: RunMode,
    pub tick_hz: u32,
    /// Max time to wait for a sensor reading before treating it as missed
    #[serde(alias = "sample_ms")]
    pub sensor_timeout_ms: u64,
}

impl Default for RunnerCfg {
    fn default() -> Self {
        Self {
            mode: RunMode::Direct,
            tick_hz: 1,
            sensor_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub engine: EngineCfg,
    pub adjust: AdjustCfg,
    pub calibration: CalibrationCfg,
    pub regression: RegressionCfg,
    pub runner: RunnerCfg,
    pub logging: Logging,
}

/// On-disk shape written by `pacer fit --write`; loads back as a `[calibration]` section.
#[derive(Debug, Deserialize, Serialize)]
pub struct CalibrationFile {
    pub calibration: CalibrationCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

pub fn to_calibration_toml(cal: &CalibrationCfg) -> eyre::Result<String> {
    let file = CalibrationFile {
        calibration: cal.clone(),
    };
    toml::to_string(&file).map_err(|e| eyre::eyre!("serialize calibration: {e}"))
}

fn finite_positive(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        self.validate_engine()?;
        self.validate_adjust()?;
        self.validate_calibration()?;

        // Regression
        if !(1..=3).contains(&self.regression.max_degree) {
            eyre::bail!("regression.max_degree must be in [1, 3]");
        }
        if self.regression.min_samples < usize::from(self.regression.max_degree) + 1 {
            eyre::bail!("regression.min_samples must be > regression.max_degree");
        }
        if self.regression.max_runs == 0 {
            eyre::bail!("regression.max_runs must be >= 1");
        }

        // Runner
        if self.runner.tick_hz == 0 || self.runner.tick_hz > 100 {
            eyre::bail!("runner.tick_hz must be in [1, 100]");
        }
        if self.runner.sensor_timeout_ms == 0 {
            eyre::bail!("runner.sensor_timeout_ms must be >= 1");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }

    fn validate_engine(&self) -> eyre::Result<()> {
        let e = &self.engine;
        if !finite_positive(e.heart_rate_threshold_bpm) {
            eyre::bail!("engine.heart_rate_threshold_bpm must be > 0");
        }
        if !finite_positive(e.power_threshold_watts) {
            eyre::bail!("engine.power_threshold_watts must be > 0");
        }
        if e.hr_hold_ms == 0 {
            eyre::bail!("engine.hr_hold_ms must be >= 1");
        }
        if e.hr_hold_ms > 10 * 60 * 1000 {
            eyre::bail!("engine.hr_hold_ms is unreasonably large (>10min)");
        }
        if !(finite_positive(e.pace_resolution_kmh) && e.pace_resolution_kmh <= 1.0) {
            eyre::bail!("engine.pace_resolution_kmh must be in (0.0, 1.0]");
        }
        Ok(())
    }

    fn validate_adjust(&self) -> eyre::Result<()> {
        let a = &self.adjust;
        if !(finite_positive(a.min_coefficient) && a.min_coefficient <= 1.0) {
            eyre::bail!("adjust.min_coefficient must be in (0.0, 1.0]");
        }
        if !(a.max_coefficient.is_finite() && a.max_coefficient >= 1.0) {
            eyre::bail!("adjust.max_coefficient must be >= 1.0");
        }
        if !finite_positive(a.gain) {
            eyre::bail!("adjust.gain must be > 0");
        }
        if !(finite_positive(a.max_step) && a.max_step <= 1.0) {
            eyre::bail!("adjust.max_step must be in (0.0, 1.0]");
        }
        if a.settle_ms > 10 * 60 * 1000 {
            eyre::bail!("adjust.settle_ms is unreasonably large (>10min)");
        }
        if a.trend_window < 2 {
            eyre::bail!("adjust.trend_window must be >= 2");
        }
        if !(0.0..=1.0).contains(&a.converging_scale) {
            eyre::bail!("adjust.converging_scale must be in [0.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&a.drift_rate) {
            eyre::bail!("adjust.drift_rate must be in [0.0, 1.0]");
        }
        Ok(())
    }

    fn validate_calibration(&self) -> eyre::Result<()> {
        let c = &self.calibration;
        if !finite_positive(c.linear_a) {
            eyre::bail!("calibration.linear_a must be > 0");
        }
        if !c.linear_b.is_finite() {
            eyre::bail!("calibration.linear_b must be finite");
        }
        if !(c.domain_min_kmh.is_finite() && c.domain_min_kmh >= 0.0) {
            eyre::bail!("calibration.domain_min_kmh must be >= 0");
        }
        if !(c.domain_max_kmh.is_finite() && c.domain_max_kmh > c.domain_min_kmh) {
            eyre::bail!("calibration.domain_max_kmh must be > domain_min_kmh");
        }
        if c.newton_max_iterations == 0 {
            eyre::bail!("calibration.newton_max_iterations must be >= 1");
        }
        if !finite_positive(c.newton_tolerance) {
            eyre::bail!("calibration.newton_tolerance must be > 0");
        }
        if let Some(p) = &c.polynomial {
            if !(1..=3).contains(&p.degree) {
                eyre::bail!("calibration.polynomial.degree must be in [1, 3]");
            }
            if p.coefficients.is_empty() || p.coefficients.len() > 4 {
                eyre::bail!("calibration.polynomial.coefficients must hold 1 to 4 values");
            }
            if p.coefficients.len() < usize::from(p.degree) + 1 {
                eyre::bail!("calibration.polynomial.coefficients too short for degree");
            }
            if p.coefficients.iter().any(|v| !v.is_finite()) {
                eyre::bail!("calibration.polynomial.coefficients must be finite");
            }
        }
        Ok(())
    }
}
