//! Runtime configuration for the engine, controller, calibration and regression.
//!
//! These are the structs the core works with. They are separate from the
//! TOML-deserialized config in `pacer_config`; see `conversions`.

/// Engine-level settings.
#[derive(Debug, Clone)]
pub struct EngineCfg {
    /// Threshold heart rate (bpm) that % bands are relative to.
    pub heart_rate_threshold_bpm: f64,
    /// Threshold power (W) that % bands are relative to.
    pub power_threshold_watts: f64,
    /// Default HR hold before an `HrRange` early end fires.
    pub hr_hold_ms: u64,
    /// Planned pace is rounded to a multiple of this (km/h).
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

/// Where learned coefficients live between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdjustScope {
    /// One coefficient pair shared by every step of the current phase.
    #[default]
    AllSteps,
    /// One pair per logical step (identity key), shared across repeat iterations.
    OneStep,
}

/// What the controller does while the metric sits inside its band.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum InBandPolicy {
    /// Keep the coefficient exactly where it is.
    #[default]
    Hold,
    /// Move toward 1.0 by at most `rate` per settle interval.
    DriftToNeutral { rate: f64 },
}

/// Adjustment controller tuning.
#[derive(Debug, Clone)]
pub struct AdjustCfg {
    pub scope: AdjustScope,
    pub min_coefficient: f64,
    pub max_coefficient: f64,
    /// Coefficient delta per unit of relative out-of-band error.
    pub gain: f64,
    /// Largest coefficient change a single adjustment may make.
    pub max_step: f64,
    /// Minimum time between two adjustments (ms of run time).
    pub settle_ms: u64,
    /// Number of recent metric samples used for the trend.
    pub trend_window: usize,
    /// Multiplier applied to the correction while the metric converges.
    pub converging_scale: f64,
    pub in_band: InBandPolicy,
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
            in_band: InBandPolicy::Hold,
        }
    }
}

/// Which calibration model converts speeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalibrationMode {
    #[default]
    Linear,
    Polynomial,
}

/// Calibration domain and root-finding bounds.
#[derive(Debug, Clone)]
pub struct CalibrationCfg {
    pub mode: CalibrationMode,
    /// Raw speed range (km/h) the models are trusted on.
    pub domain_min_kmh: f64,
    pub domain_max_kmh: f64,
    pub newton_max_iterations: u32,
    pub newton_tolerance: f64,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            mode: CalibrationMode::Linear,
            domain_min_kmh: 0.0,
            domain_max_kmh: 25.0,
            newton_max_iterations: 50,
            newton_tolerance: 1e-6,
        }
    }
}

/// Regression settings.
#[derive(Debug, Clone)]
pub struct RegressionCfg {
    pub min_samples: usize,
    pub max_degree: u8,
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
