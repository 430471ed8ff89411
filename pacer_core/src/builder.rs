//! Type-state builder for `ExecutionEngine`.
//!
//! `build()` is only available once a calibration handle has been supplied.
//! `try_build()` is always available and falls back to identity calibration.

use std::marker::PhantomData;

use pacer_traits::clock::{Clock, MonotonicClock};

use crate::calibration::{Calibration, CalibrationHandle, CalibrationStore};
use crate::config::{AdjustCfg, EngineCfg, InBandPolicy};
use crate::engine::ExecutionEngine;
use crate::error::{BuildError, Result};

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

pub struct EngineBuilder<K, C> {
    engine: Option<EngineCfg>,
    adjust: Option<AdjustCfg>,
    calibration: Option<CalibrationHandle>,
    clock: C,
    first_run_id: u64,
    _k: PhantomData<K>,
}

impl ExecutionEngine<MonotonicClock> {
    /// Start building an engine.
    pub fn builder() -> EngineBuilder<Missing, MonotonicClock> {
        EngineBuilder {
            engine: None,
            adjust: None,
            calibration: None,
            clock: MonotonicClock::new(),
            first_run_id: 1,
            _k: PhantomData,
        }
    }
}

impl<K, C: Clock> EngineBuilder<K, C> {
    pub fn calibration(self, handle: CalibrationHandle) -> EngineBuilder<Set, C> {
        EngineBuilder {
            engine: self.engine,
            adjust: self.adjust,
            calibration: Some(handle),
            clock: self.clock,
            first_run_id: self.first_run_id,
            _k: PhantomData,
        }
    }

    /// Swap in a different clock (e.g. `ManualClock` in tests).
    pub fn clock<C2: Clock>(self, clock: C2) -> EngineBuilder<K, C2> {
        EngineBuilder {
            engine: self.engine,
            adjust: self.adjust,
            calibration: self.calibration,
            clock,
            first_run_id: self.first_run_id,
            _k: PhantomData,
        }
    }

    pub fn engine_cfg(mut self, cfg: EngineCfg) -> Self {
        self.engine = Some(cfg);
        self
    }

    pub fn adjust_cfg(mut self, cfg: AdjustCfg) -> Self {
        self.adjust = Some(cfg);
        self
    }

    /// Id given to the first run; later runs count up from it.
    pub fn first_run_id(mut self, id: u64) -> Self {
        self.first_run_id = id;
        self
    }

    /// Validate and build with whatever has been provided.
    pub fn try_build(self) -> Result<ExecutionEngine<C>> {
        let calibration = self
            .calibration
            .unwrap_or_else(|| CalibrationStore::handle(Calibration::default()));
        validate_and_build(
            self.engine.unwrap_or_default(),
            self.adjust.unwrap_or_default(),
            calibration,
            self.clock,
            self.first_run_id,
        )
    }
}

impl<C: Clock> EngineBuilder<Set, C> {
    pub fn build(self) -> Result<ExecutionEngine<C>> {
        self.try_build()
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

fn finite_positive(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

/// Validate configuration and construct the engine.
///
/// This is the single source of truth for runtime config validation; it
/// mirrors `pacer_config::Config::validate` for callers that build configs
/// in code.
fn validate_and_build<C: Clock>(
    engine: EngineCfg,
    adjust: AdjustCfg,
    calibration: CalibrationHandle,
    clock: C,
    first_run_id: u64,
) -> Result<ExecutionEngine<C>> {
    // ── Engine ───────────────────────────────────────────────────────────────
    if !finite_positive(engine.heart_rate_threshold_bpm) {
        return Err(invalid("heart_rate_threshold_bpm must be > 0"));
    }
    if !finite_positive(engine.power_threshold_watts) {
        return Err(invalid("power_threshold_watts must be > 0"));
    }
    if engine.hr_hold_ms == 0 {
        return Err(invalid("hr_hold_ms must be >= 1"));
    }
    if !(finite_positive(engine.pace_resolution_kmh) && engine.pace_resolution_kmh <= 1.0) {
        return Err(invalid("pace_resolution_kmh must be in (0.0, 1.0]"));
    }

    // ── Adjustment ───────────────────────────────────────────────────────────
    if !(finite_positive(adjust.min_coefficient) && adjust.min_coefficient <= 1.0) {
        return Err(invalid("min_coefficient must be in (0.0, 1.0]"));
    }
    if !(adjust.max_coefficient.is_finite() && adjust.max_coefficient >= 1.0) {
        return Err(invalid("max_coefficient must be >= 1.0"));
    }
    if !finite_positive(adjust.gain) {
        return Err(invalid("gain must be > 0"));
    }
    if !(finite_positive(adjust.max_step) && adjust.max_step <= 1.0) {
        return Err(invalid("max_step must be in (0.0, 1.0]"));
    }
    if adjust.trend_window < 2 {
        return Err(invalid("trend_window must be >= 2"));
    }
    if !(0.0..=1.0).contains(&adjust.converging_scale) {
        return Err(invalid("converging_scale must be in [0.0, 1.0]"));
    }
    if let InBandPolicy::DriftToNeutral { rate } = adjust.in_band
        && !(0.0..=1.0).contains(&rate)
    {
        return Err(invalid("drift rate must be in [0.0, 1.0]"));
    }

    // ── Calibration ──────────────────────────────────────────────────────────
    let cal = calibration.snapshot();
    if !(cal.domain.min_kmh.is_finite()
        && cal.domain.max_kmh.is_finite()
        && cal.domain.max_kmh > cal.domain.min_kmh)
    {
        return Err(invalid("calibration domain must be a non-empty range"));
    }
    if cal.newton_max_iterations == 0 {
        return Err(invalid("newton_max_iterations must be >= 1"));
    }
    if !finite_positive(cal.newton_tolerance) {
        return Err(invalid("newton_tolerance must be > 0"));
    }

    Ok(ExecutionEngine::from_parts(
        engine,
        adjust,
        calibration,
        clock,
        first_run_id,
    ))
}
