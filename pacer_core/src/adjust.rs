//! Trend-aware coefficient controller and per-phase coefficient storage.
//!
//! The controller nudges a multiplicative coefficient (speed or incline) so a
//! live metric moves into its target band:
//! - out of band: correction proportional to the relative distance outside
//!   the band, capped at `max_step`
//! - already converging: correction scaled by `converging_scale`, or
//!   suppressed if the band will be reached within one settle interval
//! - at most one change per `settle_ms`, timed per coefficient scope so
//!   short steps sharing a coefficient cannot bypass it
//! - always clamped to `[min_coefficient, max_coefficient]`

use std::collections::{HashMap, VecDeque};

use crate::config::{AdjustCfg, AdjustScope, InBandPolicy};
use crate::workout::{Lever, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Increasing,
    Decreasing,
    #[default]
    Unchanged,
}

impl Direction {
    fn between(previous: f64, next: f64) -> Self {
        if next > previous {
            Self::Increasing
        } else if next < previous {
            Self::Decreasing
        } else {
            Self::Unchanged
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoefficientSet {
    pub speed: f64,
    pub incline: f64,
}

impl CoefficientSet {
    pub const NEUTRAL: Self = Self {
        speed: 1.0,
        incline: 1.0,
    };

    pub fn get(&self, lever: Lever) -> f64 {
        match lever {
            Lever::Speed => self.speed,
            Lever::Incline => self.incline,
        }
    }

    pub fn set(&mut self, lever: Lever, value: f64) {
        match lever {
            Lever::Speed => self.speed = value,
            Lever::Incline => self.incline = value,
        }
    }
}

impl Default for CoefficientSet {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Target band in absolute units (bpm or watts).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }

    pub fn center(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    /// Distance to the band: positive below it, negative above it, zero inside.
    pub fn signed_error(&self, v: f64) -> f64 {
        if v < self.min {
            self.min - v
        } else if v > self.max {
            self.max - v
        } else {
            0.0
        }
    }
}

/// A coefficient change reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustment {
    pub lever: Lever,
    pub previous: f64,
    pub coefficient: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerOutput {
    pub coefficient: f64,
    pub direction: Direction,
}

#[derive(Debug)]
pub struct AdjustmentController {
    cfg: AdjustCfg,
    window: VecDeque<(u64, f64)>,
    last_change_ms: Option<u64>,
}

impl AdjustmentController {
    pub fn new(cfg: AdjustCfg) -> Self {
        let cap = cfg.trend_window.max(2);
        Self {
            cfg,
            window: VecDeque::with_capacity(cap),
            last_change_ms: None,
        }
    }

    pub fn cfg(&self) -> &AdjustCfg {
        &self.cfg
    }

    /// Forget the trend window and settle timer (new run).
    pub fn reset(&mut self) {
        self.window.clear();
        self.last_change_ms = None;
    }

    /// Forget the trend window only (step entry). The settle timer belongs
    /// to the coefficient scope and is restored with [`Self::resume_settle`].
    pub fn clear_trend(&mut self) {
        self.window.clear();
    }

    /// Continue the settle interval of the coefficient being driven.
    pub fn resume_settle(&mut self, last_change_ms: Option<u64>) {
        self.last_change_ms = last_change_ms;
    }

    pub fn clamp(&self, c: f64) -> f64 {
        if c.is_nan() {
            return 1.0_f64.clamp(self.cfg.min_coefficient, self.cfg.max_coefficient);
        }
        c.clamp(self.cfg.min_coefficient, self.cfg.max_coefficient)
    }

    /// Metric change per millisecond between the oldest and newest sample in the window.
    pub fn trend_per_ms(&self) -> Option<f64> {
        if self.window.len() < 2 {
            return None;
        }
        let (t0, v0) = *self.window.front()?;
        let (t1, v1) = *self.window.back()?;
        if t1 <= t0 {
            return None;
        }
        Some((v1 - v0) / (t1 - t0) as f64)
    }

    fn settled(&self, now_ms: u64) -> bool {
        self.last_change_ms
            .is_none_or(|t| now_ms.saturating_sub(t) >= self.cfg.settle_ms)
    }

    /// Feed one metric sample taken at `now_ms` and return the coefficient to use.
    pub fn update(&mut self, now_ms: u64, value: f64, band: Band, current: f64) -> ControllerOutput {
        let current = self.clamp(current);
        let unchanged = ControllerOutput {
            coefficient: current,
            direction: Direction::Unchanged,
        };
        if !value.is_finite() {
            return unchanged;
        }

        self.window.push_back((now_ms, value));
        while self.window.len() > self.cfg.trend_window.max(2) {
            self.window.pop_front();
        }
        if !self.settled(now_ms) {
            return unchanged;
        }

        let error = band.signed_error(value);
        let delta = if error == 0.0 {
            match self.cfg.in_band {
                InBandPolicy::Hold => 0.0,
                InBandPolicy::DriftToNeutral { rate } => {
                    let gap = 1.0 - current;
                    gap.signum() * gap.abs().min(rate)
                }
            }
        } else {
            self.correction(error, band)
        };
        if delta == 0.0 {
            return unchanged;
        }

        let next = self.clamp(current + delta);
        let direction = Direction::between(current, next);
        if direction != Direction::Unchanged {
            self.last_change_ms = Some(now_ms);
        }
        ControllerOutput {
            coefficient: next,
            direction,
        }
    }

    fn correction(&self, error: f64, band: Band) -> f64 {
        let scale = band.center().abs().max(f64::EPSILON);
        let mut delta =
            (error / scale * self.cfg.gain).clamp(-self.cfg.max_step, self.cfg.max_step);

        if let Some(slope) = self.trend_per_ms() {
            // Same sign: the metric is already heading into the band.
            if slope * error > 0.0 {
                let eta_ms = error.abs() / slope.abs();
                if eta_ms <= self.cfg.settle_ms as f64 {
                    tracing::trace!(eta_ms, "metric converging within settle interval");
                    delta = 0.0;
                } else {
                    delta *= self.cfg.converging_scale;
                }
            }
        }
        delta
    }
}

/// A stored coefficient set and when it last changed.
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    set: CoefficientSet,
    last_change_ms: Option<u64>,
}

/// Coefficient sets for the current phase, stored by scope.
#[derive(Debug, Clone)]
pub struct CoefficientBook {
    scope: AdjustScope,
    phase: Option<Phase>,
    global: Slot,
    per_step: HashMap<String, Slot>,
    active_key: Option<String>,
    active: Slot,
}

impl CoefficientBook {
    pub fn new(scope: AdjustScope) -> Self {
        Self {
            scope,
            phase: None,
            global: Slot::default(),
            per_step: HashMap::new(),
            active_key: None,
            active: Slot::default(),
        }
    }

    pub fn scope(&self) -> AdjustScope {
        self.scope
    }

    /// Forget everything (new run).
    pub fn reset(&mut self) {
        self.phase = None;
        self.global = Slot::default();
        self.per_step.clear();
        self.active_key = None;
        self.active = Slot::default();
    }

    /// Load the set for the step being entered. Returns `true` when this
    /// crossed a phase boundary, which clears the stored sets to neutral.
    pub fn enter_step(&mut self, identity_key: &str, phase: Phase) -> bool {
        let crossed = self.phase.is_some_and(|p| p != phase);
        if crossed {
            self.global = Slot::default();
            self.per_step.clear();
        }
        self.phase = Some(phase);
        self.active = match self.scope {
            AdjustScope::AllSteps => self.global,
            AdjustScope::OneStep => *self
                .per_step
                .entry(identity_key.to_owned())
                .or_default(),
        };
        self.active_key = Some(identity_key.to_owned());
        crossed
    }

    pub fn active(&self) -> CoefficientSet {
        self.active.set
    }

    /// When the active set last changed, for the settle interval.
    pub fn last_change_ms(&self) -> Option<u64> {
        self.active.last_change_ms
    }

    /// Update the active set, changed at `now_ms`, and write it back to its
    /// scope's storage.
    pub fn store(&mut self, set: CoefficientSet, now_ms: u64) {
        self.active = Slot {
            set,
            last_change_ms: Some(now_ms),
        };
        match self.scope {
            AdjustScope::AllSteps => self.global = self.active,
            AdjustScope::OneStep => {
                if let Some(key) = &self.active_key {
                    self.per_step.insert(key.clone(), self.active);
                }
            }
        }
    }

    pub fn stored_for(&self, identity_key: &str) -> Option<CoefficientSet> {
        match self.scope {
            AdjustScope::AllSteps => Some(self.global.set),
            AdjustScope::OneStep => self.per_step.get(identity_key).map(|s| s.set),
        }
    }
}
