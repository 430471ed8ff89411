//! Workout execution engine.
//!
//! Owns the run state machine and composes the flattener, the adjustment
//! controller and the calibration into a commanded speed/incline per tick.
//! Ticks and manual commands must be serialized by the caller; nothing in
//! here blocks or locks beyond taking a calibration snapshot.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel as xch;
use pacer_traits::Reading;
use pacer_traits::clock::{Clock, MonotonicClock};

use crate::adjust::{
    Adjustment, AdjustmentController, Band, CoefficientBook, CoefficientSet, Direction,
};
use crate::calibration::CalibrationHandle;
use crate::config::{AdjustCfg, EngineCfg};
use crate::error::{EngineError, Result as CoreResult};
use crate::events::{EngineEvent, EventBus, StepEndReason};
use crate::flatten::{ExecutionStep, flatten};
use crate::regression::RegressionSample;
use crate::state::{
    CompletedRun, CompletionReason, Countdown, ExecutionState, RunProgress, RunStatus,
};
use crate::util::{ceil_secs, round_to_resolution};
use crate::workout::{EarlyEnd, Lever, Metric, PercentBand, StepDuration, WorkoutDefinition};

/// One telemetry sample, already decoded. Speeds are raw device units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Telemetry {
    pub elapsed_delta_ms: u64,
    pub distance_delta_m: f64,
    pub raw_speed: f64,
    pub raw_incline: f64,
    pub heart_rate: Option<f64>,
    pub power: Option<f64>,
    /// Independent speed measurement (e.g. a foot pod), in adjusted units.
    pub reference_speed: Option<f64>,
}

impl Telemetry {
    pub fn from_reading(reading: &Reading, elapsed_delta_ms: u64) -> Self {
        Self {
            elapsed_delta_ms,
            distance_delta_m: reading.distance_delta_m,
            raw_speed: reading.raw_speed_kmh,
            raw_incline: reading.raw_incline_pct,
            heart_rate: reading.heart_rate_bpm,
            power: reading.power_w,
            reference_speed: reading.reference_speed_kmh,
        }
    }
}

/// What the device should be doing now. Only `raw_speed` may be sent to it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetCommand {
    pub adjusted_speed: f64,
    pub raw_speed: f64,
    pub incline: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub status: RunStatus,
    pub step_index: usize,
    pub target: Option<TargetCommand>,
    pub adjustment: Option<Adjustment>,
}

/// Pause boundaries, in run-elapsed ms and in ms since the engine was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseSpan {
    pub paused_at_ms: u64,
    pub resumed_at_ms: Option<u64>,
    pub paused_wall_ms: u64,
    pub resumed_wall_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustmentFeedback {
    /// The current step auto-adjusts and the run is not paused.
    pub active: bool,
    pub direction: Direction,
    pub speed_coefficient: f64,
    pub incline_coefficient: f64,
}

enum Advance {
    Entered(RunProgress),
    Finished(CompletedRun),
}

impl Advance {
    fn into_state(self, paused: bool) -> ExecutionState {
        match self {
            Self::Entered(p) if paused => ExecutionState::Paused(p),
            Self::Entered(p) => ExecutionState::Running(p),
            Self::Finished(done) => ExecutionState::Completed(done),
        }
    }
}

pub struct ExecutionEngine<C: Clock = MonotonicClock> {
    cfg: EngineCfg,
    calibration: CalibrationHandle,
    clock: C,
    epoch: Instant,
    steps: Arc<[ExecutionStep]>,
    state: ExecutionState,
    book: CoefficientBook,
    controller: AdjustmentController,
    events: EventBus,
    pause_spans: Vec<PauseSpan>,
    run_samples: Vec<RegressionSample>,
    run_id: u64,
    next_run_id: u64,
    last_raw_speed: Option<f64>,
    last_countdown_s: Option<u64>,
    last_direction: Direction,
}

impl<C: Clock> core::fmt::Debug for ExecutionEngine<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("state", &self.state.name())
            .field("steps", &self.steps.len())
            .field("run_id", &self.run_id)
            .field("subscribers", &self.events.subscriber_count())
            .finish()
    }
}

impl<C: Clock> ExecutionEngine<C> {
    pub(crate) fn from_parts(
        cfg: EngineCfg,
        adjust: AdjustCfg,
        calibration: CalibrationHandle,
        clock: C,
        first_run_id: u64,
    ) -> Self {
        let epoch = clock.now();
        Self {
            cfg,
            calibration,
            clock,
            epoch,
            steps: Vec::new().into(),
            state: ExecutionState::Idle,
            book: CoefficientBook::new(adjust.scope),
            controller: AdjustmentController::new(adjust),
            events: EventBus::default(),
            pause_spans: Vec::new(),
            run_samples: Vec::new(),
            run_id: first_run_id,
            next_run_id: first_run_id,
            last_raw_speed: None,
            last_countdown_s: None,
            last_direction: Direction::Unchanged,
        }
    }

    // ── Run lifecycle ────────────────────────────────────────────────────────

    /// Flatten `workout` and begin a run at step 0.
    ///
    /// Allowed from `Idle` and `Completed`. On an invalid workout nothing
    /// changes and the error wraps `EngineError::InvalidWorkout`.
    pub fn start(&mut self, workout: &WorkoutDefinition) -> CoreResult<()> {
        if self.state.is_active() {
            return Err(eyre::Report::new(EngineError::State(
                "a run is already in progress".into(),
            )));
        }
        let steps = flatten(workout);
        validate_steps(&steps).map_err(eyre::Report::new)?;

        self.steps = steps.into();
        self.book.reset();
        self.controller.reset();
        self.pause_spans.clear();
        self.run_samples.clear();
        self.last_direction = Direction::Unchanged;
        self.run_id = self.next_run_id;
        self.next_run_id = self.next_run_id.wrapping_add(1);

        tracing::info!(
            workout = %workout.name,
            steps = self.steps.len(),
            run_id = self.run_id,
            "run started"
        );
        let mut progress = RunProgress::new();
        self.enter_step(&mut progress, 0);
        self.state = ExecutionState::Running(progress);
        Ok(())
    }

    /// Apply one telemetry sample.
    ///
    /// Paused runs ignore ticks. Ticks while `Idle` or `Completed` are a
    /// `State` error. At most one step boundary is crossed per tick; time or
    /// distance past the boundary is not carried into the next step.
    pub fn tick(&mut self, t: &Telemetry) -> CoreResult<TickOutcome> {
        if t.raw_speed.is_finite() {
            self.last_raw_speed = Some(t.raw_speed);
        }
        let mut p = match std::mem::take(&mut self.state) {
            ExecutionState::Running(p) => p,
            ExecutionState::Paused(p) => {
                let step_index = p.step_index;
                self.state = ExecutionState::Paused(p);
                return Ok(TickOutcome {
                    status: RunStatus::Paused,
                    step_index,
                    target: None,
                    adjustment: None,
                });
            }
            other => return self.reject(other, "tick"),
        };
        let steps = Arc::clone(&self.steps);
        let step = &steps[p.step_index];

        let distance = if t.distance_delta_m.is_finite() {
            t.distance_delta_m.max(0.0)
        } else {
            0.0
        };
        p.step_elapsed_ms = p.step_elapsed_ms.saturating_add(t.elapsed_delta_ms);
        p.total_elapsed_ms = p.total_elapsed_ms.saturating_add(t.elapsed_delta_ms);
        p.step_distance_m += distance;
        p.total_distance_m += distance;
        self.record_sample(t);

        if let Some(reason) = self.step_end_reason(step, &mut p, t) {
            let ended_index = p.step_index;
            let outcome = match self.advance(p, reason) {
                Advance::Entered(next) => {
                    let target = self.target_for(&steps[next.step_index], &next);
                    let step_index = next.step_index;
                    self.state = ExecutionState::Running(next);
                    TickOutcome {
                        status: RunStatus::Running,
                        step_index,
                        target: Some(target),
                        adjustment: None,
                    }
                }
                Advance::Finished(done) => {
                    let status = RunStatus::Completed(done.reason);
                    self.state = ExecutionState::Completed(done);
                    TickOutcome {
                        status,
                        step_index: ended_index,
                        target: None,
                        adjustment: None,
                    }
                }
            };
            return Ok(outcome);
        }

        let adjustment = self.adjust(step, &mut p, t);
        let target = self.target_for(step, &p);
        tracing::trace!(
            step = p.step_index,
            elapsed_ms = p.step_elapsed_ms,
            adjusted_speed = target.adjusted_speed,
            raw_speed = target.raw_speed,
            incline = target.incline,
            "tick"
        );
        let step_index = p.step_index;
        self.state = ExecutionState::Running(p);
        Ok(TickOutcome {
            status: RunStatus::Running,
            step_index,
            target: Some(target),
            adjustment,
        })
    }

    pub fn pause(&mut self) -> CoreResult<()> {
        match std::mem::take(&mut self.state) {
            ExecutionState::Running(p) => {
                let span = PauseSpan {
                    paused_at_ms: p.total_elapsed_ms,
                    resumed_at_ms: None,
                    paused_wall_ms: self.wall_ms(),
                    resumed_wall_ms: None,
                };
                tracing::debug!(at_ms = span.paused_at_ms, "run paused");
                self.pause_spans.push(span);
                self.state = ExecutionState::Paused(p);
                Ok(())
            }
            ExecutionState::Paused(p) => {
                self.state = ExecutionState::Paused(p);
                Ok(())
            }
            other => self.reject(other, "pause"),
        }
    }

    pub fn resume(&mut self) -> CoreResult<()> {
        match std::mem::take(&mut self.state) {
            ExecutionState::Paused(p) => {
                self.close_pause(&p);
                tracing::debug!(at_ms = p.total_elapsed_ms, "run resumed");
                self.state = ExecutionState::Running(p);
                Ok(())
            }
            ExecutionState::Running(p) => {
                self.state = ExecutionState::Running(p);
                Ok(())
            }
            other => self.reject(other, "resume"),
        }
    }

    /// End the current step now. On the last step this completes the run.
    pub fn next(&mut self) -> CoreResult<()> {
        match std::mem::take(&mut self.state) {
            ExecutionState::Running(p) => {
                self.state = self.advance(p, StepEndReason::Next).into_state(false);
                Ok(())
            }
            ExecutionState::Paused(p) => {
                self.state = self.advance(p, StepEndReason::Next).into_state(true);
                Ok(())
            }
            other => self.reject(other, "skip to next step"),
        }
    }

    /// Go back one step, or restart the current step from zero when it is
    /// the first step of its phase.
    pub fn prev(&mut self) -> CoreResult<()> {
        let (mut p, paused) = match std::mem::take(&mut self.state) {
            ExecutionState::Running(p) => (p, false),
            ExecutionState::Paused(p) => (p, true),
            other => return self.reject(other, "go to previous step"),
        };
        let idx = p.step_index;
        let target = if idx > 0 && self.steps[idx - 1].phase == self.steps[idx].phase {
            idx - 1
        } else {
            idx
        };
        self.end_step(&p, StepEndReason::Previous);
        self.enter_step(&mut p, target);
        self.state = Advance::Entered(p).into_state(paused);
        Ok(())
    }

    /// Jump to `index`, clamped to the last step.
    pub fn reset_to_step(&mut self, index: usize) -> CoreResult<()> {
        let (mut p, paused) = match std::mem::take(&mut self.state) {
            ExecutionState::Running(p) => (p, false),
            ExecutionState::Paused(p) => (p, true),
            other => return self.reject(other, "reset to a step"),
        };
        let target = index.min(self.steps.len().saturating_sub(1));
        self.end_step(&p, StepEndReason::Reset);
        self.enter_step(&mut p, target);
        self.state = Advance::Entered(p).into_state(paused);
        Ok(())
    }

    /// Abandon the run.
    pub fn stop(&mut self) -> CoreResult<()> {
        self.terminate(CompletionReason::Stopped, "stop")
    }

    /// Finish the run early as if its last step had ended.
    pub fn complete(&mut self) -> CoreResult<()> {
        self.terminate(CompletionReason::Finished, "complete")
    }

    fn terminate(&mut self, reason: CompletionReason, command: &str) -> CoreResult<()> {
        match std::mem::take(&mut self.state) {
            ExecutionState::Running(p) | ExecutionState::Paused(p) => {
                self.end_step(&p, StepEndReason::Stopped);
                self.state = ExecutionState::Completed(self.finish(p, reason));
                Ok(())
            }
            other => self.reject(other, command),
        }
    }

    // ── Snapshots ────────────────────────────────────────────────────────────

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    pub fn current_step(&self) -> Option<&ExecutionStep> {
        self.state.progress().and_then(|p| self.steps.get(p.step_index))
    }

    /// Target for the current step without feeding a tick.
    pub fn current_target(&self) -> Option<TargetCommand> {
        let p = self.state.progress()?;
        let step = self.steps.get(p.step_index)?;
        Some(self.target_for(step, p))
    }

    pub fn coefficients(&self) -> CoefficientSet {
        self.book.active()
    }

    pub fn adjustment_feedback(&self) -> AdjustmentFeedback {
        let active = self.state.is_running()
            && self
                .current_step()
                .is_some_and(|s| s.auto_adjust.is_some());
        let set = self.book.active();
        AdjustmentFeedback {
            active,
            direction: self.last_direction,
            speed_coefficient: set.speed,
            incline_coefficient: set.incline,
        }
    }

    /// Latest telemetry speed converted to adjusted units.
    pub fn current_speed(&self) -> Option<f64> {
        let raw = self.last_raw_speed?;
        Some(self.calibration.snapshot().raw_to_adjusted(raw))
    }

    pub fn pause_spans(&self) -> &[PauseSpan] {
        &self.pause_spans
    }

    /// Reference-speed samples recorded during the current/last run.
    pub fn take_run_samples(&mut self) -> Vec<RegressionSample> {
        std::mem::take(&mut self.run_samples)
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn subscribe(&mut self) -> xch::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn calibration(&self) -> &CalibrationHandle {
        &self.calibration
    }

    pub fn engine_cfg(&self) -> &EngineCfg {
        &self.cfg
    }

    /// Planned pace of `step` at the given progress, before any coefficient.
    pub fn planned_pace(&self, step: &ExecutionStep, p: &RunProgress) -> f64 {
        let Some(pace) = step.pace else {
            return 0.0;
        };
        let kmh = match (pace.end_kmh, step.duration) {
            (Some(end), Some(d)) => {
                pace.start_kmh + (end - pace.start_kmh) * progress_fraction(d, p)
            }
            _ => pace.start_kmh,
        };
        round_to_resolution(kmh, self.cfg.pace_resolution_kmh)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn reject<T>(&mut self, state: ExecutionState, command: &str) -> CoreResult<T> {
        let name = state.name();
        self.state = state;
        Err(eyre::Report::new(EngineError::State(format!(
            "cannot {command} while {name}"
        ))))
    }

    fn wall_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    fn close_pause(&mut self, p: &RunProgress) {
        let wall = self.wall_ms();
        if let Some(span) = self
            .pause_spans
            .last_mut()
            .filter(|s| s.resumed_at_ms.is_none())
        {
            span.resumed_at_ms = Some(p.total_elapsed_ms);
            span.resumed_wall_ms = Some(wall);
        }
    }

    fn enter_step(&mut self, p: &mut RunProgress, index: usize) {
        let steps = Arc::clone(&self.steps);
        let step = &steps[index];
        p.step_index = index;
        p.step_elapsed_ms = 0;
        p.step_distance_m = 0.0;
        p.countdown = None;
        self.last_countdown_s = None;

        if self.book.enter_step(&step.identity_key, step.phase) {
            tracing::debug!(phase = %step.phase, "phase boundary; coefficients reset to neutral");
            self.last_direction = Direction::Unchanged;
        }
        self.controller.clear_trend();
        self.controller.resume_settle(self.book.last_change_ms());
        p.coefficients = self.book.active();

        tracing::info!(
            index,
            key = %step.identity_key,
            phase = %step.phase,
            "step started"
        );
        self.events.emit(EngineEvent::StepStarted {
            index,
            identity_key: step.identity_key.clone(),
            phase: step.phase,
        });
    }

    fn end_step(&mut self, p: &RunProgress, reason: StepEndReason) {
        let key = self.steps[p.step_index].identity_key.clone();
        tracing::info!(
            index = p.step_index,
            key = %key,
            ?reason,
            elapsed_ms = p.step_elapsed_ms,
            distance_m = p.step_distance_m,
            "step ended"
        );
        self.events.emit(EngineEvent::StepEnded {
            index: p.step_index,
            identity_key: key,
            reason,
            elapsed_ms: p.step_elapsed_ms,
            distance_m: p.step_distance_m,
        });
    }

    fn advance(&mut self, mut p: RunProgress, reason: StepEndReason) -> Advance {
        self.end_step(&p, reason);
        p.steps_completed += 1;
        let next = p.step_index + 1;
        if next < self.steps.len() {
            self.enter_step(&mut p, next);
            Advance::Entered(p)
        } else {
            Advance::Finished(self.finish(p, CompletionReason::Finished))
        }
    }

    fn finish(&mut self, p: RunProgress, reason: CompletionReason) -> CompletedRun {
        self.close_pause(&p);
        let done = CompletedRun {
            reason,
            total_elapsed_ms: p.total_elapsed_ms,
            total_distance_m: p.total_distance_m,
            steps_completed: p.steps_completed,
        };
        tracing::info!(
            ?reason,
            total_elapsed_ms = done.total_elapsed_ms,
            total_distance_m = done.total_distance_m,
            samples = self.run_samples.len(),
            "run completed"
        );
        self.events.emit(EngineEvent::WorkoutCompleted {
            reason,
            total_elapsed_ms: done.total_elapsed_ms,
            total_distance_m: done.total_distance_m,
        });
        done
    }

    fn record_sample(&mut self, t: &Telemetry) {
        let Some(reference) = t.reference_speed else {
            return;
        };
        let raw = t.raw_speed;
        if finite_non_negative(reference) && raw.is_finite() && raw > 0.0 {
            self.run_samples.push(RegressionSample {
                raw_speed: raw,
                reference_speed: reference,
                run_id: self.run_id,
            });
        }
    }

    fn step_end_reason(
        &mut self,
        step: &ExecutionStep,
        p: &mut RunProgress,
        t: &Telemetry,
    ) -> Option<StepEndReason> {
        match step.early_end {
            Some(EarlyEnd::Open) => None,
            Some(EarlyEnd::HeartRateRange {
                min_bpm,
                max_bpm,
                hold_ms,
            }) => {
                let hold = hold_ms.unwrap_or(self.cfg.hr_hold_ms);
                let band = Band {
                    min: min_bpm,
                    max: max_bpm,
                };
                if self.update_countdown(p, band, hold, t) {
                    Some(StepEndReason::EarlyEnd)
                } else {
                    duration_reached(step, p).then_some(StepEndReason::Completed)
                }
            }
            None => duration_reached(step, p).then_some(StepEndReason::Completed),
        }
    }

    /// Returns `true` once HR has stayed in `band` for `hold` ms.
    fn update_countdown(
        &mut self,
        p: &mut RunProgress,
        band: Band,
        hold: u64,
        t: &Telemetry,
    ) -> bool {
        let in_band = t
            .heart_rate
            .is_some_and(|hr| hr.is_finite() && band.contains(hr));
        if !in_band {
            if p.countdown.take().is_some() {
                tracing::debug!(step = p.step_index, "heart rate left early-end band");
            }
            self.last_countdown_s = None;
            return false;
        }
        let remaining = match p.countdown {
            Some(c) => c.remaining_ms.saturating_sub(t.elapsed_delta_ms),
            None => hold,
        };
        p.countdown = Some(Countdown {
            hold_ms: hold,
            remaining_ms: remaining,
        });
        let secs = ceil_secs(remaining);
        if self.last_countdown_s != Some(secs) {
            self.last_countdown_s = Some(secs);
            self.events.emit(EngineEvent::CountdownTick {
                index: p.step_index,
                remaining_s: secs,
            });
        }
        remaining == 0
    }

    fn adjust(
        &mut self,
        step: &ExecutionStep,
        p: &mut RunProgress,
        t: &Telemetry,
    ) -> Option<Adjustment> {
        let auto = step.auto_adjust?;
        let (value, pct, threshold) = match auto.metric {
            Metric::HeartRate => (
                t.heart_rate?,
                step.hr_band?,
                self.cfg.heart_rate_threshold_bpm,
            ),
            Metric::Power => (t.power?, step.power_band?, self.cfg.power_threshold_watts),
        };
        let band = absolute_band(pct, threshold);
        let mut set = self.book.active();
        let previous = set.get(auto.lever);
        let out = self
            .controller
            .update(p.total_elapsed_ms, value, band, previous);
        if out.direction == Direction::Unchanged {
            return None;
        }

        set.set(auto.lever, out.coefficient);
        self.book.store(set, p.total_elapsed_ms);
        p.coefficients = set;
        self.last_direction = out.direction;
        tracing::debug!(
            lever = ?auto.lever,
            previous,
            coefficient = out.coefficient,
            direction = ?out.direction,
            value,
            band_min = band.min,
            band_max = band.max,
            "coefficient adjusted"
        );
        let event = match auto.lever {
            Lever::Speed => EngineEvent::SpeedAdjusted {
                coefficient: out.coefficient,
                direction: out.direction,
            },
            Lever::Incline => EngineEvent::InclineAdjusted {
                coefficient: out.coefficient,
                direction: out.direction,
            },
        };
        self.events.emit(event);
        Some(Adjustment {
            lever: auto.lever,
            previous,
            coefficient: out.coefficient,
            direction: out.direction,
        })
    }

    fn target_for(&self, step: &ExecutionStep, p: &RunProgress) -> TargetCommand {
        let coefficients = if step.auto_adjust.is_some() {
            p.coefficients
        } else {
            CoefficientSet::NEUTRAL
        };
        let adjusted_speed = self.planned_pace(step, p) * coefficients.speed;
        let incline = step.incline_pct.unwrap_or(0.0) * coefficients.incline;
        let raw_speed = if adjusted_speed > 0.0 {
            self.calibration
                .snapshot()
                .adjusted_to_raw(adjusted_speed)
                .max(0.0)
        } else {
            0.0
        };
        TargetCommand {
            adjusted_speed,
            raw_speed,
            incline,
        }
    }
}

fn progress_fraction(duration: StepDuration, p: &RunProgress) -> f64 {
    let f = match duration {
        StepDuration::Time { ms } if ms > 0 => p.step_elapsed_ms as f64 / ms as f64,
        StepDuration::Distance { m } if m > 0.0 => p.step_distance_m / m,
        _ => 1.0,
    };
    f.clamp(0.0, 1.0)
}

fn duration_reached(step: &ExecutionStep, p: &RunProgress) -> bool {
    match step.duration {
        Some(StepDuration::Time { ms }) => p.step_elapsed_ms >= ms,
        Some(StepDuration::Distance { m }) => p.step_distance_m >= m,
        None => false,
    }
}

/// Percent-of-threshold band in absolute units.
pub fn absolute_band(pct: PercentBand, threshold: f64) -> Band {
    Band {
        min: pct.min_pct / 100.0 * threshold,
        max: pct.max_pct / 100.0 * threshold,
    }
}

fn finite_non_negative(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

fn check_band(step: &ExecutionStep, what: &str, min: f64, max: f64) -> Result<(), EngineError> {
    if !(min.is_finite() && max.is_finite() && min > 0.0) {
        return Err(invalid(step, &format!("{what} bounds must be finite and > 0")));
    }
    if min > max {
        return Err(invalid(step, &format!("{what} min must be <= max")));
    }
    Ok(())
}

fn invalid(step: &ExecutionStep, msg: &str) -> EngineError {
    EngineError::InvalidWorkout(format!("step {} ({}): {msg}", step.index, step.identity_key))
}

/// Reject sequences the engine cannot run.
pub fn validate_steps(steps: &[ExecutionStep]) -> Result<(), EngineError> {
    if steps.is_empty() {
        return Err(EngineError::InvalidWorkout("workout has no steps".into()));
    }
    for step in steps {
        match step.duration {
            None if step.early_end.is_none() => {
                return Err(invalid(step, "needs a duration or an early-end condition"));
            }
            Some(StepDuration::Time { ms: 0 }) => {
                return Err(invalid(step, "duration must be > 0"));
            }
            Some(StepDuration::Distance { m }) if !(m.is_finite() && m > 0.0) => {
                return Err(invalid(step, "distance must be > 0"));
            }
            _ => {}
        }
        if let Some(pace) = step.pace {
            if !finite_non_negative(pace.start_kmh) {
                return Err(invalid(step, "pace must be finite and >= 0"));
            }
            if let Some(end) = pace.end_kmh {
                if !finite_non_negative(end) {
                    return Err(invalid(step, "end pace must be finite and >= 0"));
                }
                if step.duration.is_none() {
                    return Err(invalid(step, "a pace progression needs a duration"));
                }
            }
        }
        if let Some(incline) = step.incline_pct
            && !finite_non_negative(incline)
        {
            return Err(invalid(step, "incline must be finite and >= 0"));
        }
        if let Some(b) = step.hr_band {
            check_band(step, "heart-rate band", b.min_pct, b.max_pct)?;
        }
        if let Some(b) = step.power_band {
            check_band(step, "power band", b.min_pct, b.max_pct)?;
        }
        if let Some(auto) = step.auto_adjust {
            let has_band = match auto.metric {
                Metric::HeartRate => step.hr_band.is_some(),
                Metric::Power => step.power_band.is_some(),
            };
            if !has_band {
                return Err(invalid(
                    step,
                    "auto-adjust needs a target band for its metric",
                ));
            }
        }
        if let Some(EarlyEnd::HeartRateRange {
            min_bpm, max_bpm, ..
        }) = step.early_end
        {
            check_band(step, "early-end heart-rate range", min_bpm, max_bpm)?;
        }
    }
    Ok(())
}
