//! Drives a run end to end: sensor → engine → treadmill.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use pacer_traits::clock::Clock;
use pacer_traits::{Sensor, Treadmill};

use crate::command::DeviceCommander;
use crate::device_error::map_device_error;
use crate::engine::{ExecutionEngine, Telemetry, TickOutcome};
use crate::error::{EngineError, Result as CoreResult};
use crate::regression::RegressionSample;
use crate::sampler::Sampler;
use crate::state::{CompletionReason, ExecutionState, RunStatus};
use crate::workout::WorkoutDefinition;

/// How telemetry should be sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Read inside the run loop using `Sensor::read(timeout)`.
    Direct,
    /// Background thread at the given Hz.
    Paced(u32),
}

#[derive(Debug, Clone)]
pub struct RunParams {
    pub mode: SamplingMode,
    pub tick_hz: u32,
    pub sensor_timeout_ms: u64,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            mode: SamplingMode::Direct,
            tick_hz: 1,
            sensor_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub completion: CompletionReason,
    pub total_elapsed_ms: u64,
    pub total_distance_m: f64,
    pub steps_completed: usize,
    /// Reference-speed samples recorded during the run.
    pub samples: Vec<RegressionSample>,
}

/// Stall watchdog threshold in milliseconds.
///
/// Four sensor timeouts, but never shorter than two tick periods so a
/// single missed sample does not trip it.
#[inline]
fn compute_stall_threshold_ms(sensor_timeout_ms: u64, period_ms: u64) -> u64 {
    debug_assert!((1..=crate::util::MILLIS_PER_SEC).contains(&period_ms));
    fast_threshold_ms(sensor_timeout_ms)
        .max(two_periods_ms(period_ms))
        .max(1)
}

#[inline]
fn fast_threshold_ms(sensor_timeout_ms: u64) -> u64 {
    sensor_timeout_ms.saturating_mul(4)
}

#[inline]
fn two_periods_ms(period_ms: u64) -> u64 {
    period_ms.saturating_mul(2)
}

#[inline]
fn stalled_now(stalled_ms: u64, threshold_ms: u64) -> bool {
    stalled_ms > threshold_ms
}

fn ms_between(later: Instant, earlier: Instant) -> u64 {
    later
        .saturating_duration_since(earlier)
        .as_millis()
        .min(u128::from(u64::MAX)) as u64
}

/// Start `workout` on `engine` and run it to completion.
///
/// `shutdown` (Ctrl-C) stops the run gracefully. A sensor silent for longer
/// than the stall threshold halts the treadmill and returns
/// `EngineError::DeviceTimeout`. Treadmill command failures are logged and
/// the run continues.
pub fn run<S, T, C, EC>(
    engine: &mut ExecutionEngine<EC>,
    workout: &WorkoutDefinition,
    sensor: S,
    treadmill: T,
    params: &RunParams,
    clock: C,
    shutdown: &AtomicBool,
) -> CoreResult<RunSummary>
where
    S: Sensor + Send + 'static,
    T: Treadmill,
    C: Clock + Clone + Send + 'static,
    EC: Clock,
{
    engine.start(workout)?;
    let mut commander = DeviceCommander::new(treadmill);
    if let Some(target) = engine.current_target() {
        send_best_effort(&mut commander, &target);
    }
    tracing::info!(
        workout = %workout.name,
        mode = ?params.mode,
        tick_hz = params.tick_hz,
        "run loop start"
    );

    let result = match params.mode {
        SamplingMode::Direct => run_direct(engine, sensor, &mut commander, params, &clock, shutdown),
        SamplingMode::Paced(hz) => {
            run_with_sampler(engine, sensor, &mut commander, params, hz, clock, shutdown)
        }
    };

    if let Err(e) = result {
        if let Err(stop_err) = commander.stop() {
            tracing::warn!(error = %stop_err, "failed to stop treadmill after error");
        }
        if engine.state().is_active()
            && let Err(stop_err) = engine.stop()
        {
            tracing::warn!(error = %stop_err, "failed to stop engine after error");
        }
        tracing::error!(error = %e, "run aborted");
        return Err(e);
    }

    if let Err(e) = commander.stop() {
        tracing::warn!(error = %e, "failed to stop treadmill at end of run");
    }
    summarize(engine)
}

fn summarize<EC: Clock>(engine: &mut ExecutionEngine<EC>) -> CoreResult<RunSummary> {
    let samples = engine.take_run_samples();
    match engine.state() {
        ExecutionState::Completed(done) => Ok(RunSummary {
            completion: done.reason,
            total_elapsed_ms: done.total_elapsed_ms,
            total_distance_m: done.total_distance_m,
            steps_completed: done.steps_completed,
            samples,
        }),
        other => Err(eyre::Report::new(EngineError::State(format!(
            "run loop exited while {}",
            other.name()
        )))),
    }
}

fn send_best_effort<T: Treadmill>(commander: &mut DeviceCommander<T>, target: &crate::TargetCommand) {
    if let Err(e) = commander.apply(target) {
        tracing::warn!(error = %e, "treadmill command failed");
    }
}

/// Returns `true` once the run has completed.
fn handle_outcome<T: Treadmill>(outcome: &TickOutcome, commander: &mut DeviceCommander<T>) -> bool {
    if let Some(target) = &outcome.target {
        send_best_effort(commander, target);
    }
    matches!(outcome.status, RunStatus::Completed(_))
}

fn run_direct<S, T, C, EC>(
    engine: &mut ExecutionEngine<EC>,
    mut sensor: S,
    commander: &mut DeviceCommander<T>,
    params: &RunParams,
    clock: &C,
    shutdown: &AtomicBool,
) -> CoreResult<()>
where
    S: Sensor,
    T: Treadmill,
    C: Clock,
    EC: Clock,
{
    let period_ms = crate::util::period_ms(params.tick_hz);
    let period = Duration::from_millis(period_ms);
    let stall_threshold_ms = compute_stall_threshold_ms(params.sensor_timeout_ms, period_ms);
    let timeout = Duration::from_millis(params.sensor_timeout_ms);

    let mut last_tick = clock.now();
    let mut last_ok = last_tick;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("shutdown requested; stopping run");
            engine.stop()?;
            return Ok(());
        }

        match sensor.read(timeout) {
            Ok(reading) => {
                let now = clock.now();
                let dt = ms_between(now, last_tick);
                last_tick = now;
                last_ok = now;
                let outcome = engine.tick(&Telemetry::from_reading(&reading, dt))?;
                if handle_outcome(&outcome, commander) {
                    return Ok(());
                }
            }
            Err(e) => {
                let mapped = map_device_error(e.as_ref());
                let stalled_ms = ms_between(clock.now(), last_ok);
                tracing::warn!(error = %mapped, stalled_ms, "sensor read failed");
                if stalled_now(stalled_ms, stall_threshold_ms) {
                    return Err(eyre::Report::new(EngineError::DeviceTimeout));
                }
            }
        }
        clock.sleep(period);
    }
}

fn run_with_sampler<S, T, C, EC>(
    engine: &mut ExecutionEngine<EC>,
    sensor: S,
    commander: &mut DeviceCommander<T>,
    params: &RunParams,
    hz: u32,
    clock: C,
    shutdown: &AtomicBool,
) -> CoreResult<()>
where
    S: Sensor + Send + 'static,
    T: Treadmill,
    C: Clock + Clone + Send + 'static,
    EC: Clock,
{
    let period_ms = crate::util::period_ms(hz);
    let stall_threshold_ms = compute_stall_threshold_ms(params.sensor_timeout_ms, period_ms);
    let poll = Duration::from_micros(crate::util::period_us(hz.saturating_mul(4)));
    let sampler = Sampler::spawn(
        sensor,
        hz,
        Duration::from_millis(params.sensor_timeout_ms),
        clock.clone(),
    );

    let mut last_tick = clock.now();
    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("shutdown requested; stopping run");
            engine.stop()?;
            return Ok(());
        }

        if let Some(reading) = sampler.latest() {
            let now = clock.now();
            let dt = ms_between(now, last_tick);
            last_tick = now;
            let outcome = engine.tick(&Telemetry::from_reading(&reading, dt))?;
            if handle_outcome(&outcome, commander) {
                return Ok(());
            }
        } else {
            let stalled_ms = sampler.stalled_for_now();
            if stalled_now(stalled_ms, stall_threshold_ms) {
                tracing::warn!(stalled_ms, "sensor stalled");
                return Err(eyre::Report::new(EngineError::DeviceTimeout));
            }
            // avoid busy spin if no sample yet
            clock.sleep(poll);
        }
    }
}
