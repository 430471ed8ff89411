//! `pacer run`: workout execution against the simulated rig, live event
//! output, and recalibration from the run's reference samples.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use eyre::WrapErr;
use pacer_config::{Config, SampleRow, load_samples_csv, write_samples_csv};
use pacer_core::{
    CalibrationHandle, CompletionReason, Direction, EngineEvent, ExecutionEngine,
    RecalibrationReport, RecalibrationWorker, RegressionCfg, RegressionSample, RunParams,
    RunSummary, SampleHistory, SamplingMode, StepEndReason, WorkoutDefinition,
};
use pacer_device::{SimConfig, SimulatedRig};
use pacer_traits::{Clock, ManualClock, MonotonicClock};
use serde_json::json;

pub struct RunArgs {
    pub workout: WorkoutDefinition,
    pub ticks_per_second: Option<u32>,
    pub realtime: bool,
    pub samples_out: Option<PathBuf>,
}

pub fn completion_name(r: CompletionReason) -> &'static str {
    match r {
        CompletionReason::Finished => "finished",
        CompletionReason::Stopped => "stopped",
    }
}

fn end_reason_name(r: StepEndReason) -> &'static str {
    match r {
        StepEndReason::Completed => "completed",
        StepEndReason::EarlyEnd => "early_end",
        StepEndReason::Next => "next",
        StepEndReason::Previous => "previous",
        StepEndReason::Reset => "reset",
        StepEndReason::Stopped => "stopped",
    }
}

fn direction_name(d: Direction) -> &'static str {
    match d {
        Direction::Increasing => "increasing",
        Direction::Decreasing => "decreasing",
        Direction::Unchanged => "unchanged",
    }
}

fn mmss(ms: u64) -> String {
    let s = ms / 1000;
    format!("{:02}:{:02}", s / 60, s % 60)
}

fn event_json(ev: &EngineEvent) -> serde_json::Value {
    match ev {
        EngineEvent::StepStarted {
            index,
            identity_key,
            phase,
        } => json!({ "event": "step_started", "index": index, "key": identity_key, "phase": phase.to_string() }),
        EngineEvent::StepEnded {
            index,
            identity_key,
            reason,
            elapsed_ms,
            distance_m,
        } => json!({
            "event": "step_ended",
            "index": index,
            "key": identity_key,
            "reason": end_reason_name(*reason),
            "elapsed_ms": elapsed_ms,
            "distance_m": distance_m,
        }),
        EngineEvent::SpeedAdjusted {
            coefficient,
            direction,
        } => json!({ "event": "speed_adjusted", "coefficient": coefficient, "direction": direction_name(*direction) }),
        EngineEvent::InclineAdjusted {
            coefficient,
            direction,
        } => json!({ "event": "incline_adjusted", "coefficient": coefficient, "direction": direction_name(*direction) }),
        EngineEvent::CountdownTick { index, remaining_s } => {
            json!({ "event": "countdown", "index": index, "remaining_s": remaining_s })
        }
        EngineEvent::WorkoutCompleted {
            reason,
            total_elapsed_ms,
            total_distance_m,
        } => json!({
            "event": "workout_completed",
            "reason": completion_name(*reason),
            "total_elapsed_ms": total_elapsed_ms,
            "total_distance_m": total_distance_m,
        }),
    }
}

fn event_text(ev: &EngineEvent) -> String {
    match ev {
        EngineEvent::StepStarted {
            index,
            identity_key,
            phase,
        } => format!("step {index} ({identity_key}, {phase}) started"),
        EngineEvent::StepEnded {
            index,
            reason,
            elapsed_ms,
            distance_m,
            ..
        } => format!(
            "step {index} ended: {} after {} ({distance_m:.0} m)",
            end_reason_name(*reason),
            mmss(*elapsed_ms)
        ),
        EngineEvent::SpeedAdjusted {
            coefficient,
            direction,
        } => format!(
            "speed coefficient {coefficient:.3} ({})",
            direction_name(*direction)
        ),
        EngineEvent::InclineAdjusted {
            coefficient,
            direction,
        } => format!(
            "incline coefficient {coefficient:.3} ({})",
            direction_name(*direction)
        ),
        EngineEvent::CountdownTick { remaining_s, .. } => format!("  ending in {remaining_s}s"),
        EngineEvent::WorkoutCompleted {
            reason,
            total_elapsed_ms,
            total_distance_m,
        } => format!(
            "workout {} in {} ({total_distance_m:.0} m)",
            completion_name(*reason),
            mmss(*total_elapsed_ms)
        ),
    }
}

fn report_line(report: &RecalibrationReport, json: bool) -> String {
    match report {
        RecalibrationReport::Published {
            run_id,
            degree,
            r_squared,
            samples,
        } => {
            if json {
                json!({ "event": "recalibrated", "run_id": run_id, "degree": degree, "r_squared": r_squared, "samples": samples }).to_string()
            } else {
                format!(
                    "recalibrated: degree {degree}, r² {r_squared:.4} from {samples} samples"
                )
            }
        }
        RecalibrationReport::InsufficientData { run_id, have, need } => {
            if json {
                json!({ "event": "recalibration_skipped", "run_id": run_id, "have": have, "need": need }).to_string()
            } else {
                format!("calibration unchanged: {have} of {need} samples")
            }
        }
        RecalibrationReport::Failed { run_id, error } => {
            if json {
                json!({ "event": "recalibration_failed", "run_id": run_id, "error": error.to_string() }).to_string()
            } else {
                format!("calibration unchanged: {error}")
            }
        }
    }
}

fn summary_line(s: &RunSummary, json: bool) -> String {
    if json {
        json!({
            "event": "summary",
            "completion": completion_name(s.completion),
            "total_elapsed_ms": s.total_elapsed_ms,
            "total_distance_m": s.total_distance_m,
            "steps_completed": s.steps_completed,
            "samples": s.samples.len(),
        })
        .to_string()
    } else {
        format!(
            "Run {}: {} steps, {:.0} m in {}",
            completion_name(s.completion),
            s.steps_completed,
            s.total_distance_m,
            mmss(s.total_elapsed_ms)
        )
    }
}

/// Samples recorded by earlier runs into `path`, if it exists yet.
fn load_prior_samples(path: Option<&Path>) -> eyre::Result<Vec<RegressionSample>> {
    let Some(path) = path.filter(|p| p.exists()) else {
        return Ok(Vec::new());
    };
    let rows = load_samples_csv(path)
        .wrap_err_with(|| format!("read earlier samples from {}", path.display()))?;
    tracing::debug!(path = %path.display(), rows = rows.len(), "loaded earlier samples");
    Ok(rows.iter().map(RegressionSample::from).collect())
}

pub fn run_workout(
    cfg: &Config,
    store: CalibrationHandle,
    args: RunArgs,
    json: bool,
    shutdown: Arc<AtomicBool>,
) -> eyre::Result<RunSummary> {
    let mut params = RunParams::from(&cfg.runner);
    if let Some(hz) = args.ticks_per_second {
        params.tick_hz = hz.max(1);
        if let SamplingMode::Paced(_) = params.mode {
            params.mode = SamplingMode::Paced(params.tick_hz);
        }
    }

    if args.realtime {
        drive(cfg, store, &args, params, json, MonotonicClock::new(), &shutdown)
    } else {
        // Simulated time only advances inside the run loop.
        params.mode = SamplingMode::Direct;
        drive(cfg, store, &args, params, json, ManualClock::new(), &shutdown)
    }
}

fn drive<C>(
    cfg: &Config,
    store: CalibrationHandle,
    args: &RunArgs,
    params: RunParams,
    json: bool,
    clock: C,
    shutdown: &AtomicBool,
) -> eyre::Result<RunSummary>
where
    C: Clock + Clone + Send + 'static,
{
    let rcfg = RegressionCfg::from(&cfg.regression);
    let prior = load_prior_samples(args.samples_out.as_deref())?;
    let next_run_id = prior.iter().map(|s| s.run_id).max().map_or(1, |id| id.saturating_add(1));
    let history = SampleHistory::from_samples(prior, rcfg.max_runs);

    let rig = SimulatedRig::new(SimConfig::default(), clock.clone());
    let mut engine = ExecutionEngine::builder()
        .clock(clock.clone())
        .calibration(store.clone())
        .first_run_id(next_run_id)
        .engine_cfg((&cfg.engine).into())
        .adjust_cfg((&cfg.adjust).into())
        .build()?;

    let events = engine.subscribe();
    let printer = std::thread::spawn(move || {
        for ev in events.iter() {
            if json {
                println!("{}", event_json(&ev));
            } else {
                println!("{}", event_text(&ev));
            }
        }
    });

    let result = pacer_core::run(
        &mut engine,
        &args.workout,
        rig.sensor(),
        rig.treadmill(),
        &params,
        clock,
        shutdown,
    );
    let run_id = engine.run_id();
    // Closing the event stream ends the printer.
    drop(engine);
    if printer.join().is_err() {
        tracing::warn!("event printer panicked");
    }
    let summary = result?;
    println!("{}", summary_line(&summary, json));

    if let Some(path) = &args.samples_out {
        let mut kept = history.clone();
        kept.push_run(run_id, summary.samples.clone());
        let rows: Vec<SampleRow> = kept.samples().iter().map(SampleRow::from).collect();
        write_samples_csv(path, &rows)
            .wrap_err_with(|| format!("write samples to {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            rows = rows.len(),
            runs = kept.run_count(),
            "samples written"
        );
    }

    let worker = RecalibrationWorker::spawn_with_history(store, rcfg, history);
    worker.submit(run_id, summary.samples.clone());
    match worker.reports().recv_timeout(Duration::from_secs(10)) {
        Ok(report) => println!("{}", report_line(&report, json)),
        Err(e) => tracing::warn!(error = %e, "no recalibration report"),
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_render_in_both_modes() {
        let ev = EngineEvent::StepEnded {
            index: 2,
            identity_key: "r1_c0".into(),
            reason: StepEndReason::EarlyEnd,
            elapsed_ms: 95_000,
            distance_m: 312.4,
        };
        assert_eq!(event_text(&ev), "step 2 ended: early_end after 01:35 (312 m)");
        let v = event_json(&ev);
        assert_eq!(v["event"], "step_ended");
        assert_eq!(v["key"], "r1_c0");
        assert_eq!(v["reason"], "early_end");
    }

    #[test]
    fn mmss_rolls_minutes() {
        assert_eq!(mmss(0), "00:00");
        assert_eq!(mmss(61_999), "01:01");
        assert_eq!(mmss(3_600_000), "60:00");
    }
}
