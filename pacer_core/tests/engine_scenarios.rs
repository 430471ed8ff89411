//! End-to-end engine behavior driven by hand-written telemetry.

use std::time::Duration;

use pacer_core::{
    AdjustCfg, AdjustScope, Calibration, CalibrationStore, CoefficientSet, CompletionReason,
    Direction, EarlyEnd, EngineError, EngineEvent, ExecutionEngine, ExecutionState, LeafStep,
    Lever, LinearModel, Metric, Phase, RunStatus, StepEndReason, StepKind, Telemetry,
    WorkoutDefinition,
};
use pacer_traits::ManualClock;

fn engine(adjust: AdjustCfg) -> ExecutionEngine<ManualClock> {
    ExecutionEngine::builder()
        .clock(ManualClock::new())
        .adjust_cfg(adjust)
        .try_build()
        .expect("engine build")
}

fn secs(n: u64) -> Telemetry {
    Telemetry {
        elapsed_delta_ms: n * 1000,
        ..Telemetry::default()
    }
}

fn hr(n: u64, bpm: f64) -> Telemetry {
    Telemetry {
        heart_rate: Some(bpm),
        ..secs(n)
    }
}

fn index_of<C: pacer_traits::Clock>(e: &ExecutionEngine<C>) -> usize {
    e.state().progress().expect("active run").step_index
}

fn state_error(err: &eyre::Report) -> bool {
    matches!(err.downcast_ref::<EngineError>(), Some(EngineError::State(_)))
}

/// Warmup and cooldown steer speed by heart rate (band 102..119 bpm at the
/// default 170 bpm threshold); the main block is `2× [run (auto), recover]`.
fn hr_workout() -> WorkoutDefinition {
    let auto = |kind| {
        LeafStep::new(kind)
            .for_secs(600)
            .at_pace(10.0)
            .with_hr_band(60.0, 70.0)
            .auto_adjust(Metric::HeartRate, Lever::Speed)
    };
    WorkoutDefinition::new("hr")
        .step(auto(StepKind::Warmup))
        .repeat(
            2,
            [
                auto(StepKind::Run),
                LeafStep::new(StepKind::Recover).for_secs(60).at_pace(7.0),
            ],
        )
        .step(auto(StepKind::Cooldown))
}

#[test]
fn progression_interpolates_and_rounds() {
    let mut e = engine(AdjustCfg::default());
    let w = WorkoutDefinition::new("prog")
        .step(LeafStep::new(StepKind::Run).for_secs(300).progressing(10.0, 12.0));
    e.start(&w).unwrap();

    let out = e.tick(&secs(150)).unwrap();
    let target = out.target.unwrap();
    assert!((target.adjusted_speed - 11.0).abs() < 1e-9, "{target:?}");
    assert!((target.raw_speed - 11.0).abs() < 1e-9);

    let out = e.tick(&secs(49)).unwrap();
    // 10 + 2 × 199/300 = 11.3266…
    assert!((out.target.unwrap().adjusted_speed - 11.3).abs() < 1e-9);
}

#[test]
fn distance_progression_uses_distance_fraction() {
    let mut e = engine(AdjustCfg::default());
    let w = WorkoutDefinition::new("prog")
        .step(LeafStep::new(StepKind::Run).for_meters(1000.0).progressing(8.0, 10.0));
    e.start(&w).unwrap();
    let out = e
        .tick(&Telemetry {
            distance_delta_m: 250.0,
            ..secs(60)
        })
        .unwrap();
    assert!((out.target.unwrap().adjusted_speed - 8.5).abs() < 1e-9);
}

#[test]
fn prev_at_phase_start_restarts_the_step() {
    let mut e = engine(AdjustCfg::default());
    let w = WorkoutDefinition::new("w")
        .step(LeafStep::new(StepKind::Warmup).for_secs(60))
        .step(LeafStep::new(StepKind::Run).for_secs(120))
        .step(LeafStep::new(StepKind::Run).for_secs(120))
        .step(LeafStep::new(StepKind::Cooldown).for_secs(60));
    e.start(&w).unwrap();
    e.next().unwrap();
    e.tick(&Telemetry {
        distance_delta_m: 80.0,
        ..secs(30)
    })
    .unwrap();

    e.prev().unwrap();
    let p = e.state().progress().unwrap();
    assert_eq!(p.step_index, 1);
    assert_eq!(p.step_elapsed_ms, 0);
    assert_eq!(p.step_distance_m, 0.0);
    assert_eq!(p.total_elapsed_ms, 30_000);

    // Inside a phase it goes back one step.
    e.next().unwrap();
    assert_eq!(index_of(&e), 2);
    e.prev().unwrap();
    assert_eq!(index_of(&e), 1);
}

#[test]
fn reset_to_step_clamps_to_last() {
    let mut e = engine(AdjustCfg::default());
    e.start(&hr_workout()).unwrap();
    e.reset_to_step(99).unwrap();
    assert_eq!(index_of(&e), 5);
    assert_eq!(e.current_step().unwrap().phase, Phase::Cooldown);
}

#[test]
fn adjustment_lowers_speed_when_heart_rate_is_high() {
    let mut e = engine(AdjustCfg::default());
    e.start(&hr_workout()).unwrap();
    let out = e.tick(&hr(1, 180.0)).unwrap();
    let adj = out.adjustment.expect("adjustment");
    assert_eq!(adj.lever, Lever::Speed);
    assert!((adj.coefficient - 0.95).abs() < 1e-9);
    assert!((out.target.unwrap().adjusted_speed - 9.5).abs() < 1e-9);

    let fb = e.adjustment_feedback();
    assert!(fb.active);
    assert!((fb.speed_coefficient - 0.95).abs() < 1e-9);
    assert_eq!(fb.incline_coefficient, 1.0);

    // Settle interval: no second change one second later.
    assert!(e.tick(&hr(1, 185.0)).unwrap().adjustment.is_none());
}

#[test]
fn worsening_metric_moves_by_at_most_max_step_per_tick() {
    let mut e = engine(AdjustCfg {
        settle_ms: 0,
        ..AdjustCfg::default()
    });
    e.start(&hr_workout()).unwrap();
    let mut last = 1.0;
    for i in 0..30 {
        let out = e.tick(&hr(1, 170.0 + f64::from(i) * 5.0)).unwrap();
        let c = e.coefficients().speed;
        assert!(c <= last, "coefficient rose: {last} → {c}");
        assert!(last - c <= 0.05 + 1e-12, "step too large: {last} → {c}");
        assert!(c >= 0.5);
        if let Some(adj) = out.adjustment {
            assert_eq!(adj.previous, last);
        }
        last = c;
    }
    assert!((last - 0.5).abs() < 1e-9);
}

#[test]
fn phase_boundary_resets_coefficients_in_all_steps_scope() {
    let mut e = engine(AdjustCfg::default());
    e.start(&hr_workout()).unwrap();
    e.tick(&hr(1, 180.0)).unwrap();
    assert!(e.coefficients().speed < 1.0);

    e.next().unwrap(); // warmup → main
    assert_eq!(e.coefficients(), CoefficientSet::NEUTRAL);

    e.tick(&hr(1, 180.0)).unwrap();
    let learned = e.coefficients();
    assert!(learned.speed < 1.0);
    e.next().unwrap(); // run → recover, same phase
    assert_eq!(e.coefficients(), learned);
    // Recover has no auto-adjust, so its target ignores the coefficient.
    assert!((e.current_target().unwrap().adjusted_speed - 7.0).abs() < 1e-9);

    e.reset_to_step(5).unwrap(); // main → cooldown
    assert_eq!(e.coefficients(), CoefficientSet::NEUTRAL);
}

#[test]
fn settle_interval_spans_short_steps_sharing_a_coefficient() {
    let mut e = engine(AdjustCfg {
        settle_ms: 10_000,
        ..AdjustCfg::default()
    });
    let short = || {
        LeafStep::new(StepKind::Run)
            .for_secs(3)
            .at_pace(10.0)
            .with_hr_band(60.0, 70.0)
            .auto_adjust(Metric::HeartRate, Lever::Speed)
    };
    let w = WorkoutDefinition::new("short-intervals")
        .step(short())
        .step(short())
        .step(short())
        .step(short());
    e.start(&w).unwrap();

    let mut changed_at = Vec::new();
    for _ in 0..11 {
        if e.tick(&hr(1, 180.0)).unwrap().adjustment.is_some() {
            changed_at.push(e.state().progress().unwrap().total_elapsed_ms);
        }
    }
    assert_eq!(index_of(&e), 3);
    assert_eq!(changed_at, vec![1_000, 11_000]);
}

#[test]
fn phase_boundary_clears_reported_direction() {
    let mut e = engine(AdjustCfg::default());
    e.start(&hr_workout()).unwrap();
    e.tick(&hr(1, 180.0)).unwrap();
    assert_eq!(e.adjustment_feedback().direction, Direction::Decreasing);

    e.next().unwrap(); // warmup → main
    let fb = e.adjustment_feedback();
    assert_eq!(fb.direction, Direction::Unchanged);
    assert_eq!(fb.speed_coefficient, 1.0);

    e.tick(&hr(1, 180.0)).unwrap();
    e.next().unwrap(); // run → recover, same phase
    assert_eq!(e.adjustment_feedback().direction, Direction::Decreasing);
}

#[test]
fn one_step_scope_carries_coefficients_across_iterations() {
    let mut e = engine(AdjustCfg {
        scope: AdjustScope::OneStep,
        ..AdjustCfg::default()
    });
    e.start(&hr_workout()).unwrap();
    e.tick(&hr(1, 180.0)).unwrap();
    e.next().unwrap(); // → r1_c0 (iteration 1)
    assert_eq!(e.coefficients(), CoefficientSet::NEUTRAL);

    e.tick(&hr(1, 180.0)).unwrap();
    let learned = e.coefficients();
    assert!((learned.speed - 0.95).abs() < 1e-9);

    e.next().unwrap(); // → r1_c1
    assert_eq!(e.coefficients(), CoefficientSet::NEUTRAL);
    e.next().unwrap(); // → r1_c0 (iteration 2)
    assert_eq!(e.current_step().unwrap().identity_key, "r1_c0");
    assert_eq!(e.coefficients(), learned);

    e.next().unwrap();
    e.next().unwrap(); // → cooldown
    assert_eq!(e.coefficients(), CoefficientSet::NEUTRAL);
}

#[test]
fn heart_rate_range_ends_after_hold() {
    let mut e = engine(AdjustCfg::default());
    let rx = e.subscribe();
    let w = WorkoutDefinition::new("hr-range")
        .step(LeafStep::new(StepKind::Recover).ending(EarlyEnd::HeartRateRange {
            min_bpm: 100.0,
            max_bpm: 130.0,
            hold_ms: Some(5_000),
        }))
        .step(LeafStep::new(StepKind::Cooldown).for_secs(60));
    e.start(&w).unwrap();

    for _ in 0..3 {
        e.tick(&hr(1, 120.0)).unwrap();
    }
    let cd = e.state().progress().unwrap().countdown.unwrap();
    assert_eq!(cd.remaining_ms, 3_000);

    // Leaving the band starts the countdown over.
    e.tick(&hr(1, 150.0)).unwrap();
    assert!(e.state().progress().unwrap().countdown.is_none());

    for _ in 0..5 {
        e.tick(&hr(1, 120.0)).unwrap();
        assert_eq!(index_of(&e), 0);
    }
    e.tick(&hr(1, 120.0)).unwrap();
    assert_eq!(index_of(&e), 1);

    let events: Vec<_> = rx.try_iter().collect();
    let ticks: Vec<u64> = events
        .iter()
        .filter_map(|ev| match ev {
            EngineEvent::CountdownTick { remaining_s, .. } => Some(*remaining_s),
            _ => None,
        })
        .collect();
    assert_eq!(ticks, vec![5, 4, 3, 5, 4, 3, 2, 1, 0]);
    assert!(events.iter().any(|ev| matches!(
        ev,
        EngineEvent::StepEnded {
            index: 0,
            reason: StepEndReason::EarlyEnd,
            ..
        }
    )));
}

#[test]
fn open_step_waits_for_next() {
    let mut e = engine(AdjustCfg::default());
    let w = WorkoutDefinition::new("open")
        .step(LeafStep::new(StepKind::Run).at_pace(9.0).ending(EarlyEnd::Open))
        .step(LeafStep::new(StepKind::Cooldown).for_secs(60));
    e.start(&w).unwrap();
    for _ in 0..100 {
        e.tick(&secs(3600)).unwrap();
    }
    assert_eq!(index_of(&e), 0);
    e.next().unwrap();
    assert_eq!(index_of(&e), 1);
}

#[test]
fn final_step_completes_run() {
    let mut e = engine(AdjustCfg::default());
    let rx = e.subscribe();
    let w = WorkoutDefinition::new("short").step(LeafStep::new(StepKind::Run).for_secs(2));
    e.start(&w).unwrap();
    assert_eq!(e.tick(&secs(1)).unwrap().status, RunStatus::Running);
    let out = e.tick(&secs(1)).unwrap();
    assert_eq!(out.status, RunStatus::Completed(CompletionReason::Finished));
    assert!(out.target.is_none());

    let ExecutionState::Completed(done) = e.state() else {
        panic!("expected completed, got {:?}", e.state());
    };
    assert_eq!(done.total_elapsed_ms, 2_000);
    assert_eq!(done.steps_completed, 1);

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        events,
        vec![
            EngineEvent::StepStarted {
                index: 0,
                identity_key: "s0".into(),
                phase: Phase::Main,
            },
            EngineEvent::StepEnded {
                index: 0,
                identity_key: "s0".into(),
                reason: StepEndReason::Completed,
                elapsed_ms: 2_000,
                distance_m: 0.0,
            },
            EngineEvent::WorkoutCompleted {
                reason: CompletionReason::Finished,
                total_elapsed_ms: 2_000,
                total_distance_m: 0.0,
            },
        ]
    );

    // Terminal: ticks are refused, a new run may start.
    assert!(state_error(&e.tick(&secs(1)).unwrap_err()));
    e.start(&w).unwrap();
    assert_eq!(e.run_id(), 2);
}

#[test]
fn complete_finishes_running_or_paused_run() {
    for pause_first in [false, true] {
        let mut e = engine(AdjustCfg::default());
        let rx = e.subscribe();
        e.start(&hr_workout()).unwrap();
        e.tick(&secs(30)).unwrap();
        if pause_first {
            e.pause().unwrap();
        }

        e.complete().unwrap();
        let ExecutionState::Completed(done) = e.state() else {
            panic!("expected completed, got {:?}", e.state());
        };
        assert_eq!(done.reason, CompletionReason::Finished);
        assert_eq!(done.total_elapsed_ms, 30_000);

        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.contains(&EngineEvent::StepEnded {
            index: 0,
            identity_key: "s0".into(),
            reason: StepEndReason::Stopped,
            elapsed_ms: 30_000,
            distance_m: 0.0,
        }));
        assert_eq!(
            events.last(),
            Some(&EngineEvent::WorkoutCompleted {
                reason: CompletionReason::Finished,
                total_elapsed_ms: 30_000,
                total_distance_m: 0.0,
            })
        );

        if pause_first {
            assert_eq!(e.pause_spans()[0].resumed_at_ms, Some(30_000));
        } else {
            assert!(e.pause_spans().is_empty());
        }
        assert!(state_error(&e.tick(&secs(1)).unwrap_err()));
        assert!(state_error(&e.complete().unwrap_err()));
    }
}

#[test]
fn commands_outside_a_run_are_state_errors() {
    let mut e = engine(AdjustCfg::default());
    assert!(state_error(&e.tick(&secs(1)).unwrap_err()));
    assert!(state_error(&e.pause().unwrap_err()));
    assert!(state_error(&e.next().unwrap_err()));
    assert!(state_error(&e.stop().unwrap_err()));
    assert_eq!(e.state(), &ExecutionState::Idle);

    e.start(&hr_workout()).unwrap();
    assert!(state_error(&e.start(&hr_workout()).unwrap_err()));
    e.stop().unwrap();
    assert!(matches!(
        e.state(),
        ExecutionState::Completed(done) if done.reason == CompletionReason::Stopped
    ));
    assert!(state_error(&e.resume().unwrap_err()));
}

#[test]
fn pause_freezes_progress_and_records_spans() {
    let clock = ManualClock::new();
    let mut e = ExecutionEngine::builder()
        .clock(clock.clone())
        .try_build()
        .unwrap();
    e.start(&hr_workout()).unwrap();
    e.tick(&secs(10)).unwrap();

    clock.advance(Duration::from_secs(12));
    e.pause().unwrap();
    e.pause().unwrap();
    let out = e.tick(&secs(30)).unwrap();
    assert_eq!(out.status, RunStatus::Paused);
    assert_eq!(e.state().progress().unwrap().total_elapsed_ms, 10_000);
    assert!(!e.adjustment_feedback().active);

    clock.advance(Duration::from_secs(30));
    e.resume().unwrap();
    e.tick(&secs(5)).unwrap();
    assert_eq!(e.state().progress().unwrap().step_elapsed_ms, 15_000);

    let spans = e.pause_spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].paused_at_ms, 10_000);
    assert_eq!(spans[0].resumed_at_ms, Some(10_000));
    assert_eq!(spans[0].paused_wall_ms, 12_000);
    assert_eq!(spans[0].resumed_wall_ms, Some(42_000));
}

#[test]
fn stop_while_paused_closes_the_span() {
    let mut e = engine(AdjustCfg::default());
    e.start(&hr_workout()).unwrap();
    e.pause().unwrap();
    e.stop().unwrap();
    assert!(e.pause_spans()[0].resumed_at_ms.is_some());
}

#[test]
fn targets_pass_through_calibration() {
    let mut cal = Calibration::default();
    cal.linear = LinearModel::new(2.0, 0.0).unwrap();
    let mut e = ExecutionEngine::builder()
        .calibration(CalibrationStore::handle(cal))
        .clock(ManualClock::new())
        .build()
        .unwrap();
    let w = WorkoutDefinition::new("cal")
        .step(LeafStep::new(StepKind::Run).for_secs(60).at_pace(10.0).at_incline(2.0));
    e.start(&w).unwrap();
    let out = e
        .tick(&Telemetry {
            raw_speed: 5.0,
            reference_speed: Some(9.8),
            ..secs(1)
        })
        .unwrap();
    let t = out.target.unwrap();
    assert_eq!(t.adjusted_speed, 10.0);
    assert_eq!(t.raw_speed, 5.0);
    assert_eq!(t.incline, 2.0);
    assert_eq!(e.current_speed(), Some(10.0));

    let samples = e.take_run_samples();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].run_id, e.run_id());
    assert_eq!(samples[0].reference_speed, 9.8);
}

#[test]
fn step_without_pace_commands_zero_speed() {
    let mut e = engine(AdjustCfg::default());
    let w = WorkoutDefinition::new("rest").step(LeafStep::new(StepKind::Rest).for_secs(60));
    e.start(&w).unwrap();
    let t = e.current_target().unwrap();
    assert_eq!(t.adjusted_speed, 0.0);
    assert_eq!(t.raw_speed, 0.0);
    assert_eq!(t.incline, 0.0);
}
