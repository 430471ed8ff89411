#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Workout execution and adaptive adjustment (device-agnostic).
//!
//! All device interaction goes through `pacer_traits::Treadmill` and
//! `pacer_traits::Sensor`. The engine itself never blocks and never locks;
//! callers serialize ticks and commands.
//!
//! ## Architecture
//!
//! - **Workouts**: hierarchical definitions (`workout`) flattened into an
//!   execution sequence (`flatten`)
//! - **Calibration**: linear and polynomial raw ↔ adjusted speed models behind
//!   an atomically swapped store (`calibration`)
//! - **Regression**: least-squares fits and the out-of-band worker
//!   (`regression`, `recalibration`)
//! - **Adjustment**: bounded, trend-aware coefficients (`adjust`)
//! - **Execution**: the run state machine and its event stream (`engine`,
//!   `state`, `events`)
//! - **Orchestration**: sampler thread, runner loop, device commands

pub mod adjust;
pub mod atomic;
pub mod builder;
pub mod calibration;
pub mod command;
pub mod config;
pub mod conversions;
pub mod device_error;
pub mod engine;
pub mod error;
pub mod events;
pub mod flatten;
pub mod mocks;
pub mod recalibration;
pub mod regression;
pub mod runner;
pub mod sampler;
pub mod state;
pub mod util;
pub mod workout;

pub use adjust::{
    Adjustment, AdjustmentController, Band, CoefficientBook, CoefficientSet, ControllerOutput,
    Direction,
};
pub use builder::EngineBuilder;
pub use calibration::{
    Calibration, CalibrationHandle, CalibrationModel, CalibrationStore, Inversion, LinearModel,
    PolynomialModel, SpeedDomain,
};
pub use command::DeviceCommander;
pub use config::{
    AdjustCfg, AdjustScope, CalibrationCfg, CalibrationMode, EngineCfg, InBandPolicy,
    RegressionCfg,
};
pub use engine::{
    AdjustmentFeedback, ExecutionEngine, PauseSpan, TargetCommand, Telemetry, TickOutcome,
    absolute_band, validate_steps,
};
pub use error::{BuildError, CalibrationError, EngineError, Report, Result};
pub use events::{EngineEvent, EventBus, StepEndReason};
pub use flatten::{ExecutionStep, RepeatPosition, effective_repeat_count, flatten};
pub use recalibration::{
    CalibrationUpdate, RecalibrationReport, RecalibrationWorker, recalibrate,
};
pub use regression::{
    LinearFit, PolynomialFit, RegressionSample, SampleHistory, fit_best_monotonic,
    fit_best_monotonic_on, fit_linear, fit_polynomial,
};
pub use runner::{RunParams, RunSummary, SamplingMode, run};
pub use sampler::Sampler;
pub use state::{
    CompletedRun, CompletionReason, Countdown, ExecutionState, RunProgress, RunStatus,
};
pub use workout::{
    AutoAdjust, EarlyEnd, LeafStep, Lever, Metric, PaceTarget, PercentBand, Phase, StepDuration,
    StepEntry, StepKind, WorkoutDefinition,
};
