//! Run state machine types.

use crate::adjust::CoefficientSet;

/// HR-range hold in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    pub hold_ms: u64,
    pub remaining_ms: u64,
}

/// Progress of a run that has started and not completed.
#[derive(Debug, Clone, PartialEq)]
pub struct RunProgress {
    pub step_index: usize,
    pub step_elapsed_ms: u64,
    pub step_distance_m: f64,
    pub total_elapsed_ms: u64,
    pub total_distance_m: f64,
    pub coefficients: CoefficientSet,
    pub countdown: Option<Countdown>,
    pub steps_completed: usize,
}

impl RunProgress {
    pub(crate) fn new() -> Self {
        Self {
            step_index: 0,
            step_elapsed_ms: 0,
            step_distance_m: 0.0,
            total_elapsed_ms: 0,
            total_distance_m: 0.0,
            coefficients: CoefficientSet::NEUTRAL,
            countdown: None,
            steps_completed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// The last step ended, or `complete()` was called.
    Finished,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRun {
    pub reason: CompletionReason,
    pub total_elapsed_ms: u64,
    pub total_distance_m: f64,
    pub steps_completed: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ExecutionState {
    #[default]
    Idle,
    Running(RunProgress),
    Paused(RunProgress),
    Completed(CompletedRun),
}

impl ExecutionState {
    pub fn progress(&self) -> Option<&RunProgress> {
        match self {
            Self::Running(p) | Self::Paused(p) => Some(p),
            Self::Idle | Self::Completed(_) => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running(_))
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running(_) | Self::Paused(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running(_) => "running",
            Self::Paused(_) => "paused",
            Self::Completed(_) => "completed",
        }
    }
}

/// Coarse state reported with every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Paused,
    Completed(CompletionReason),
}
