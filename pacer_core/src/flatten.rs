//! Expands a hierarchical workout into the flat, addressable step sequence
//! the engine runs.

use crate::workout::{
    AutoAdjust, EarlyEnd, LeafStep, PaceTarget, PercentBand, Phase, StepDuration, StepEntry,
    StepKind, WorkoutDefinition,
};

/// 1-based iteration of a repeated step, alongside the repeat count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatPosition {
    pub iteration: u32,
    pub total: u32,
}

/// One step of the flattened sequence. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionStep {
    /// `s{k}` for a plain step, `r{k}_c{c}` for child `c` of a repeat, where
    /// `k` is the top-level position. Shared by every iteration of a repeat.
    pub identity_key: String,
    pub index: usize,
    pub kind: StepKind,
    pub phase: Phase,
    pub duration: Option<StepDuration>,
    pub pace: Option<PaceTarget>,
    pub incline_pct: Option<f64>,
    pub hr_band: Option<PercentBand>,
    pub power_band: Option<PercentBand>,
    pub auto_adjust: Option<AutoAdjust>,
    pub early_end: Option<EarlyEnd>,
    pub repeat: Option<RepeatPosition>,
}

impl ExecutionStep {
    fn from_leaf(
        identity_key: String,
        index: usize,
        leaf: &LeafStep,
        repeat: Option<RepeatPosition>,
    ) -> Self {
        Self {
            identity_key,
            index,
            kind: leaf.kind,
            phase: leaf.kind.phase(),
            duration: leaf.duration,
            pace: leaf.pace,
            incline_pct: leaf.incline_pct,
            hr_band: leaf.hr_band,
            power_band: leaf.power_band,
            auto_adjust: leaf.auto_adjust,
            early_end: leaf.early_end,
            repeat,
        }
    }
}

/// Repeat counts `<= 0` run once.
#[inline]
pub fn effective_repeat_count(count: i64) -> u32 {
    if count <= 0 {
        1
    } else {
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}

/// Flatten `workout` into execution order.
///
/// Children are collected by position: every `RepeatChild` directly after a
/// `Repeat` marker belongs to it. A child with no repeat in front of it is
/// skipped.
pub fn flatten(workout: &WorkoutDefinition) -> Vec<ExecutionStep> {
    let entries = &workout.steps;
    let mut out = Vec::new();
    let mut top = 0usize;
    let mut i = 0usize;

    while i < entries.len() {
        match &entries[i] {
            StepEntry::Leaf(leaf) => {
                let key = format!("s{top}");
                out.push(ExecutionStep::from_leaf(key, out.len(), leaf, None));
                top += 1;
                i += 1;
            }
            StepEntry::Repeat { count } => {
                let children: Vec<&LeafStep> = entries[i + 1..]
                    .iter()
                    .map_while(|e| match e {
                        StepEntry::RepeatChild(leaf) => Some(leaf),
                        _ => None,
                    })
                    .collect();
                let total = effective_repeat_count(*count);
                for iteration in 1..=total {
                    for (c, child) in children.iter().enumerate() {
                        let key = format!("r{top}_c{c}");
                        let pos = RepeatPosition { iteration, total };
                        out.push(ExecutionStep::from_leaf(key, out.len(), child, Some(pos)));
                    }
                }
                top += 1;
                i += 1 + children.len();
            }
            StepEntry::RepeatChild(_) => {
                tracing::warn!(position = i, "repeat child without a repeat block; skipping");
                i += 1;
            }
        }
    }
    out
}

/// Number of steps `flatten` will emit for `workout`, without building them.
pub fn flattened_len(workout: &WorkoutDefinition) -> usize {
    let entries = &workout.steps;
    let mut total = 0usize;
    let mut i = 0usize;
    while i < entries.len() {
        match &entries[i] {
            StepEntry::Leaf(_) => {
                total += 1;
                i += 1;
            }
            StepEntry::Repeat { count } => {
                let children = entries[i + 1..]
                    .iter()
                    .take_while(|e| matches!(e, StepEntry::RepeatChild(_)))
                    .count();
                let reps = effective_repeat_count(*count) as usize;
                total = total.saturating_add(reps.saturating_mul(children));
                i += 1 + children;
            }
            StepEntry::RepeatChild(_) => i += 1,
        }
    }
    total
}
