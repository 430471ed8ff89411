//! Engine event stream.
//!
//! Subscribers get an unbounded crossbeam receiver. Senders whose receiver
//! was dropped are pruned on the next emit.

use crossbeam_channel as xch;

use crate::adjust::Direction;
use crate::state::CompletionReason;
use crate::workout::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEndReason {
    /// Time or distance target reached.
    Completed,
    /// HR stayed in the early-end band for the hold time.
    EarlyEnd,
    Next,
    Previous,
    Reset,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StepStarted {
        index: usize,
        identity_key: String,
        phase: Phase,
    },
    StepEnded {
        index: usize,
        identity_key: String,
        reason: StepEndReason,
        elapsed_ms: u64,
        distance_m: f64,
    },
    SpeedAdjusted {
        coefficient: f64,
        direction: Direction,
    },
    InclineAdjusted {
        coefficient: f64,
        direction: Direction,
    },
    CountdownTick {
        index: usize,
        remaining_s: u64,
    },
    WorkoutCompleted {
        reason: CompletionReason,
        total_elapsed_ms: u64,
        total_distance_m: f64,
    },
}

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<xch::Sender<EngineEvent>>,
}

impl EventBus {
    pub fn subscribe(&mut self) -> xch::Receiver<EngineEvent> {
        let (tx, rx) = xch::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn emit(&mut self, event: EngineEvent) {
        if self.subscribers.is_empty() {
            return;
        }
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
