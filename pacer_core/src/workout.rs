//! Hierarchical workout definition: the input to the flattener.
//!
//! A workout is an ordered list of entries. A `Repeat` marker is followed by
//! the `RepeatChild` leaves it repeats; any other leaf stands on its own.

/// What a leaf step is for. Determines its phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Warmup,
    Run,
    Recover,
    Rest,
    Cooldown,
}

impl StepKind {
    pub fn phase(self) -> Phase {
        match self {
            Self::Warmup => Phase::Warmup,
            Self::Cooldown => Phase::Cooldown,
            Self::Run | Self::Recover | Self::Rest => Phase::Main,
        }
    }
}

impl core::fmt::Display for StepKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.pad(match self {
            Self::Warmup => "warmup",
            Self::Run => "run",
            Self::Recover => "recover",
            Self::Rest => "rest",
            Self::Cooldown => "cooldown",
        })
    }
}

/// Coefficient state never survives a change of phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Warmup,
    Main,
    Cooldown,
}

impl core::fmt::Display for Phase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.pad(match self {
            Self::Warmup => "warmup",
            Self::Main => "main",
            Self::Cooldown => "cooldown",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepDuration {
    Time { ms: u64 },
    Distance { m: f64 },
}

/// Planned pace in adjusted km/h. `end_kmh` turns the step into a progression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaceTarget {
    pub start_kmh: f64,
    pub end_kmh: Option<f64>,
}

/// Target band as a percentage of the athlete's threshold value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentBand {
    pub min_pct: f64,
    pub max_pct: f64,
}

impl PercentBand {
    pub fn new(min_pct: f64, max_pct: f64) -> Self {
        Self { min_pct, max_pct }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    HeartRate,
    Power,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lever {
    Speed,
    Incline,
}

/// Which live metric steers which target. A step adjusts one lever only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoAdjust {
    pub metric: Metric,
    pub lever: Lever,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EarlyEnd {
    /// Only an explicit `next()` ends the step.
    Open,
    /// Ends once heart rate stays in `[min_bpm, max_bpm]` for the hold time.
    /// `hold_ms = None` uses the engine default.
    HeartRateRange {
        min_bpm: f64,
        max_bpm: f64,
        hold_ms: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeafStep {
    pub kind: StepKind,
    pub duration: Option<StepDuration>,
    pub pace: Option<PaceTarget>,
    pub incline_pct: Option<f64>,
    pub hr_band: Option<PercentBand>,
    pub power_band: Option<PercentBand>,
    pub auto_adjust: Option<AutoAdjust>,
    pub early_end: Option<EarlyEnd>,
}

impl LeafStep {
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            duration: None,
            pace: None,
            incline_pct: None,
            hr_band: None,
            power_band: None,
            auto_adjust: None,
            early_end: None,
        }
    }

    pub fn for_secs(mut self, secs: u64) -> Self {
        self.duration = Some(StepDuration::Time {
            ms: secs.saturating_mul(1000),
        });
        self
    }

    pub fn for_ms(mut self, ms: u64) -> Self {
        self.duration = Some(StepDuration::Time { ms });
        self
    }

    pub fn for_meters(mut self, m: f64) -> Self {
        self.duration = Some(StepDuration::Distance { m });
        self
    }

    pub fn at_pace(mut self, kmh: f64) -> Self {
        self.pace = Some(PaceTarget {
            start_kmh: kmh,
            end_kmh: None,
        });
        self
    }

    pub fn progressing(mut self, start_kmh: f64, end_kmh: f64) -> Self {
        self.pace = Some(PaceTarget {
            start_kmh,
            end_kmh: Some(end_kmh),
        });
        self
    }

    pub fn at_incline(mut self, pct: f64) -> Self {
        self.incline_pct = Some(pct);
        self
    }

    pub fn with_hr_band(mut self, min_pct: f64, max_pct: f64) -> Self {
        self.hr_band = Some(PercentBand::new(min_pct, max_pct));
        self
    }

    pub fn with_power_band(mut self, min_pct: f64, max_pct: f64) -> Self {
        self.power_band = Some(PercentBand::new(min_pct, max_pct));
        self
    }

    pub fn auto_adjust(mut self, metric: Metric, lever: Lever) -> Self {
        self.auto_adjust = Some(AutoAdjust { metric, lever });
        self
    }

    pub fn ending(mut self, early_end: EarlyEnd) -> Self {
        self.early_end = Some(early_end);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepEntry {
    Leaf(LeafStep),
    /// Marker for the contiguous `RepeatChild` entries that follow it.
    Repeat { count: i64 },
    RepeatChild(LeafStep),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkoutDefinition {
    pub name: String,
    pub steps: Vec<StepEntry>,
}

impl WorkoutDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, leaf: LeafStep) -> Self {
        self.steps.push(StepEntry::Leaf(leaf));
        self
    }

    pub fn repeat(mut self, count: i64, children: impl IntoIterator<Item = LeafStep>) -> Self {
        self.steps.push(StepEntry::Repeat { count });
        self.steps
            .extend(children.into_iter().map(StepEntry::RepeatChild));
        self
    }
}
