//! Simulated treadmill and athlete.
//!
//! A [`SimulatedRig`] owns one shared belt/athlete state and hands out a
//! [`SimTreadmill`] command sink and a [`SimSensor`] reading source for it.
//! Time is taken from the injected clock, so a `ManualClock` run is fully
//! deterministic.
pub mod error;
pub mod sim;

pub use error::DeviceError;
pub use sim::{SimConfig, SimState};

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use pacer_traits::clock::Clock;
use pacer_traits::{DeviceResult, Reading, Sensor, Treadmill};

use crate::sim::Jitter;

#[derive(Debug)]
struct Shared {
    cfg: SimConfig,
    state: SimState,
    jitter: Jitter,
    last: Option<Instant>,
    pending_distance_m: f64,
    reads: u64,
}

impl Shared {
    /// Advance the simulation to `now`, accumulating covered distance.
    fn sync(&mut self, now: Instant) {
        if let Some(last) = self.last {
            let dt_s = now.saturating_duration_since(last).as_secs_f64();
            self.pending_distance_m += self.state.advance(&self.cfg, dt_s);
        }
        self.last = Some(now);
    }
}

fn lock(shared: &Mutex<Shared>) -> Result<MutexGuard<'_, Shared>, DeviceError> {
    shared.lock().map_err(|_| DeviceError::Disconnected)
}

/// One belt plus one runner on it.
#[derive(Debug, Clone)]
pub struct SimulatedRig<C: Clock + Clone> {
    shared: Arc<Mutex<Shared>>,
    clock: C,
}

impl<C: Clock + Clone> SimulatedRig<C> {
    pub fn new(cfg: SimConfig, clock: C) -> Self {
        let state = SimState::at_rest(&cfg);
        let jitter = Jitter::new(cfg.seed);
        Self {
            shared: Arc::new(Mutex::new(Shared {
                cfg,
                state,
                jitter,
                last: None,
                pending_distance_m: 0.0,
                reads: 0,
            })),
            clock,
        }
    }

    pub fn treadmill(&self) -> SimTreadmill<C> {
        SimTreadmill {
            shared: Arc::clone(&self.shared),
            clock: self.clock.clone(),
        }
    }

    pub fn sensor(&self) -> SimSensor<C> {
        SimSensor {
            shared: Arc::clone(&self.shared),
            clock: self.clock.clone(),
        }
    }

    /// Current state, advanced to the clock's now.
    pub fn snapshot(&self) -> error::Result<SimState> {
        let mut s = lock(&self.shared)?;
        s.sync(self.clock.now());
        Ok(s.state)
    }

    pub fn config(&self) -> error::Result<SimConfig> {
        Ok(lock(&self.shared)?.cfg.clone())
    }
}

/// Command side of the rig. Speeds are raw device km/h.
#[derive(Debug)]
pub struct SimTreadmill<C: Clock + Clone> {
    shared: Arc<Mutex<Shared>>,
    clock: C,
}

impl<C: Clock + Clone> Treadmill for SimTreadmill<C> {
    fn set_speed(&mut self, raw_kmh: f64) -> DeviceResult<()> {
        let mut s = lock(&self.shared)?;
        if !raw_kmh.is_finite() || raw_kmh < 0.0 || raw_kmh > s.cfg.max_speed_kmh {
            return Err(Box::new(DeviceError::Rejected(format!(
                "speed {raw_kmh} outside 0..={}",
                s.cfg.max_speed_kmh
            ))));
        }
        s.sync(self.clock.now());
        s.state.commanded_speed_kmh = raw_kmh;
        s.state.stopped = false;
        tracing::debug!(raw_kmh, "sim belt speed");
        Ok(())
    }

    fn set_incline(&mut self, pct: f64) -> DeviceResult<()> {
        let mut s = lock(&self.shared)?;
        if !pct.is_finite() || pct < 0.0 || pct > s.cfg.max_incline_pct {
            return Err(Box::new(DeviceError::Rejected(format!(
                "incline {pct} outside 0..={}",
                s.cfg.max_incline_pct
            ))));
        }
        s.sync(self.clock.now());
        s.state.commanded_incline_pct = pct;
        tracing::debug!(pct, "sim incline");
        Ok(())
    }

    fn stop(&mut self) -> DeviceResult<()> {
        let mut s = lock(&self.shared)?;
        s.sync(self.clock.now());
        s.state.commanded_speed_kmh = 0.0;
        s.state.commanded_incline_pct = 0.0;
        s.state.stopped = true;
        tracing::debug!("sim belt stop");
        Ok(())
    }
}

/// Reading side of the rig: belt telemetry plus the runner's heart rate,
/// power and an optional reference speed.
#[derive(Debug)]
pub struct SimSensor<C: Clock + Clone> {
    shared: Arc<Mutex<Shared>>,
    clock: C,
}

impl<C: Clock + Clone> Sensor for SimSensor<C> {
    fn read(&mut self, _timeout: std::time::Duration) -> DeviceResult<Reading> {
        let mut s = lock(&self.shared)?;
        if s.cfg.fail_after.is_some_and(|n| s.reads >= n) {
            return Err(Box::new(DeviceError::Disconnected));
        }
        s.reads += 1;
        s.sync(self.clock.now());

        let distance = std::mem::take(&mut s.pending_distance_m);
        let true_kmh = s.state.true_speed_kmh(&s.cfg);
        let reference = if s.cfg.reference && true_kmh > 0.0 {
            let half = s.cfg.reference_jitter_kmh;
            Some((true_kmh + s.jitter.symmetric(half)).max(0.0))
        } else {
            None
        };
        let reading = Reading {
            raw_speed_kmh: s.state.belt_speed_kmh,
            raw_incline_pct: s.state.incline_pct,
            distance_delta_m: distance,
            heart_rate_bpm: Some(s.state.heart_rate_bpm),
            power_w: Some(s.state.power_w(&s.cfg)),
            reference_speed_kmh: reference,
        };
        tracing::trace!(
            raw_speed = reading.raw_speed_kmh,
            hr = s.state.heart_rate_bpm,
            "sim reading"
        );
        Ok(reading)
    }
}
