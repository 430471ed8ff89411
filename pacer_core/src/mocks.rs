//! Test and helper doubles for pacer_core.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pacer_traits::{DeviceResult, Reading, Sensor, Treadmill};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TreadmillCommand {
    Speed(f64),
    Incline(f64),
    Stop,
}

/// Treadmill that records every command; optionally fails all of them.
#[derive(Debug, Clone, Default)]
pub struct RecordingTreadmill {
    log: Arc<Mutex<Vec<TreadmillCommand>>>,
    fail_with: Option<String>,
}

impl RecordingTreadmill {
    pub fn failing(msg: &str) -> Self {
        Self {
            log: Arc::default(),
            fail_with: Some(msg.to_owned()),
        }
    }

    /// Shared handle to the command log (stays valid after the treadmill moves).
    pub fn log(&self) -> Arc<Mutex<Vec<TreadmillCommand>>> {
        Arc::clone(&self.log)
    }

    fn record(&self, cmd: TreadmillCommand) -> DeviceResult<()> {
        if let Some(msg) = &self.fail_with {
            return Err(Box::new(std::io::Error::other(msg.clone())));
        }
        if let Ok(mut log) = self.log.lock() {
            log.push(cmd);
        }
        Ok(())
    }
}

impl Treadmill for RecordingTreadmill {
    fn set_speed(&mut self, raw_kmh: f64) -> DeviceResult<()> {
        self.record(TreadmillCommand::Speed(raw_kmh))
    }

    fn set_incline(&mut self, pct: f64) -> DeviceResult<()> {
        self.record(TreadmillCommand::Incline(pct))
    }

    fn stop(&mut self) -> DeviceResult<()> {
        self.record(TreadmillCommand::Stop)
    }
}

/// Sensor that plays back a fixed script, then times out forever.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSensor {
    readings: VecDeque<Reading>,
    repeat_last: bool,
    last: Option<Reading>,
}

impl ScriptedSensor {
    pub fn new(readings: impl IntoIterator<Item = Reading>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
            repeat_last: false,
            last: None,
        }
    }

    /// Keep returning the same reading.
    pub fn steady(reading: Reading) -> Self {
        Self {
            readings: VecDeque::from([reading]),
            repeat_last: true,
            last: None,
        }
    }
}

impl Sensor for ScriptedSensor {
    fn read(&mut self, _timeout: Duration) -> DeviceResult<Reading> {
        if let Some(r) = self.readings.pop_front() {
            self.last = Some(r);
            return Ok(r);
        }
        match self.last {
            Some(r) if self.repeat_last => Ok(r),
            _ => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "scripted sensor timeout",
            ))),
        }
    }
}
