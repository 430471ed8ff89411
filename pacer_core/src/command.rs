//! Device command path: pushes engine targets to a `Treadmill`.
//!
//! Targets carry the raw speed already produced by `adjusted_to_raw`; this
//! is the only speed that ever reaches the device.

use pacer_traits::Treadmill;

use crate::device_error::map_device_error;
use crate::engine::TargetCommand;
use crate::error::Result;

/// Differences below this are treated as "same command".
const COMMAND_EPS: f64 = 0.01;

pub struct DeviceCommander<T: Treadmill> {
    treadmill: T,
    last_speed: Option<f64>,
    last_incline: Option<f64>,
}

impl<T: Treadmill> DeviceCommander<T> {
    pub fn new(treadmill: T) -> Self {
        Self {
            treadmill,
            last_speed: None,
            last_incline: None,
        }
    }

    /// Send `target` to the device, skipping values that did not change.
    /// Returns whether anything was sent.
    pub fn apply(&mut self, target: &TargetCommand) -> Result<bool> {
        let mut sent = false;
        if changed(self.last_speed, target.raw_speed) {
            self.treadmill
                .set_speed(target.raw_speed)
                .map_err(|e| eyre::Report::new(map_device_error(e.as_ref())))?;
            tracing::debug!(
                raw_speed = target.raw_speed,
                adjusted_speed = target.adjusted_speed,
                "speed command"
            );
            self.last_speed = Some(target.raw_speed);
            sent = true;
        }
        if changed(self.last_incline, target.incline) {
            self.treadmill
                .set_incline(target.incline)
                .map_err(|e| eyre::Report::new(map_device_error(e.as_ref())))?;
            tracing::debug!(incline = target.incline, "incline command");
            self.last_incline = Some(target.incline);
            sent = true;
        }
        Ok(sent)
    }

    /// Halt the belt. The next `apply` re-sends everything.
    pub fn stop(&mut self) -> Result<()> {
        self.last_speed = None;
        self.last_incline = None;
        self.treadmill
            .stop()
            .map_err(|e| eyre::Report::new(map_device_error(e.as_ref())))
    }

    pub fn treadmill(&self) -> &T {
        &self.treadmill
    }

    pub fn into_inner(self) -> T {
        self.treadmill
    }
}

fn changed(last: Option<f64>, next: f64) -> bool {
    last.is_none_or(|prev| (prev - next).abs() >= COMMAND_EPS)
}
