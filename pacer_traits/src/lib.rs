//! Device seams for the pacer stack.
//!
//! Everything here speaks the device's own (raw, uncalibrated) units. The
//! engine never talks to a device directly; the runner and the command path
//! in `pacer_core` sit between the two.
pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

pub type DeviceResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// One decoded sample from the device and any attached physiological sensors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reading {
    /// Speed as reported by the device, km/h.
    pub raw_speed_kmh: f64,
    /// Incline as reported by the device, percent.
    pub raw_incline_pct: f64,
    /// Distance covered since the previous reading, meters.
    pub distance_delta_m: f64,
    pub heart_rate_bpm: Option<f64>,
    pub power_w: Option<f64>,
    /// Independent speed reference (foot pod, GPS), km/h.
    pub reference_speed_kmh: Option<f64>,
}

/// Source of readings. `read` blocks for at most `timeout`.
pub trait Sensor {
    fn read(&mut self, timeout: std::time::Duration) -> DeviceResult<Reading>;
}

/// Command sink for a motorized belt. Speeds are raw device units.
pub trait Treadmill {
    fn set_speed(&mut self, raw_kmh: f64) -> DeviceResult<()>;
    fn set_incline(&mut self, pct: f64) -> DeviceResult<()>;
    fn stop(&mut self) -> DeviceResult<()>;
}
