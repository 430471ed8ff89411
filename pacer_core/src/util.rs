//! Common time/period and rounding helpers for pacer_core.

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;
/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Compute the period in microseconds for a given tick rate in Hz.
/// - Clamps `hz` to at least 1 to avoid division by zero.
/// - Ensures result is at least 1 microsecond.
#[inline]
pub fn period_us(hz: u32) -> u64 {
    (MICROS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Compute the period in milliseconds for a given tick rate in Hz.
/// - Clamps `hz` to at least 1 to avoid division by zero.
/// - Ensures result is at least 1 millisecond.
#[inline]
pub fn period_ms(hz: u32) -> u64 {
    (MILLIS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Seconds (as written in workout files) to whole milliseconds.
///
/// Non-finite and negative inputs map to 0, which the engine rejects as a
/// non-positive duration when a run starts.
#[inline]
pub fn secs_to_ms(secs: f64) -> u64 {
    if !secs.is_finite() || secs <= 0.0 {
        return 0;
    }
    let ms = (secs * 1000.0).round();
    if ms >= u64::MAX as f64 {
        u64::MAX
    } else {
        ms as u64
    }
}

/// Round `value` to the nearest multiple of `resolution`.
///
/// Divides by the reciprocal so a 0.1 resolution yields exact tenths
/// (11.0 rather than 11.000000000000002).
#[inline]
pub fn round_to_resolution(value: f64, resolution: f64) -> f64 {
    if !(resolution.is_finite() && resolution > 0.0) {
        return value;
    }
    let inv = 1.0 / resolution;
    (value * inv).round() / inv
}

/// Whole seconds remaining, rounded up, for countdown display.
#[inline]
pub fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(MILLIS_PER_SEC)
}
