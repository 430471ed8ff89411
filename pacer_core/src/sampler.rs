//! Background telemetry sampling.
//!
//! Spawns a thread that owns the `Sensor`, pushes readings through a bounded
//! channel, and tracks the last-ok timestamp for stall detection. The thread
//! is shut down and joined when the `Sampler` is dropped.

use crossbeam_channel as xch;
use pacer_traits::clock::Clock;
use pacer_traits::{Reading, Sensor};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub struct Sampler<C: Clock> {
    rx: xch::Receiver<Reading>,
    last_ok: Arc<AtomicU64>,
    clock: C,
    epoch: Instant,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl<C: Clock + Clone + Send + 'static> Sampler<C> {
    /// Read `sensor` every `1/hz` seconds on a dedicated thread.
    pub fn spawn<S: Sensor + Send + 'static>(
        mut sensor: S,
        hz: u32,
        timeout: Duration,
        clock: C,
    ) -> Self {
        let (tx, rx) = xch::bounded(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let last_ok = Arc::new(AtomicU64::new(0));
        let last_ok_clone = last_ok.clone();
        let period = Duration::from_micros(crate::util::period_us(hz));
        let epoch = clock.now();
        let thread_clock = clock.clone();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("sampler thread received shutdown signal");
                    break;
                }

                match sensor.read(timeout) {
                    Ok(r) => {
                        let now = thread_clock.ms_since(epoch);
                        last_ok_clone.store(now, Ordering::Relaxed);
                        // Blocks while the previous reading is unconsumed; that
                        // keeps every distance delta.
                        if send_or_shutdown(&tx, r, &shutdown_clone) {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::trace!(error = %e, "sensor read failed; runner watchdogs stalls");
                    }
                }

                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                thread_clock.sleep(period);
            }
            tracing::trace!("sampler thread exiting cleanly");
        });

        Self {
            rx,
            last_ok,
            clock,
            epoch,
            shutdown,
            join_handle: Some(join_handle),
        }
    }
}

/// Returns `true` when the thread should exit.
fn send_or_shutdown(tx: &xch::Sender<Reading>, r: Reading, shutdown: &AtomicBool) -> bool {
    let mut pending = r;
    loop {
        match tx.send_timeout(pending, Duration::from_millis(50)) {
            Ok(()) => return false,
            Err(xch::SendTimeoutError::Timeout(back)) => {
                if shutdown.load(Ordering::Relaxed) {
                    return true;
                }
                pending = back;
            }
            Err(xch::SendTimeoutError::Disconnected(_)) => {
                tracing::debug!("sampler consumer disconnected, exiting thread");
                return true;
            }
        }
    }
}

impl<C: Clock> Sampler<C> {
    /// Drain pending readings. Distance deltas are summed; everything else
    /// comes from the newest reading.
    pub fn latest(&self) -> Option<Reading> {
        self.rx.try_iter().reduce(|acc, r| Reading {
            distance_delta_m: acc.distance_delta_m + r.distance_delta_m,
            ..r
        })
    }

    /// Milliseconds since the last successful read, as of `now_ms` since the epoch.
    pub fn stalled_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_ok.load(Ordering::Relaxed))
    }

    /// Stall measured against this sampler's own clock.
    pub fn stalled_for_now(&self) -> u64 {
        self.stalled_for(self.clock.ms_since(self.epoch))
    }
}

impl<C: Clock> Drop for Sampler<C> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // The thread exits between reads, after the current read returns
        // (bounded by the sensor timeout), or within one send poll.
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => {
                    tracing::trace!("sampler thread joined successfully");
                }
                Err(e) => {
                    tracing::warn!(?e, "sampler thread panicked during shutdown");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::ScriptedSensor;
    use pacer_traits::clock::MonotonicClock;

    fn reading(d: f64) -> Reading {
        Reading {
            raw_speed_kmh: 10.0,
            distance_delta_m: d,
            ..Reading::default()
        }
    }

    #[test]
    fn delivers_readings_and_sums_distance() {
        let sensor = ScriptedSensor::new([reading(1.0), reading(2.0), reading(3.0)]);
        let sampler = Sampler::spawn(sensor, 1000, Duration::from_millis(5), MonotonicClock::new());
        let mut total = 0.0;
        let deadline = Instant::now() + Duration::from_secs(2);
        while total < 6.0 && Instant::now() < deadline {
            if let Some(r) = sampler.latest() {
                total += r.distance_delta_m;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(total, 6.0);
    }

    #[test]
    fn drop_joins_thread_even_with_unread_reading() {
        let sensor = ScriptedSensor::steady(reading(1.0));
        let sampler = Sampler::spawn(sensor, 1000, Duration::from_millis(5), MonotonicClock::new());
        std::thread::sleep(Duration::from_millis(20));
        drop(sampler);
    }
}
