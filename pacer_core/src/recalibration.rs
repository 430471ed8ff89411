//! Out-of-band recalibration after each completed run.
//!
//! The worker thread owns the sample history. Each submitted run is folded
//! in, the best monotonic polynomial is fitted, and the result replaces the
//! store's polynomial in one swap. Runs in progress keep whichever
//! calibration snapshot they already hold.

use crossbeam_channel as xch;

use crate::calibration::{CalibrationHandle, SpeedDomain};
use crate::config::RegressionCfg;
use crate::error::CalibrationError;
use crate::regression::{
    LinearFit, PolynomialFit, RegressionSample, SampleHistory, fit_best_monotonic_on, fit_linear,
};

/// Result of one regression pass over a sample history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationUpdate {
    pub polynomial: PolynomialFit,
    /// Informational; the linear model is only ever set by the user.
    pub linear: Option<LinearFit>,
}

/// Fit the polynomial (and, when possible, the linear) model from `history`.
/// The polynomial must be non-decreasing over `domain`.
pub fn recalibrate(
    history: &SampleHistory,
    cfg: &RegressionCfg,
    domain: SpeedDomain,
) -> Result<CalibrationUpdate, CalibrationError> {
    let samples = history.samples();
    let polynomial = fit_best_monotonic_on(&samples, cfg.max_degree, cfg.min_samples, domain)?;
    let linear = match fit_linear(&samples, cfg.min_samples) {
        Ok(fit) => Some(fit),
        Err(e) => {
            tracing::debug!(error = %e, "linear fit skipped");
            None
        }
    };
    Ok(CalibrationUpdate { polynomial, linear })
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecalibrationReport {
    Published {
        run_id: u64,
        degree: u8,
        r_squared: f64,
        samples: usize,
    },
    /// Previous calibration kept.
    InsufficientData { run_id: u64, have: usize, need: usize },
    /// Previous calibration kept.
    Failed { run_id: u64, error: CalibrationError },
}

type Submission = (u64, Vec<RegressionSample>);

pub struct RecalibrationWorker {
    tx: Option<xch::Sender<Submission>>,
    reports: xch::Receiver<RecalibrationReport>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl RecalibrationWorker {
    /// Start the worker with an empty history.
    pub fn spawn(store: CalibrationHandle, cfg: RegressionCfg) -> Self {
        let history = SampleHistory::new(cfg.max_runs);
        Self::spawn_with_history(store, cfg, history)
    }

    /// Start the worker seeded with samples from earlier runs.
    pub fn spawn_with_history(
        store: CalibrationHandle,
        cfg: RegressionCfg,
        mut history: SampleHistory,
    ) -> Self {
        let (tx, rx) = xch::unbounded::<Submission>();
        let (report_tx, reports) = xch::unbounded();

        let join_handle = std::thread::spawn(move || {
            for (run_id, samples) in rx {
                history.push_run(run_id, samples);
                let domain = store.snapshot().domain;
                let report = match recalibrate(&history, &cfg, domain) {
                    Ok(update) => {
                        store.publish_polynomial(update.polynomial.model);
                        RecalibrationReport::Published {
                            run_id,
                            degree: update.polynomial.model.degree(),
                            r_squared: update.polynomial.r_squared,
                            samples: update.polynomial.n,
                        }
                    }
                    Err(CalibrationError::InsufficientData { have, need }) => {
                        tracing::info!(run_id, have, need, "not enough data to recalibrate");
                        RecalibrationReport::InsufficientData { run_id, have, need }
                    }
                    Err(error) => {
                        tracing::warn!(run_id, %error, "recalibration failed; keeping previous model");
                        RecalibrationReport::Failed { run_id, error }
                    }
                };
                // Nobody listening is fine.
                let _ = report_tx.send(report);
            }
            tracing::trace!("recalibration worker exiting");
        });

        Self {
            tx: Some(tx),
            reports,
            join_handle: Some(join_handle),
        }
    }

    /// Queue a completed run's samples. Empty runs still trigger a refit
    /// so the caller always gets a report back.
    pub fn submit(&self, run_id: u64, samples: Vec<RegressionSample>) {
        if let Some(tx) = &self.tx
            && tx.send((run_id, samples)).is_err()
        {
            tracing::warn!(run_id, "recalibration worker is gone; samples dropped");
        }
    }

    pub fn reports(&self) -> &xch::Receiver<RecalibrationReport> {
        &self.reports
    }
}

impl Drop for RecalibrationWorker {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop after queued runs.
        self.tx.take();
        if let Some(handle) = self.join_handle.take()
            && let Err(e) = handle.join()
        {
            tracing::warn!(?e, "recalibration worker panicked");
        }
    }
}
