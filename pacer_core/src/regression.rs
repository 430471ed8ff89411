//! Least-squares fitting of calibration models from `(raw, reference)` pairs.
//!
//! - `fit_linear`: ordinary least squares, with R².
//! - `fit_polynomial`: normal equations on centered/scaled raw speeds,
//!   Gaussian elimination with partial pivoting, then mapped back.
//! - `fit_best_monotonic`: highest degree whose curve is non-decreasing over
//!   the observed speeds, degrading toward degree 1. `fit_best_monotonic_on`
//!   also requires it across the calibration domain before publishing.
//!
//! `SampleHistory` keeps the samples of the most recent runs.

use std::collections::VecDeque;

use crate::calibration::{PolynomialModel, SpeedDomain};
use crate::error::CalibrationError;

const PIVOT_EPS: f64 = 1e-12;
const SPREAD_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionSample {
    pub raw_speed: f64,
    pub reference_speed: f64,
    pub run_id: u64,
}

impl RegressionSample {
    fn is_usable(&self) -> bool {
        self.raw_speed.is_finite() && self.reference_speed.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub a: f64,
    pub b: f64,
    pub r_squared: f64,
    pub n: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolynomialFit {
    pub model: PolynomialModel,
    pub r_squared: f64,
    pub n: usize,
    /// Raw speed range covered by the samples.
    pub observed_min: f64,
    pub observed_max: f64,
}

fn usable_points(samples: &[RegressionSample]) -> Vec<(f64, f64)> {
    samples
        .iter()
        .filter(|s| s.is_usable())
        .map(|s| (s.raw_speed, s.reference_speed))
        .collect()
}

fn require(have: usize, need: usize) -> Result<(), CalibrationError> {
    if have < need {
        return Err(CalibrationError::InsufficientData { have, need });
    }
    Ok(())
}

fn observed_range(points: &[(f64, f64)]) -> (f64, f64) {
    points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(x, _)| {
            (lo.min(x), hi.max(x))
        })
}

fn r_squared(points: &[(f64, f64)], predict: impl Fn(f64) -> f64) -> f64 {
    let n = points.len() as f64;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let ss_tot: f64 = points.iter().map(|p| (p.1 - mean_y).powi(2)).sum();
    let ss_res: f64 = points.iter().map(|p| (p.1 - predict(p.0)).powi(2)).sum();
    if ss_tot <= f64::EPSILON {
        return if ss_res <= f64::EPSILON { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Ordinary least squares `reference = a·raw + b`.
pub fn fit_linear(
    samples: &[RegressionSample],
    min_samples: usize,
) -> Result<LinearFit, CalibrationError> {
    let points = usable_points(samples);
    require(points.len(), min_samples.max(2))?;

    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let (sxx, sxy) = points.iter().fold((0.0, 0.0), |(sxx, sxy), &(x, y)| {
        let dx = x - mean_x;
        (sxx + dx * dx, sxy + dx * (y - mean_y))
    });
    if sxx / n < SPREAD_EPS {
        return Err(CalibrationError::Degenerate("raw speeds have no spread"));
    }
    let a = sxy / sxx;
    let b = mean_y - a * mean_x;
    Ok(LinearFit {
        a,
        b,
        r_squared: r_squared(&points, |x| a * x + b),
        n: points.len(),
    })
}

/// Solve the `m`×`m` system `a·x = rhs` in place.
fn gaussian_solve(
    a: &mut [[f64; 4]; 4],
    rhs: &mut [f64; 4],
    m: usize,
) -> Result<[f64; 4], CalibrationError> {
    for col in 0..m {
        let pivot = (col..m)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < PIVOT_EPS {
            return Err(CalibrationError::Singular);
        }
        a.swap(col, pivot);
        rhs.swap(col, pivot);
        for row in col + 1..m {
            let f = a[row][col] / a[col][col];
            for k in col..m {
                a[row][k] -= f * a[col][k];
            }
            rhs[row] -= f * rhs[col];
        }
    }
    let mut x = [0.0; 4];
    for row in (0..m).rev() {
        let tail: f64 = (row + 1..m).map(|k| a[row][k] * x[k]).sum();
        x[row] = (rhs[row] - tail) / a[row][row];
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(CalibrationError::Singular);
    }
    Ok(x)
}

fn binomial(n: usize, k: usize) -> f64 {
    const TABLE: [[f64; 4]; 4] = [
        [1.0, 0.0, 0.0, 0.0],
        [1.0, 1.0, 0.0, 0.0],
        [1.0, 2.0, 1.0, 0.0],
        [1.0, 3.0, 3.0, 1.0],
    ];
    TABLE[n][k]
}

/// Least-squares polynomial of exactly `degree` (1..=3).
pub fn fit_polynomial(
    samples: &[RegressionSample],
    degree: u8,
    min_samples: usize,
) -> Result<PolynomialFit, CalibrationError> {
    if !(1..=3).contains(&degree) {
        return Err(CalibrationError::InvalidDegree(degree));
    }
    let m = usize::from(degree) + 1;
    let points = usable_points(samples);
    require(points.len(), min_samples.max(m))?;

    let (lo, hi) = observed_range(&points);
    let half_range = (hi - lo) / 2.0;
    if half_range < SPREAD_EPS {
        return Err(CalibrationError::Degenerate("raw speeds have no spread"));
    }
    let center = (hi + lo) / 2.0;

    // Normal equations in u = (x - center) / half_range, u ∈ [-1, 1].
    let mut ata = [[0.0; 4]; 4];
    let mut aty = [0.0; 4];
    for &(x, y) in &points {
        let u = (x - center) / half_range;
        let mut pows = [1.0; 7];
        for k in 1..pows.len() {
            pows[k] = pows[k - 1] * u;
        }
        for i in 0..m {
            for j in 0..m {
                ata[i][j] += pows[i + j];
            }
            aty[i] += y * pows[i];
        }
    }
    let beta = gaussian_solve(&mut ata, &mut aty, m)?;

    // Σ β_k ((x - c)/s)^k expanded into powers of x.
    let mut coefficients = [0.0; 4];
    for (k, &bk) in beta.iter().enumerate().take(m) {
        let scale = bk / half_range.powi(k as i32);
        for (j, coef) in coefficients.iter_mut().enumerate().take(k + 1) {
            *coef += scale * binomial(k, j) * (-center).powi((k - j) as i32);
        }
    }

    let model = PolynomialModel::new(coefficients, degree)?;
    Ok(PolynomialFit {
        model,
        r_squared: r_squared(&points, |x| model.eval(x)),
        n: points.len(),
        observed_min: lo,
        observed_max: hi,
    })
}

/// Fit at `max_degree`, stepping down while the curve is not non-decreasing
/// over the observed speeds. Degree 1 must have a positive slope.
pub fn fit_best_monotonic(
    samples: &[RegressionSample],
    max_degree: u8,
    min_samples: usize,
) -> Result<PolynomialFit, CalibrationError> {
    fit_monotonic_within(samples, max_degree, min_samples, None)
}

/// Like [`fit_best_monotonic`], but the curve must also be non-decreasing
/// across the whole calibration `domain`, where it will be inverted.
pub fn fit_best_monotonic_on(
    samples: &[RegressionSample],
    max_degree: u8,
    min_samples: usize,
    domain: SpeedDomain,
) -> Result<PolynomialFit, CalibrationError> {
    fit_monotonic_within(samples, max_degree, min_samples, Some(domain))
}

fn fit_monotonic_within(
    samples: &[RegressionSample],
    max_degree: u8,
    min_samples: usize,
    domain: Option<SpeedDomain>,
) -> Result<PolynomialFit, CalibrationError> {
    if !(1..=3).contains(&max_degree) {
        return Err(CalibrationError::InvalidDegree(max_degree));
    }
    require(usable_points(samples).len(), min_samples.max(2))?;

    for degree in (1..=max_degree).rev() {
        let fit = match fit_polynomial(samples, degree, min_samples) {
            Ok(fit) => fit,
            Err(CalibrationError::Singular | CalibrationError::InsufficientData { .. })
                if degree > 1 =>
            {
                tracing::warn!(degree, "polynomial fit failed; trying a lower degree");
                continue;
            }
            Err(e) => return Err(e),
        };
        if degree == 1 {
            let slope = fit.model.coefficients()[1];
            if slope.is_finite() && slope > 0.0 {
                return Ok(fit);
            }
            return Err(CalibrationError::NonMonotonicFit { degree: 1 });
        }
        let (lo, hi) = match domain {
            Some(d) => (fit.observed_min.min(d.min_kmh), fit.observed_max.max(d.max_kmh)),
            None => (fit.observed_min, fit.observed_max),
        };
        if fit.model.is_non_decreasing_on(lo, hi) {
            return Ok(fit);
        }
        tracing::warn!(
            degree,
            lo,
            hi,
            "fitted polynomial is not monotonic over the checked speeds; degrading"
        );
    }
    Err(CalibrationError::NonMonotonicFit { degree: 1 })
}

/// Samples of the most recent runs, oldest run trimmed first.
#[derive(Debug, Clone)]
pub struct SampleHistory {
    runs: VecDeque<(u64, Vec<RegressionSample>)>,
    max_runs: usize,
}

impl SampleHistory {
    pub fn new(max_runs: usize) -> Self {
        Self {
            runs: VecDeque::new(),
            max_runs: max_runs.max(1),
        }
    }

    /// Group `samples` by `run_id` in order of first appearance.
    pub fn from_samples(
        samples: impl IntoIterator<Item = RegressionSample>,
        max_runs: usize,
    ) -> Self {
        let mut h = Self::new(max_runs);
        for s in samples {
            h.push_run(s.run_id, vec![s]);
        }
        h
    }

    /// Add samples for `run_id`. A run already held is extended in place.
    pub fn push_run(&mut self, run_id: u64, samples: Vec<RegressionSample>) {
        if samples.is_empty() {
            return;
        }
        if let Some((_, existing)) = self.runs.iter_mut().find(|(id, _)| *id == run_id) {
            existing.extend(samples);
            return;
        }
        self.runs.push_back((run_id, samples));
        while self.runs.len() > self.max_runs {
            if let Some((dropped, _)) = self.runs.pop_front() {
                tracing::debug!(run_id = dropped, "trimmed calibration samples of old run");
            }
        }
    }

    pub fn samples(&self) -> Vec<RegressionSample> {
        self.runs.iter().flat_map(|(_, s)| s.iter().copied()).collect()
    }

    pub fn run_ids(&self) -> Vec<u64> {
        self.runs.iter().map(|(id, _)| *id).collect()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    pub fn len(&self) -> usize {
        self.runs.iter().map(|(_, s)| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
