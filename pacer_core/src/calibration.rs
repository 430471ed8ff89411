//! Raw ↔ adjusted speed calibration.
//!
//! Two models are held side by side: a user-set linear model and an
//! auto-fitted polynomial (degree 1..=3). Only the active one converts.
//! Inverting a polynomial of degree ≥ 2 brackets a root inside the speed
//! domain and polishes it with bisection-guarded Newton steps, falling back
//! to a clamped linear approximation.
//!
//! The live calibration sits behind a [`CalibrationStore`]: readers take a
//! snapshot `Arc`, writers swap in a complete replacement.

use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{CalibrationCfg, CalibrationMode};
use crate::error::CalibrationError;

/// Derivative magnitude below which Newton steps are not attempted.
const DERIVATIVE_EPS: f64 = 1e-9;
/// Slack for "non-decreasing" checks on fitted curves.
const MONOTONIC_EPS: f64 = 1e-9;
/// Segments scanned for a sign change before root polishing.
const BRACKET_SEGMENTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearModel {
    pub a: f64,
    pub b: f64,
}

impl Default for LinearModel {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl LinearModel {
    pub const IDENTITY: Self = Self { a: 1.0, b: 0.0 };

    pub fn new(a: f64, b: f64) -> Result<Self, CalibrationError> {
        if !(a.is_finite() && a > 0.0) {
            return Err(CalibrationError::Degenerate("linear slope must be > 0"));
        }
        if !b.is_finite() {
            return Err(CalibrationError::Degenerate("linear offset must be finite"));
        }
        Ok(Self { a, b })
    }

    #[inline]
    pub fn raw_to_adjusted(&self, raw: f64) -> f64 {
        self.a * raw + self.b
    }

    #[inline]
    pub fn adjusted_to_raw(&self, adjusted: f64) -> f64 {
        if self.a.abs() < DERIVATIVE_EPS {
            return adjusted;
        }
        (adjusted - self.b) / self.a
    }
}

/// `adjusted = c0 + c1·x + c2·x² + c3·x³`. Coefficients above `degree` are zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolynomialModel {
    coefficients: [f64; 4],
    degree: u8,
}

impl Default for PolynomialModel {
    fn default() -> Self {
        Self::identity()
    }
}

/// Result of an adjusted → raw inversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Inversion {
    pub raw: f64,
    /// `false` when the value came from the clamped linear fallback.
    pub converged: bool,
    pub iterations: u32,
}

impl PolynomialModel {
    pub fn identity() -> Self {
        Self {
            coefficients: [0.0, 1.0, 0.0, 0.0],
            degree: 1,
        }
    }

    pub fn new(coefficients: [f64; 4], degree: u8) -> Result<Self, CalibrationError> {
        if !(1..=3).contains(&degree) {
            return Err(CalibrationError::InvalidDegree(degree));
        }
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(CalibrationError::Degenerate("coefficients must be finite"));
        }
        let mut c = coefficients;
        for v in c.iter_mut().skip(usize::from(degree) + 1) {
            *v = 0.0;
        }
        Ok(Self {
            coefficients: c,
            degree,
        })
    }

    /// Build from a persisted slice of 1..=4 values (missing terms are zero).
    pub fn from_slice(values: &[f64], degree: u8) -> Result<Self, CalibrationError> {
        if values.is_empty() || values.len() > 4 {
            return Err(CalibrationError::Degenerate(
                "polynomial needs 1 to 4 coefficients",
            ));
        }
        let mut c = [0.0; 4];
        c[..values.len()].copy_from_slice(values);
        Self::new(c, degree)
    }

    pub fn coefficients(&self) -> [f64; 4] {
        self.coefficients
    }

    pub fn degree(&self) -> u8 {
        self.degree
    }

    /// Horner evaluation.
    #[inline]
    pub fn eval(&self, x: f64) -> f64 {
        let [c0, c1, c2, c3] = self.coefficients;
        ((c3 * x + c2) * x + c1) * x + c0
    }

    #[inline]
    pub fn derivative(&self, x: f64) -> f64 {
        let [_, c1, c2, c3] = self.coefficients;
        (3.0 * c3 * x + 2.0 * c2) * x + c1
    }

    /// Whether the curve is non-decreasing on `[lo, hi]`.
    ///
    /// f' is a quadratic, so its minimum over the interval is at an endpoint
    /// or at the vertex `-c2 / (3·c3)`.
    pub fn is_non_decreasing_on(&self, lo: f64, hi: f64) -> bool {
        let [_, _, c2, c3] = self.coefficients;
        let mut min_d = self.derivative(lo).min(self.derivative(hi));
        if c3 != 0.0 {
            let vertex = -c2 / (3.0 * c3);
            if vertex > lo && vertex < hi {
                min_d = min_d.min(self.derivative(vertex));
            }
        }
        min_d >= -MONOTONIC_EPS
    }

    /// Solve `eval(raw) = adjusted` for `raw` inside `domain`.
    ///
    /// Degree 1 is closed-form. Higher degrees first scan the domain for a
    /// sign change, preferring a rising crossing closest to the secant seed,
    /// then polish it with Newton steps that bisect whenever a step would
    /// leave the bracket. A root outside the domain, a missing bracket or
    /// the iteration cap all end in the clamped linear fallback.
    pub fn invert(
        &self,
        adjusted: f64,
        domain: SpeedDomain,
        max_iterations: u32,
        tolerance: f64,
    ) -> Inversion {
        let [c0, c1, _, _] = self.coefficients;
        if !adjusted.is_finite() {
            return self.fallback(adjusted, domain, 0);
        }
        if self.degree == 1 {
            let raw = (adjusted - c0) / c1;
            if c1.abs() >= DERIVATIVE_EPS && domain.contains(raw) {
                return Inversion {
                    raw,
                    converged: true,
                    iterations: 0,
                };
            }
            return self.fallback(adjusted, domain, 0);
        }

        let seed = self.secant_seed(adjusted, domain);
        let Some((mut a, mut b)) = self.bracket(adjusted, domain, seed) else {
            return self.fallback(adjusted, domain, 0);
        };
        let residual = |x: f64| self.eval(x) - adjusted;
        let (fa, fb) = (residual(a), residual(b));
        if fa.abs() <= tolerance {
            return Inversion {
                raw: a,
                converged: true,
                iterations: 0,
            };
        }
        if fb.abs() <= tolerance {
            return Inversion {
                raw: b,
                converged: true,
                iterations: 0,
            };
        }
        let rising = fb > fa;

        let mut x = if seed > a && seed < b {
            seed
        } else {
            0.5 * (a + b)
        };
        for i in 0..max_iterations {
            let fx = residual(x);
            if fx.abs() <= tolerance {
                return Inversion {
                    raw: x,
                    converged: true,
                    iterations: i,
                };
            }
            if (fx < 0.0) == rising {
                a = x;
            } else {
                b = x;
            }
            let d = self.derivative(x);
            let step = x - fx / d;
            x = if d.is_finite() && d.abs() >= DERIVATIVE_EPS && step > a && step < b {
                step
            } else {
                0.5 * (a + b)
            };
        }

        if residual(x).abs() <= tolerance {
            return Inversion {
                raw: x,
                converged: true,
                iterations: max_iterations,
            };
        }
        self.fallback(adjusted, domain, max_iterations)
    }

    /// Where the straight line through the domain end points hits `adjusted`.
    fn secant_seed(&self, adjusted: f64, domain: SpeedDomain) -> f64 {
        let (lo, hi) = (domain.min_kmh, domain.max_kmh);
        let (y_lo, y_hi) = (self.eval(lo), self.eval(hi));
        if y_hi > y_lo {
            domain.clamp(lo + (adjusted - y_lo) / (y_hi - y_lo) * (hi - lo))
        } else {
            0.5 * (lo + hi)
        }
    }

    /// Domain segment containing a root of `eval(x) - adjusted`.
    fn bracket(&self, adjusted: f64, domain: SpeedDomain, seed: f64) -> Option<(f64, f64)> {
        let (lo, hi) = (domain.min_kmh, domain.max_kmh);
        if lo.is_nan() || hi.is_nan() || hi <= lo {
            return None;
        }
        let width = (hi - lo) / BRACKET_SEGMENTS as f64;
        (0..BRACKET_SEGMENTS)
            .map(|k| {
                let a = lo + width * k as f64;
                let b = if k + 1 == BRACKET_SEGMENTS { hi } else { a + width };
                (a, b, self.eval(a) - adjusted, self.eval(b) - adjusted)
            })
            .filter(|&(_, _, fa, fb)| fa.is_finite() && fb.is_finite() && fa * fb <= 0.0)
            .min_by(|l, r| {
                let falling = |s: &(f64, f64, f64, f64)| s.3 < s.2;
                let distance = |s: &(f64, f64, f64, f64)| (0.5 * (s.0 + s.1) - seed).abs();
                falling(l)
                    .cmp(&falling(r))
                    .then_with(|| distance(l).total_cmp(&distance(r)))
            })
            .map(|(a, b, _, _)| (a, b))
    }

    /// Linear approximation through the nearest usable slope, clamped to the domain.
    fn fallback(&self, adjusted: f64, domain: SpeedDomain, iterations: u32) -> Inversion {
        let (lo, hi) = (domain.min_kmh, domain.max_kmh);
        let (y_lo, y_hi) = (self.eval(lo), self.eval(hi));
        let secant = if hi > lo { (y_hi - y_lo) / (hi - lo) } else { 0.0 };

        let usable = |s: f64| s.is_finite() && s > DERIVATIVE_EPS;
        let raw = if adjusted <= y_lo {
            let s = Some(self.derivative(lo))
                .filter(|s| usable(*s))
                .or_else(|| Some(secant).filter(|s| usable(*s)));
            s.map_or(lo, |s| lo + (adjusted - y_lo) / s)
        } else if adjusted >= y_hi {
            let s = Some(self.derivative(hi))
                .filter(|s| usable(*s))
                .or_else(|| Some(secant).filter(|s| usable(*s)));
            s.map_or(hi, |s| hi + (adjusted - y_hi) / s)
        } else if usable(secant) {
            lo + (adjusted - y_lo) / secant
        } else {
            adjusted
        };

        let raw = domain.clamp(raw);
        tracing::warn!(
            adjusted,
            raw,
            iterations,
            degree = self.degree,
            "calibration inversion did not converge; using clamped linear approximation"
        );
        Inversion {
            raw,
            converged: false,
            iterations,
        }
    }
}

/// Raw speed range the calibration is trusted on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedDomain {
    pub min_kmh: f64,
    pub max_kmh: f64,
}

impl Default for SpeedDomain {
    fn default() -> Self {
        Self {
            min_kmh: 0.0,
            max_kmh: 25.0,
        }
    }
}

impl SpeedDomain {
    #[inline]
    pub fn contains(&self, v: f64) -> bool {
        v >= self.min_kmh && v <= self.max_kmh
    }

    #[inline]
    pub fn clamp(&self, v: f64) -> f64 {
        if v.is_nan() {
            return self.min_kmh;
        }
        v.clamp(self.min_kmh, self.max_kmh)
    }
}

/// The model currently used for conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationModel {
    Linear(LinearModel),
    Polynomial(PolynomialModel),
}

/// Both models plus the switch between them.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub mode: CalibrationMode,
    pub linear: LinearModel,
    pub polynomial: PolynomialModel,
    pub domain: SpeedDomain,
    pub newton_max_iterations: u32,
    pub newton_tolerance: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self::from_cfg(&CalibrationCfg::default())
    }
}

impl Calibration {
    /// Identity models with the given mode, domain and root-finding bounds.
    pub fn from_cfg(cfg: &CalibrationCfg) -> Self {
        Self {
            mode: cfg.mode,
            linear: LinearModel::IDENTITY,
            polynomial: PolynomialModel::identity(),
            domain: SpeedDomain {
                min_kmh: cfg.domain_min_kmh,
                max_kmh: cfg.domain_max_kmh,
            },
            newton_max_iterations: cfg.newton_max_iterations,
            newton_tolerance: cfg.newton_tolerance,
        }
    }

    pub fn active(&self) -> CalibrationModel {
        match self.mode {
            CalibrationMode::Linear => CalibrationModel::Linear(self.linear),
            CalibrationMode::Polynomial => CalibrationModel::Polynomial(self.polynomial),
        }
    }

    pub fn raw_to_adjusted(&self, raw: f64) -> f64 {
        match self.mode {
            CalibrationMode::Linear => self.linear.raw_to_adjusted(raw),
            CalibrationMode::Polynomial => self.polynomial.eval(raw),
        }
    }

    pub fn invert(&self, adjusted: f64) -> Inversion {
        match self.mode {
            CalibrationMode::Linear => Inversion {
                raw: self.linear.adjusted_to_raw(adjusted),
                converged: true,
                iterations: 0,
            },
            CalibrationMode::Polynomial => self.polynomial.invert(
                adjusted,
                self.domain,
                self.newton_max_iterations,
                self.newton_tolerance,
            ),
        }
    }

    pub fn adjusted_to_raw(&self, adjusted: f64) -> f64 {
        self.invert(adjusted).raw
    }
}

/// Shared, atomically replaced calibration.
#[derive(Debug, Default)]
pub struct CalibrationStore {
    current: RwLock<Arc<Calibration>>,
}

pub type CalibrationHandle = Arc<CalibrationStore>;

impl CalibrationStore {
    pub fn new(calibration: Calibration) -> Self {
        Self {
            current: RwLock::new(Arc::new(calibration)),
        }
    }

    pub fn handle(calibration: Calibration) -> CalibrationHandle {
        Arc::new(Self::new(calibration))
    }

    /// The calibration in effect right now. Later publishes do not affect it.
    pub fn snapshot(&self) -> Arc<Calibration> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn replace(&self, calibration: Calibration) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(calibration);
    }

    /// Replace the polynomial model, keeping the linear model and mode.
    pub fn publish_polynomial(&self, polynomial: PolynomialModel) {
        self.update(|c| c.polynomial = polynomial);
        tracing::info!(
            degree = polynomial.degree(),
            coefficients = ?polynomial.coefficients(),
            "published polynomial calibration"
        );
    }

    pub fn set_linear(&self, linear: LinearModel) {
        self.update(|c| c.linear = linear);
    }

    pub fn set_mode(&self, mode: CalibrationMode) {
        self.update(|c| c.mode = mode);
    }

    fn update(&self, f: impl FnOnce(&mut Calibration)) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Calibration::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poly(c: [f64; 4], degree: u8) -> PolynomialModel {
        PolynomialModel::new(c, degree).unwrap()
    }

    #[test]
    fn identity_models_are_identity() {
        let cal = Calibration::default();
        assert_eq!(cal.raw_to_adjusted(9.3), 9.3);
        assert_eq!(cal.adjusted_to_raw(9.3), 9.3);

        let mut cal = Calibration::default();
        cal.mode = CalibrationMode::Polynomial;
        assert_eq!(cal.raw_to_adjusted(9.3), 9.3);
        assert_eq!(cal.adjusted_to_raw(9.3), 9.3);
    }

    #[test]
    fn horner_matches_expanded_form() {
        let p = poly([0.5, 0.9, 0.01, 0.0005], 3);
        let x: f64 = 11.0;
        let expected = 0.5 + 0.9 * x + 0.01 * x.powi(2) + 0.0005 * x.powi(3);
        assert!((p.eval(x) - expected).abs() < 1e-12);
    }

    #[test]
    fn coefficients_above_degree_are_zeroed() {
        let p = poly([0.0, 1.0, 0.3, 0.2], 1);
        assert_eq!(p.coefficients(), [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn rejects_bad_degree() {
        assert_eq!(
            PolynomialModel::new([0.0; 4], 4),
            Err(CalibrationError::InvalidDegree(4))
        );
        assert_eq!(
            PolynomialModel::new([0.0; 4], 0),
            Err(CalibrationError::InvalidDegree(0))
        );
    }

    #[test]
    fn newton_converges_on_monotonic_cubic() {
        let p = poly([0.2, 0.95, 0.004, 0.0001], 3);
        let domain = SpeedDomain::default();
        for raw in [1.0, 6.5, 12.0, 20.0] {
            let inv = p.invert(p.eval(raw), domain, 50, 1e-9);
            assert!(inv.converged);
            assert!((inv.raw - raw).abs() < 1e-6, "{raw} -> {}", inv.raw);
        }
    }

    #[test]
    fn stationary_point_falls_back_within_domain() {
        // f(x) = x^3 has f'(0) = 0, right on the domain edge.
        let p = poly([0.0, 0.0, 0.0, 1.0], 3);
        let domain = SpeedDomain {
            min_kmh: 0.0,
            max_kmh: 10.0,
        };
        let inv = p.invert(0.0, domain, 50, 1e-9);
        assert!(inv.converged, "x = 0 is an exact root");

        let flat = poly([5.0, 0.0, 0.0, 0.0], 2);
        let inv = flat.invert(7.0, domain, 50, 1e-9);
        assert!(!inv.converged);
        assert!(inv.raw.is_finite());
        assert!((0.0..=10.0).contains(&inv.raw));
    }

    #[test]
    fn turning_cubic_inverts_on_rising_branch_inside_domain() {
        // Falls until ~3.8 km/h, rises to ~20.2 km/h, then falls again.
        let p = poly([8.64, -1.16, 0.18, -0.005], 3);
        let domain = SpeedDomain::default();

        let inv = p.invert(8.0, domain, 50, 1e-9);
        assert!(inv.converged);
        assert!((7.0..8.0).contains(&inv.raw), "raw={}", inv.raw);
        assert!(p.derivative(inv.raw) > 0.0);

        let inv = p.invert(16.0, domain, 50, 1e-9);
        assert!(inv.converged);
        assert!((p.eval(inv.raw) - 16.0).abs() < 1e-9);
        assert!(p.derivative(inv.raw) > 0.0, "raw={}", inv.raw);

        // Below the curve's minimum on the domain: no root to find.
        let inv = p.invert(3.0, domain, 50, 1e-9);
        assert!(!inv.converged);
        assert!(domain.contains(inv.raw), "raw={}", inv.raw);
    }

    #[test]
    fn roots_outside_domain_are_not_converged() {
        let domain = SpeedDomain {
            min_kmh: 2.0,
            max_kmh: 20.0,
        };
        let p = poly([0.2, 0.95, 0.004, 0.0001], 3);
        for target in [p.eval(-3.0), p.eval(30.0), f64::NAN] {
            let inv = p.invert(target, domain, 50, 1e-9);
            assert!(!inv.converged, "target={target}");
            assert!(domain.contains(inv.raw), "target={target} raw={}", inv.raw);
        }

        let line = poly([1.0, 0.5, 0.0, 0.0], 1);
        let inv = line.invert(20.0, domain, 50, 1e-9);
        assert!(!inv.converged);
        assert_eq!(inv.raw, 20.0);
    }

    #[test]
    fn iteration_cap_is_honoured() {
        let p = poly([0.2, 0.95, 0.004, 0.0001], 3);
        let inv = p.invert(p.eval(18.0), SpeedDomain::default(), 1, 1e-15);
        assert!(inv.iterations <= 1);
        assert!(inv.raw.is_finite());
        assert!((0.0..=25.0).contains(&inv.raw));
    }

    #[test]
    fn monotonic_check_finds_interior_dip() {
        // f'(x) = 3x^2 - 12x + 10 has its minimum -2 at x = 2.
        let p = poly([0.0, 10.0, -6.0, 1.0], 3);
        assert!(!p.is_non_decreasing_on(0.0, 4.0));
        assert!(p.is_non_decreasing_on(4.0, 10.0));
    }

    #[test]
    fn store_publish_keeps_linear_and_mode() {
        let store = CalibrationStore::handle(Calibration::default());
        store.set_linear(LinearModel::new(1.05, -0.2).unwrap());
        let before = store.snapshot();
        store.publish_polynomial(poly([0.1, 0.98, 0.0, 0.0], 1));
        let after = store.snapshot();

        assert_eq!(before.polynomial, PolynomialModel::identity());
        assert_eq!(after.linear, LinearModel { a: 1.05, b: -0.2 });
        assert_eq!(after.mode, CalibrationMode::Linear);
        assert_eq!(after.polynomial.coefficients()[0], 0.1);

        store.set_mode(CalibrationMode::Polynomial);
        let switched = store.snapshot();
        assert_eq!(switched.active(), CalibrationModel::Polynomial(after.polynomial));
        // Readers holding the old snapshot keep their view.
        assert_eq!(after.mode, CalibrationMode::Linear);
    }

    #[test]
    fn linear_model_validates_slope() {
        assert!(LinearModel::new(0.0, 1.0).is_err());
        assert!(LinearModel::new(f64::NAN, 1.0).is_err());
        assert!(LinearModel::new(1.0, f64::INFINITY).is_err());
        let m = LinearModel::new(0.97, 0.3).unwrap();
        assert!((m.adjusted_to_raw(m.raw_to_adjusted(10.0)) - 10.0).abs() < 1e-12);
    }
}
