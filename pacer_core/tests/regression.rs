use pacer_core::{
    Calibration, CalibrationError, CalibrationMode, CalibrationStore, RecalibrationReport,
    RecalibrationWorker, RegressionCfg, RegressionSample, SampleHistory, SpeedDomain,
    fit_best_monotonic, fit_best_monotonic_on, fit_linear, fit_polynomial,
};
use std::time::Duration;

fn samples_from(
    f: impl Fn(f64) -> f64,
    xs: impl IntoIterator<Item = f64>,
) -> Vec<RegressionSample> {
    xs.into_iter()
        .map(|x| RegressionSample {
            raw_speed: x,
            reference_speed: f(x),
            run_id: 1,
        })
        .collect()
}

fn grid(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
        .collect()
}

#[test]
fn linear_fit_recovers_known_model() {
    let s = samples_from(|x| 0.96 * x + 0.3, grid(6.0, 18.0, 30));
    let fit = fit_linear(&s, 20).unwrap();
    assert!((fit.a - 0.96).abs() < 1e-9);
    assert!((fit.b - 0.3).abs() < 1e-9);
    assert!((fit.r_squared - 1.0).abs() < 1e-9);
    assert_eq!(fit.n, 30);
}

#[test]
fn polynomial_fit_recovers_known_quadratic() {
    let s = samples_from(|x| 0.2 + 0.9 * x + 0.004 * x * x, grid(5.0, 20.0, 40));
    let fit = fit_polynomial(&s, 2, 20).unwrap();
    let [c0, c1, c2, c3] = fit.model.coefficients();
    assert!((c0 - 0.2).abs() < 1e-6, "c0={c0}");
    assert!((c1 - 0.9).abs() < 1e-6, "c1={c1}");
    assert!((c2 - 0.004).abs() < 1e-8, "c2={c2}");
    assert_eq!(c3, 0.0);
    assert_eq!(fit.observed_min, 5.0);
    assert_eq!(fit.observed_max, 20.0);
}

#[test]
fn best_fit_keeps_cubic_of_monotone_data() {
    let s = samples_from(
        |x| 0.1 + 0.95 * x + 0.001 * x * x + 0.0001 * x * x * x,
        grid(4.0, 20.0, 50),
    );
    let fit = fit_best_monotonic(&s, 3, 20).unwrap();
    assert_eq!(fit.model.degree(), 3);
    assert!((fit.model.eval(12.0) - (0.1 + 0.95 * 12.0 + 0.144 + 0.1728)).abs() < 1e-6);
}

#[test]
fn non_monotonic_cubic_degrades() {
    // Antisymmetric cubic around 10 km/h: the cubic fit turns down near the
    // ends of the range, its quadratic/linear shadow does not.
    let s = samples_from(
        |x| 10.0 + 0.5 * (x - 10.0) - 0.02 * (x - 10.0).powi(3),
        grid(6.0, 14.0, 41),
    );
    let cubic = fit_polynomial(&s, 3, 20).unwrap();
    assert!(!cubic.model.is_non_decreasing_on(6.0, 14.0));

    let fit = fit_best_monotonic(&s, 3, 20).unwrap();
    assert!(fit.model.degree() < 3);
    assert!(fit.model.is_non_decreasing_on(fit.observed_min, fit.observed_max));
}

/// Monotone on 6..18 km/h but turns over well inside 0..25 km/h.
fn turning_outside_observed(x: f64) -> f64 {
    12.0 + (x - 12.0) - 0.005 * (x - 12.0).powi(3)
}

#[test]
fn domain_fit_rejects_curve_turning_outside_observed_speeds() {
    let s = samples_from(turning_outside_observed, grid(6.0, 18.0, 49));
    let domain = SpeedDomain::default();

    let observed_only = fit_best_monotonic(&s, 3, 20).unwrap();
    assert_eq!(observed_only.model.degree(), 3);
    assert!(!observed_only.model.is_non_decreasing_on(0.0, 25.0));

    let fit = fit_best_monotonic_on(&s, 3, 20, domain).unwrap();
    assert!(fit.model.degree() < 3);
    assert!(fit.model.is_non_decreasing_on(0.0, 25.0));

    let mut cal = Calibration::default();
    cal.mode = CalibrationMode::Polynomial;
    cal.polynomial = fit.model;
    for raw in grid(7.0, 17.0, 11) {
        let inv = cal.invert(turning_outside_observed(raw));
        assert!(inv.converged, "raw={raw}");
        assert!(domain.contains(inv.raw), "raw={raw} inverted={}", inv.raw);
        assert!((inv.raw - raw).abs() < 0.75, "raw={raw} inverted={}", inv.raw);
    }
}

#[test]
fn worker_only_publishes_curves_monotone_over_domain() {
    let store = CalibrationStore::handle(Calibration::default());
    let worker = RecalibrationWorker::spawn(store.clone(), RegressionCfg::default());
    worker.submit(1, samples_from(turning_outside_observed, grid(6.0, 18.0, 49)));
    let RecalibrationReport::Published { degree, .. } = wait_report(&worker) else {
        panic!("expected a published fit");
    };
    assert!(degree < 3);
    assert!(store.snapshot().polynomial.is_non_decreasing_on(0.0, 25.0));
}

#[test]
fn decreasing_data_has_no_acceptable_fit() {
    let s = samples_from(|x| 20.0 - x, grid(5.0, 15.0, 30));
    assert_eq!(
        fit_best_monotonic(&s, 3, 20),
        Err(CalibrationError::NonMonotonicFit { degree: 1 })
    );
}

#[test]
fn too_few_samples_is_insufficient_data() {
    let s = samples_from(|x| x, grid(5.0, 15.0, 10));
    assert_eq!(
        fit_linear(&s, 20),
        Err(CalibrationError::InsufficientData { have: 10, need: 20 })
    );
    assert_eq!(
        fit_best_monotonic(&s, 3, 20),
        Err(CalibrationError::InsufficientData { have: 10, need: 20 })
    );
}

#[test]
fn invalid_degree_is_rejected() {
    let s = samples_from(|x| x, grid(5.0, 15.0, 30));
    assert_eq!(
        fit_polynomial(&s, 4, 20),
        Err(CalibrationError::InvalidDegree(4))
    );
}

fn wait_report(worker: &RecalibrationWorker) -> RecalibrationReport {
    worker
        .reports()
        .recv_timeout(Duration::from_secs(5))
        .expect("worker report")
}

#[test]
fn worker_publishes_polynomial_atomically() {
    let store = CalibrationStore::handle(Calibration::default());
    let before = store.snapshot();
    let worker = RecalibrationWorker::spawn(store.clone(), RegressionCfg::default());

    // A first short run is not enough on its own.
    let mut run1 = samples_from(|x| 0.97 * x - 0.1, grid(6.0, 10.0, 12));
    worker.submit(1, run1.clone());
    assert_eq!(
        wait_report(&worker),
        RecalibrationReport::InsufficientData {
            run_id: 1,
            have: 12,
            need: 20
        }
    );
    assert_eq!(*store.snapshot(), *before);

    // Together with a second run it is.
    let run2: Vec<_> = samples_from(|x| 0.97 * x - 0.1, grid(10.5, 16.0, 12))
        .into_iter()
        .map(|s| RegressionSample { run_id: 2, ..s })
        .collect();
    worker.submit(2, run2);
    let RecalibrationReport::Published {
        run_id, samples, ..
    } = wait_report(&worker)
    else {
        panic!("expected a published fit");
    };
    assert_eq!(run_id, 2);
    assert_eq!(samples, 24);

    let after = store.snapshot();
    // Mode and linear model are user-owned and stay put.
    assert_eq!(after.mode, CalibrationMode::Linear);
    assert_eq!(after.linear, before.linear);
    assert!((after.polynomial.eval(12.0) - (0.97 * 12.0 - 0.1)).abs() < 1e-6);
    // The snapshot taken earlier is unaffected.
    assert_eq!(before.polynomial.eval(12.0), 12.0);

    run1.clear();
    worker.submit(3, run1);
    assert!(matches!(
        wait_report(&worker),
        RecalibrationReport::Published { run_id: 3, .. }
    ));
}

#[test]
fn worker_reports_failures_and_keeps_model() {
    let store = CalibrationStore::handle(Calibration::default());
    let worker = RecalibrationWorker::spawn_with_history(
        store.clone(),
        RegressionCfg::default(),
        SampleHistory::new(10),
    );
    worker.submit(7, samples_from(|x| 30.0 - x, grid(5.0, 15.0, 30)));
    assert_eq!(
        wait_report(&worker),
        RecalibrationReport::Failed {
            run_id: 7,
            error: CalibrationError::NonMonotonicFit { degree: 1 }
        }
    );
    assert_eq!(store.snapshot().polynomial.eval(10.0), 10.0);
    drop(worker);
}
