use pacer_config::{AdjustScope, CalibrationMode, InBand, load_toml};
use rstest::rstest;

#[test]
fn empty_document_uses_defaults_and_validates() {
    let cfg = load_toml("").expect("parse TOML");
    cfg.validate().expect("defaults should pass");
    assert_eq!(cfg.adjust.scope, AdjustScope::AllSteps);
    assert_eq!(cfg.adjust.in_band, InBand::Hold);
    assert_eq!(cfg.calibration.mode, CalibrationMode::Linear);
    assert_eq!(cfg.regression.max_degree, 3);
}

#[test]
fn full_document_parses() {
    let toml = r#"
[engine]
heart_rate_threshold_bpm = 172
power_threshold_watts = 260
hr_hold_ms = 20000
pace_resolution_kmh = 0.1

[adjust]
scope = "one_step"
min_coefficient = 0.6
max_coefficient = 1.4
gain = 0.8
max_step = 0.03
settle_ms = 5000
trend_window = 4
converging_scale = 0.5
in_band = "drift"
drift_rate = 0.02

[calibration]
mode = "polynomial"
linear_a = 0.97
linear_b = 0.2

[calibration.polynomial]
coefficients = [0.1, 0.95, 0.002, 0.0]
degree = 2

[regression]
min_samples = 30
max_degree = 2
max_runs = 5

[runner]
mode = "sampler"
tick_hz = 2
sensor_timeout_ms = 250

[logging]
level = "debug"
rotation = "daily"
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.adjust.scope, AdjustScope::OneStep);
    assert_eq!(cfg.adjust.in_band, InBand::Drift);
    assert_eq!(cfg.calibration.mode, CalibrationMode::Polynomial);
    let poly = cfg.calibration.polynomial.as_ref().expect("polynomial");
    assert_eq!(poly.degree, 2);
    assert_eq!(poly.coefficients.len(), 4);
}

#[rstest]
#[case("[adjust]\nmin_coefficient = 1.2", "adjust.min_coefficient")]
#[case("[adjust]\nmax_coefficient = 0.9", "adjust.max_coefficient")]
#[case("[adjust]\ntrend_window = 1", "adjust.trend_window")]
#[case("[adjust]\nmax_step = 0.0", "adjust.max_step")]
#[case("[engine]\nhr_hold_ms = 0", "engine.hr_hold_ms")]
#[case("[engine]\nheart_rate_threshold_bpm = -1.0", "engine.heart_rate_threshold_bpm")]
#[case("[calibration]\nlinear_a = 0.0", "calibration.linear_a")]
#[case(
    "[calibration]\ndomain_min_kmh = 10.0\ndomain_max_kmh = 5.0",
    "calibration.domain_max_kmh"
)]
#[case(
    "[calibration.polynomial]\ncoefficients = [0.0, 1.0]\ndegree = 3",
    "too short for degree"
)]
#[case("[regression]\nmax_degree = 4", "regression.max_degree")]
#[case("[regression]\nmin_samples = 3\nmax_degree = 3", "regression.min_samples")]
#[case("[runner]\ntick_hz = 0", "runner.tick_hz")]
#[case("[logging]\nrotation = \"weekly\"", "logging.rotation")]
fn rejects_out_of_range_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        format!("{err}").contains(needle),
        "error `{err}` should mention `{needle}`"
    );
}

#[test]
fn unknown_scope_is_a_parse_error() {
    let err = load_toml("[adjust]\nscope = \"every_step\"").expect_err("bad enum");
    assert!(format!("{err}").contains("scope") || format!("{err}").contains("variant"));
}

#[test]
fn runner_accepts_sample_ms_alias() {
    let cfg = load_toml("[runner]\nsample_ms = 42").expect("parse TOML");
    assert_eq!(cfg.runner.sensor_timeout_ms, 42);
}
