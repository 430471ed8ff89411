#![no_main]
use libfuzzer_sys::fuzz_target;

// Parse and validation errors are fine; panics are not.
fuzz_target!(|data: &str| {
    if let Ok(cfg) = pacer_config::load_toml(data)
        && cfg.validate().is_ok()
    {
        let cal = pacer_core::Calibration::from(&cfg.calibration);
        let _ = cal.invert(10.0);
        let _ = cal.raw_to_adjusted(10.0);
    }
});
