//! Human-readable error descriptions and structured JSON error formatting.

use pacer_core::error::{BuildError, CalibrationError, EngineError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid engine configuration ({msg}).\nLikely causes: Out-of-range values in [engine] or [adjust].\nHow to fix: Edit the config file, then rerun. See etc/pacer.toml for a sample."
            ),
        };
    }

    if let Some(ee) = err.downcast_ref::<EngineError>() {
        return match ee {
            EngineError::InvalidWorkout(msg) => format!(
                "What happened: The workout cannot be run ({msg}).\nLikely causes: A step without duration_s/distance_m or early_end, a negative pace, or an auto_adjust without its band.\nHow to fix: Fix the named step in the workout TOML; `pacer plan` shows the flattened steps."
            ),
            EngineError::DeviceTimeout => "What happened: Treadmill telemetry stopped arriving; the belt was stopped.\nLikely causes: Sensor disconnected or runner.sensor_timeout_ms too low.\nHow to fix: Check the device connection and consider raising runner.sensor_timeout_ms.".to_string(),
            EngineError::Device(msg) => format!(
                "What happened: Device error ({msg}).\nLikely causes: Treadmill rejected a command or the link dropped.\nHow to fix: Check the device, then start a new run."
            ),
            EngineError::State(msg) => format!(
                "What happened: Command not valid right now ({msg}).\nLikely causes: The run already completed or was never started.\nHow to fix: Start a new run."
            ),
            EngineError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<CalibrationError>() {
        return match ce {
            CalibrationError::InsufficientData { have, need } => format!(
                "What happened: Not enough calibration samples (have {have}, need {need}).\nLikely causes: Runs without a reference speed, or too few runs so far.\nHow to fix: Record more runs with a foot pod, or lower regression.min_samples."
            ),
            CalibrationError::NonMonotonicFit { .. } => "What happened: No speed curve that only goes up fits the samples.\nLikely causes: Reference speeds that fall as belt speed rises (bad pairing or noisy pod).\nHow to fix: Inspect the samples CSV and drop bad rows; the previous calibration stays in effect.".to_string(),
            CalibrationError::InvalidDegree(d) => format!(
                "What happened: Polynomial degree {d} is not supported.\nLikely causes: --degree or regression.max_degree outside 1..=3.\nHow to fix: Use a degree between 1 and 3."
            ),
            other => format!(
                "What happened: Calibration fit failed ({other}).\nLikely causes: All samples at the same belt speed.\nHow to fix: Record samples across a range of speeds."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("samples csv must have headers") {
        return "Invalid headers in samples CSV. Expected 'raw_speed,reference_speed,run_id'."
            .to_string();
    }

    if lower.contains("parse config") || lower.contains("parse workout") {
        let cause = err.source().map(|s| format!(" Cause: {s}")).unwrap_or_default();
        return format!(
            "What happened: {msg}.{cause}\nLikely causes: TOML syntax error or an unknown value.\nHow to fix: Fix the file and try again."
        );
    }

    if lower.contains(" must ") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nLikely causes: Out-of-range values.\nHow to fix: Edit the TOML and try again."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable name for the error class, used as the JSON `reason`.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<BuildError>().is_some() {
        return "InvalidConfig";
    }
    if let Some(ee) = err.downcast_ref::<EngineError>() {
        return match ee {
            EngineError::InvalidWorkout(_) => "InvalidWorkout",
            EngineError::DeviceTimeout => "DeviceTimeout",
            EngineError::Device(_) => "Device",
            EngineError::State(_) => "State",
            EngineError::Config(_) => "InvalidConfig",
        };
    }
    if let Some(ce) = err.downcast_ref::<CalibrationError>() {
        return match ce {
            CalibrationError::InsufficientData { .. } => "InsufficientCalibrationData",
            _ => "CalibrationFit",
        };
    }
    "Error"
}

/// Stable exit codes per error class; anything unclassified returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match reason_name(err) {
        "InvalidWorkout" => 3,
        "DeviceTimeout" => 4,
        "Device" => 5,
        "InsufficientCalibrationData" | "CalibrationFit" => 6,
        "InvalidConfig" => 7,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;
    json!({ "reason": reason_name(err), "message": humanize(err) }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_get_stable_codes() {
        let e = eyre::Report::new(EngineError::InvalidWorkout("workout has no steps".into()));
        assert_eq!(exit_code_for_error(&e), 3);
        assert!(humanize(&e).contains("workout has no steps"));

        let e = eyre::Report::new(EngineError::DeviceTimeout);
        assert_eq!(exit_code_for_error(&e), 4);

        let e = eyre::Report::new(CalibrationError::InsufficientData { have: 3, need: 20 });
        assert_eq!(exit_code_for_error(&e), 6);
        assert!(humanize(&e).contains("have 3, need 20"));

        let e = eyre::eyre!("boom");
        assert_eq!(exit_code_for_error(&e), 1);
    }

    #[test]
    fn json_error_has_reason_and_message() {
        let e = eyre::Report::new(BuildError::InvalidConfig("gain must be > 0"));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&e)).unwrap();
        assert_eq!(v["reason"], "InvalidConfig");
        assert!(v["message"].as_str().unwrap().contains("gain must be > 0"));
    }
}
