#![no_main]
use libfuzzer_sys::fuzz_target;
use pacer_core::flatten::flattened_len;
use pacer_core::{WorkoutDefinition, flatten, validate_steps};

fuzz_target!(|data: &str| {
    let Ok(file) = pacer_config::load_workout_toml(data) else {
        return;
    };
    if file.validate().is_err() {
        return;
    }
    // Huge repeat counts only exercise the allocator.
    if file.steps.iter().any(|s| s.count.unwrap_or(0) > 1000) {
        return;
    }
    let def = WorkoutDefinition::from(&file);
    let steps = flatten(&def);
    assert_eq!(steps.len(), flattened_len(&def));
    if validate_steps(&steps).is_ok() {
        assert!(!steps.is_empty());
        for (i, step) in steps.iter().enumerate() {
            assert_eq!(step.index, i);
        }
    }
});
