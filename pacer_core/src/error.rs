use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid workout definition: {0}")]
    InvalidWorkout(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("device error: {0}")]
    Device(String),
    #[error("timeout waiting for device telemetry")]
    DeviceTimeout,
    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

/// Failures of the regression pipeline. None of these touch the published
/// calibration; the previous coefficients stay in effect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("not enough calibration data: have {have} samples, need {need}")]
    InsufficientData { have: usize, need: usize },
    #[error("degenerate calibration data: {0}")]
    Degenerate(&'static str),
    #[error("normal equations are singular")]
    Singular,
    #[error("no monotonic fit found (down to degree {degree})")]
    NonMonotonicFit { degree: u8 },
    #[error("polynomial degree {0} is not supported (1..=3)")]
    InvalidDegree(u8),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
