//! Maps `Box<dyn Error>` from trait boundaries to typed `EngineError`.
//!
//! The traits in `pacer_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, with an optional
//! feature-gated path for `pacer_device::DeviceError` downcasting.

use crate::error::EngineError;

/// Map a trait-boundary error to a typed `EngineError`.
///
/// Attempts to downcast known device error types first, then falls back
/// to string-based heuristics.
pub fn map_device_error(e: &(dyn std::error::Error + Send + Sync + 'static)) -> EngineError {
    #[cfg(feature = "device-errors")]
    {
        if let Some(dev) = e.downcast_ref::<pacer_device::DeviceError>() {
            return match dev {
                pacer_device::DeviceError::Timeout => EngineError::DeviceTimeout,
                other => EngineError::Device(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") || s.to_lowercase().contains("timed out") {
        EngineError::DeviceTimeout
    } else {
        EngineError::Device(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_fallback_detects_timeouts() {
        let e = std::io::Error::new(std::io::ErrorKind::TimedOut, "sensor read timeout");
        assert_eq!(map_device_error(&e), EngineError::DeviceTimeout);
        let e = std::io::Error::other("bus fault");
        assert_eq!(map_device_error(&e), EngineError::Device("bus fault".into()));
    }

    #[cfg(feature = "device-errors")]
    #[test]
    fn typed_device_errors_downcast() {
        let e = pacer_device::DeviceError::Timeout;
        assert_eq!(map_device_error(&e), EngineError::DeviceTimeout);
        let e = pacer_device::DeviceError::Disconnected;
        assert!(matches!(map_device_error(&e), EngineError::Device(_)));
    }
}
