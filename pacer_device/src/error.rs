use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("sensor timeout")]
    Timeout,
    #[error("device disconnected")]
    Disconnected,
    #[error("command rejected: {0}")]
    Rejected(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
