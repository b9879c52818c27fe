use modbus_transport::TransportError;
use thiserror::Error;

pub type Result<T, E = SensorError> = core::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("format error: {0}")]
    Format(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("no sample available yet")]
    NoSample,
    #[error("acquisition stopped")]
    Stopped,
    #[error("failed to start acquisition worker: {0}")]
    Spawn(String),
}

impl SensorError {
    /// Per-tick failures that skip one sample but keep the link.
    pub fn is_transient(&self) -> bool {
        match self {
            SensorError::Transport(e) => e.is_transient(),
            SensorError::Format(_) => true,
            _ => false,
        }
    }
}
