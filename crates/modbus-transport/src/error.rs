use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("timeout")]
    Timeout,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("link is closed")]
    Closed,
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
}

impl TransportError {
    /// Errors after which the same link may be used for the next transaction.
    ///
    /// Anything else means the session is gone and the caller has to reconnect.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::Protocol(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::Protocol("exception 0x02".into()).is_transient());
        assert!(!TransportError::Connection("refused".into()).is_transient());
        assert!(!TransportError::Io("broken pipe".into()).is_transient());
        assert!(!TransportError::Closed.is_transient());
        assert!(!TransportError::Unsupported("rtu").is_transient());
    }
}
