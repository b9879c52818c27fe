//! Mapping from `tokio-modbus` results onto `TransportError`.

use crate::{Result, TransportError};
use std::io;

pub(crate) fn from_io(err: &io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
        io::ErrorKind::InvalidData => TransportError::Protocol(err.to_string()),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => TransportError::Connection(err.to_string()),
        _ => TransportError::Io(err.to_string()),
    }
}

fn from_modbus(err: tokio_modbus::Error) -> TransportError {
    match err {
        tokio_modbus::Error::Transport(e) => from_io(&e),
        other => TransportError::Protocol(other.to_string()),
    }
}

/// Collapse the nested `Result<Result<T, ExceptionCode>, Error>` of tokio-modbus.
pub(crate) fn flatten<T>(res: tokio_modbus::Result<T>) -> Result<T> {
    match res {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(code)) => Err(TransportError::Protocol(format!(
            "exception response: {code:?}"
        ))),
        Err(e) => Err(from_modbus(e)),
    }
}
