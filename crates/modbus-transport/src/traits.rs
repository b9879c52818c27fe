use crate::{Endpoint, LinkParams, Result};

/// A minimal blocking Modbus client that can read holding registers.
///
/// One link carries at most one transaction at a time; callers that share a link
/// across threads must serialise access themselves.
pub trait RegisterLink: Send {
    /// Open a link to `endpoint` (e.g. `10.10.10.2:502` or `/dev/ttyUSB0`).
    fn connect(endpoint: &Endpoint, params: &LinkParams) -> Result<Self>
    where
        Self: Sized;

    /// Read `count` holding registers (function 0x03) from `unit`, starting at `start`.
    ///
    /// Blocks for at most the configured timeout.
    fn read_registers(&mut self, unit: u8, start: u16, count: u16) -> Result<Vec<u16>>;

    /// Release the link. Calling this more than once is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}
