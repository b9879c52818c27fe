use crate::classify;
use crate::{Endpoint, LinkParams, RegisterLink, Result, TransportError};
use std::net::{SocketAddr, ToSocketAddrs};
use tokio_modbus::client::sync::{self, Reader};
use tokio_modbus::prelude::{Slave, SlaveContext};
use tracing::{debug, info};

/// Modbus TCP link backed by the blocking `tokio-modbus` client.
pub struct TcpLink {
    peer: SocketAddr,
    ctx: Option<sync::Context>,
}

impl TcpLink {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
        (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Connection(format!("resolving {host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| TransportError::Connection(format!("no address for {host}:{port}")))
    }
}

impl RegisterLink for TcpLink {
    fn connect(endpoint: &Endpoint, params: &LinkParams) -> Result<Self> {
        let (host, port) = match endpoint {
            Endpoint::Tcp { host, port } => (host.as_str(), *port),
            Endpoint::Serial { .. } => {
                return Err(TransportError::Unsupported(
                    "tcp backend cannot open a serial endpoint",
                ))
            }
        };
        let peer = Self::resolve(host, port)?;
        // Unit id is switched per request; 1 is only the initial value.
        let ctx = sync::tcp::connect_slave_with_timeout(peer, Slave(1), Some(params.timeout))
            .map_err(|e| TransportError::Connection(format!("{peer}: {e}")))?;
        info!(
            %peer,
            timeout_ms = params.timeout.as_millis() as u64,
            "modbus tcp link open"
        );
        Ok(Self {
            peer,
            ctx: Some(ctx),
        })
    }

    fn read_registers(&mut self, unit: u8, start: u16, count: u16) -> Result<Vec<u16>> {
        let ctx = self.ctx.as_mut().ok_or(TransportError::Closed)?;
        ctx.set_slave(Slave(unit));
        classify::flatten(ctx.read_holding_registers(start, count))
    }

    fn close(&mut self) {
        if self.ctx.take().is_some() {
            debug!(peer = %self.peer, "modbus tcp link closed");
        }
    }

    fn is_open(&self) -> bool {
        self.ctx.is_some()
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.close();
    }
}
