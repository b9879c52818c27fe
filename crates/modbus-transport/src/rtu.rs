use crate::classify;
use crate::{Endpoint, LinkParams, Parity, RegisterLink, Result, TransportError};
use tokio_modbus::client::sync::{self, Reader};
use tokio_modbus::prelude::{Slave, SlaveContext};
use tokio_serial::{DataBits, StopBits};
use tracing::{debug, info};

/// Modbus RTU link over a serial port (8 data bits, 1 stop bit).
pub struct RtuLink {
    path: String,
    ctx: Option<sync::Context>,
}

fn serial_parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    }
}

impl RegisterLink for RtuLink {
    fn connect(endpoint: &Endpoint, params: &LinkParams) -> Result<Self> {
        let (path, baud_rate, parity) = match endpoint {
            Endpoint::Serial {
                path,
                baud_rate,
                parity,
            } => (path.clone(), *baud_rate, *parity),
            Endpoint::Tcp { .. } => {
                return Err(TransportError::Unsupported(
                    "rtu backend cannot open a tcp endpoint",
                ))
            }
        };
        let builder = tokio_serial::new(path.as_str(), baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(serial_parity(parity))
            .timeout(params.timeout);
        let ctx = sync::rtu::connect_slave_with_timeout(&builder, Slave(1), Some(params.timeout))
            .map_err(|e| TransportError::Connection(format!("{path}: {e}")))?;
        info!(path = %path, baud_rate, %parity, "modbus rtu link open");
        Ok(Self {
            path,
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
            debug!(path = %self.path, "modbus rtu link closed");
        }
    }

    fn is_open(&self) -> bool {
        self.ctx.is_some()
    }
}

impl Drop for RtuLink {
    fn drop(&mut self) {
        self.close();
    }
}
