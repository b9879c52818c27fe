//! modbus-transport: blocking Modbus register links
//!
//! This crate provides the `RegisterLink` trait and feature-gated backends for talking
//! to Modbus devices. The default build enables the `mock` backend (an in-process
//! register bank) and Modbus TCP; serial RTU sits behind the `rtu` feature.

mod types;
pub use types::{Endpoint, LinkParams, Parity};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::RegisterLink;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockLink, MockReply, MockScript, Request, REQUEST_LOG_CAPACITY};

#[cfg(any(feature = "tcp", feature = "rtu"))]
mod classify;

#[cfg(feature = "tcp")]
mod tcp;

#[cfg(feature = "tcp")]
pub use tcp::TcpLink;

#[cfg(feature = "rtu")]
mod rtu;

#[cfg(feature = "rtu")]
pub use rtu::RtuLink;
