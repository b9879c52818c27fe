use core::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Where a Modbus device lives.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum Endpoint {
    /// Modbus TCP (MBAP framing).
    Tcp { host: String, port: u16 },
    /// Modbus RTU over a serial line.
    Serial {
        path: String,
        baud_rate: u32,
        #[cfg_attr(feature = "serde", serde(default))]
        parity: Parity,
    },
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn serial(path: impl Into<String>, baud_rate: u32) -> Self {
        Endpoint::Serial {
            path: path.into(),
            baud_rate,
            parity: Parity::None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Endpoint::Serial {
                path,
                baud_rate,
                parity,
            } => write!(f, "rtu://{path}@{baud_rate}/{parity}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Parity::None => "8N1",
            Parity::Even => "8E1",
            Parity::Odd => "8O1",
        };
        f.write_str(s)
    }
}

/// Per-link settings shared by every backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkParams {
    /// Upper bound for one request/response round trip (and for the TCP connect).
    pub timeout: Duration,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        assert_eq!(
            Endpoint::tcp("10.10.10.2", 502).to_string(),
            "tcp://10.10.10.2:502"
        );
        let serial = Endpoint::Serial {
            path: "/dev/ttyUSB0".into(),
            baud_rate: 115_200,
            parity: Parity::Even,
        };
        assert_eq!(serial.to_string(), "rtu:///dev/ttyUSB0@115200/8E1");
    }

    #[test]
    fn test_serial_constructor_defaults_to_no_parity() {
        match Endpoint::serial("/dev/ttyS1", 9600) {
            Endpoint::Serial { parity, .. } => assert_eq!(parity, Parity::None),
            other => panic!("unexpected endpoint {other:?}"),
        }
    }
}
