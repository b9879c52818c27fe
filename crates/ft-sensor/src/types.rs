use core::fmt;
use core::ops::{Add, Sub};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Sensor channels in register order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Fx,
    Fy,
    Fz,
    Tx,
    Ty,
    Tz,
}

impl Axis {
    pub const ALL: [Axis; 6] = [Axis::Fx, Axis::Fy, Axis::Fz, Axis::Tx, Axis::Ty, Axis::Tz];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn unit(self) -> Unit {
        match self {
            Axis::Fx | Axis::Fy | Axis::Fz => Unit::Newton,
            Axis::Tx | Axis::Ty | Axis::Tz => Unit::NewtonMetre,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Axis::Fx => "Fx",
            Axis::Fy => "Fy",
            Axis::Fz => "Fz",
            Axis::Tx => "Tx",
            Axis::Ty => "Ty",
            Axis::Tz => "Tz",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Newton,
    NewtonMetre,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Newton => "N",
            Unit::NewtonMetre => "Nm",
        }
    }
}

/// One channel of one sample: the raw count and what it means physically.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisReading {
    pub axis: Axis,
    pub count: i16,
    pub value: f64,
    pub unit: Unit,
}

/// Force (N) and torque (Nm) for one sampling instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Wrench {
    pub fx: f64,
    pub fy: f64,
    pub fz: f64,
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
}

impl Wrench {
    pub const ZERO: Wrench = Wrench {
        fx: 0.0,
        fy: 0.0,
        fz: 0.0,
        tx: 0.0,
        ty: 0.0,
        tz: 0.0,
    };

    pub fn from_array(v: [f64; 6]) -> Self {
        Self {
            fx: v[0],
            fy: v[1],
            fz: v[2],
            tx: v[3],
            ty: v[4],
            tz: v[5],
        }
    }

    pub fn as_array(&self) -> [f64; 6] {
        [self.fx, self.fy, self.fz, self.tx, self.ty, self.tz]
    }

    pub fn forces(&self) -> [f64; 3] {
        [self.fx, self.fy, self.fz]
    }

    pub fn torques(&self) -> [f64; 3] {
        [self.tx, self.ty, self.tz]
    }

    pub fn get(&self, axis: Axis) -> f64 {
        self.as_array()[axis.index()]
    }

    pub fn scale(&self, k: f64) -> Self {
        Self::from_array(self.as_array().map(|v| v * k))
    }

    /// Largest absolute component difference to `other`.
    pub fn max_abs_diff(&self, other: &Wrench) -> f64 {
        let a = self.as_array();
        let b = other.as_array();
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max)
    }
}

impl Sub for Wrench {
    type Output = Wrench;

    fn sub(self, rhs: Wrench) -> Wrench {
        let a = self.as_array();
        let b = rhs.as_array();
        Wrench::from_array([
            a[0] - b[0],
            a[1] - b[1],
            a[2] - b[2],
            a[3] - b[3],
            a[4] - b[4],
            a[5] - b[5],
        ])
    }
}

impl Add for Wrench {
    type Output = Wrench;

    fn add(self, rhs: Wrench) -> Wrench {
        let a = self.as_array();
        let b = rhs.as_array();
        Wrench::from_array([
            a[0] + b[0],
            a[1] + b[1],
            a[2] + b[2],
            a[3] + b[3],
            a[4] + b[4],
            a[5] + b[5],
        ])
    }
}

impl fmt::Display for Wrench {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fx={:.3}N Fy={:.3}N Fz={:.3}N Tx={:.4}Nm Ty={:.4}Nm Tz={:.4}Nm",
            self.fx, self.fy, self.fz, self.tx, self.ty, self.tz
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(OffsetDateTime::now_utc())
    }

    pub fn rfc3339(&self) -> Option<String> {
        self.0
            .format(&time::format_description::well_known::Rfc3339)
            .ok()
    }
}

/// One successful acquisition tick, before bias correction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub seq: u64,
    pub timestamp: Timestamp,
    pub counts: [i16; 6],
    pub calibrated: Wrench,
}

/// What consumers see: the bias-corrected wrench of the latest sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    pub seq: u64,
    pub timestamp: Timestamp,
    pub wrench: Wrench,
    /// Set while the link is down; `wrench` is then the last good value.
    pub stale: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
    Stopped,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Connected => "connected",
            LinkState::Disconnected => "disconnected",
            LinkState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}
