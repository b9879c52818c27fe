use crate::types::{Axis, AxisReading, Wrench};
use crate::{Result, SensorError};

/// Count magnitude that corresponds to the full-scale range (2^15).
pub const FULL_SCALE_COUNTS: f64 = 32768.0;

/// Per-axis conversion from counts to physical units.
///
/// Built once from the configured full-scale ranges and never changed afterwards.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationProfile {
    ranges: [f64; 6],
    scales: [f64; 6],
}

impl CalibrationProfile {
    /// `scale_i = range_i / 32768`, with every range strictly positive and finite.
    pub fn from_ranges(ranges: [f64; 6]) -> Result<Self> {
        let mut scales = [0.0; 6];
        for (axis, (&range, scale)) in Axis::ALL.iter().zip(ranges.iter().zip(scales.iter_mut())) {
            if !range.is_finite() || range <= 0.0 {
                return Err(SensorError::Config(format!(
                    "full-scale range for {axis} must be a positive number, got {range}"
                )));
            }
            *scale = range / FULL_SCALE_COUNTS;
        }
        Ok(Self { ranges, scales })
    }

    /// Same force range on Fx..Fz and same torque range on Tx..Tz.
    pub fn uniform(force_range: f64, torque_range: f64) -> Result<Self> {
        Self::from_ranges([
            force_range,
            force_range,
            force_range,
            torque_range,
            torque_range,
            torque_range,
        ])
    }

    pub fn ranges(&self) -> [f64; 6] {
        self.ranges
    }

    pub fn scales(&self) -> [f64; 6] {
        self.scales
    }

    /// Physical units per count on `axis`.
    pub fn scale(&self, axis: Axis) -> f64 {
        self.scales[axis.index()]
    }

    pub fn apply(&self, counts: &[i16; 6]) -> Wrench {
        let mut out = [0.0; 6];
        for ((v, &c), &s) in out.iter_mut().zip(counts.iter()).zip(self.scales.iter()) {
            *v = f64::from(c) * s;
        }
        Wrench::from_array(out)
    }

    pub fn readings(&self, counts: &[i16; 6]) -> [AxisReading; 6] {
        Axis::ALL.map(|axis| {
            let count = counts[axis.index()];
            AxisReading {
                axis,
                count,
                value: f64::from(count) * self.scale(axis),
                unit: axis.unit(),
            }
        })
    }
}
