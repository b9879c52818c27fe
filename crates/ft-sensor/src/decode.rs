//! Register words to per-axis counts, and the register maps that produce those words.

use crate::{Result, SensorError};
use modbus_transport::RegisterLink;
use serde::{Deserialize, Serialize};

/// Number of words in one decoded frame (Fx, Fy, Fz, Tx, Ty, Tz).
pub const FRAME_WORDS: usize = 6;

/// Reinterpret one register word as a two's complement count.
pub fn decode_word(word: u16) -> i16 {
    word as i16
}

/// Decode one frame of register words into six signed counts.
///
/// Fails with `Format` unless exactly six words are given.
pub fn decode(words: &[u16]) -> Result<[i16; FRAME_WORDS]> {
    if words.len() != FRAME_WORDS {
        return Err(SensorError::Format(format!(
            "expected {FRAME_WORDS} register words, got {}",
            words.len()
        )));
    }
    let mut counts = [0i16; FRAME_WORDS];
    for (count, word) in counts.iter_mut().zip(words) {
        *count = decode_word(*word);
    }
    Ok(counts)
}

/// One read-holding-registers transaction of a register map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadOp {
    pub unit: u8,
    pub start: u16,
    pub count: u16,
    /// Frame slot the first returned word lands in.
    pub first_axis: usize,
}

const SIX_AXIS_BLOCK: &[ReadOp] = &[ReadOp {
    unit: 1,
    start: 0,
    count: 6,
    first_axis: 0,
}];

const FORCE_PER_UNIT: &[ReadOp] = &[
    ReadOp {
        unit: 1,
        start: 0,
        count: 1,
        first_axis: 0,
    },
    ReadOp {
        unit: 2,
        start: 0,
        count: 1,
        first_axis: 1,
    },
    ReadOp {
        unit: 3,
        start: 0,
        count: 1,
        first_axis: 2,
    },
];

/// Register layouts of the supported sensor models.
///
/// These follow the device datasheets and are not meant to be tuned per install.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum RegisterMap {
    /// Unit 1, holding registers 0..6 in Fx..Tz order, one transaction.
    #[default]
    SixAxisBlock,
    /// Force-only amplifier: Fx, Fy, Fz at register 0 of units 1, 2 and 3.
    /// Torque channels do not exist and read as zero.
    ForcePerUnit,
}

impl RegisterMap {
    pub fn ops(self) -> &'static [ReadOp] {
        match self {
            RegisterMap::SixAxisBlock => SIX_AXIS_BLOCK,
            RegisterMap::ForcePerUnit => FORCE_PER_UNIT,
        }
    }

    /// Run every transaction of the map in order and assemble one frame.
    pub fn read(self, link: &mut dyn RegisterLink) -> Result<[u16; FRAME_WORDS]> {
        let mut frame = [0u16; FRAME_WORDS];
        for op in self.ops() {
            let words = link.read_registers(op.unit, op.start, op.count)?;
            if words.len() != usize::from(op.count) {
                return Err(SensorError::Format(format!(
                    "unit {} register {}: asked for {} words, got {}",
                    op.unit,
                    op.start,
                    op.count,
                    words.len()
                )));
            }
            let end = op.first_axis + words.len();
            let slot = frame.get_mut(op.first_axis..end).ok_or_else(|| {
                SensorError::Format(format!("read op overruns frame at axis {}", op.first_axis))
            })?;
            slot.copy_from_slice(&words);
        }
        Ok(frame)
    }
}
