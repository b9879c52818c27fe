use crate::types::Wrench;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct BiasState {
    offset: Wrench,
    biased: bool,
}

/// Software zero: an offset subtracted from every calibrated reading.
///
/// The offset is replaced as a whole under one lock so readers never see a mix of
/// old and new axes.
#[derive(Debug, Default)]
pub struct BiasManager {
    state: Mutex<BiasState>,
}

impl BiasManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BiasState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `offset`; following readings are reported relative to it.
    pub fn set(&self, offset: Wrench) {
        *self.lock() = BiasState {
            offset,
            biased: true,
        };
    }

    pub fn clear(&self) {
        *self.lock() = BiasState::default();
    }

    pub fn offset(&self) -> Wrench {
        self.lock().offset
    }

    pub fn is_biased(&self) -> bool {
        self.lock().biased
    }

    pub fn correct(&self, wrench: &Wrench) -> Wrench {
        *wrench - self.lock().offset
    }
}

/// Mean of `samples`, or `None` for an empty slice.
pub fn average(samples: &[Wrench]) -> Option<Wrench> {
    if samples.is_empty() {
        return None;
    }
    let sum = samples.iter().fold(Wrench::ZERO, |acc, w| acc + *w);
    Some(sum.scale(1.0 / samples.len() as f64))
}
