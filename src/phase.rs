//! Phase matching between the sampled current and the reference table.

use thiserror::Error;

use crate::reference::reference_at;
use crate::sampler::average;
use crate::storage::CalibrationRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhaseLockError {
    #[error("no phase estimates collected")]
    Empty,
    #[error("phase estimates do not converge (variance {variance} after wrap correction)")]
    Unstable { variance: u32 },
}

/// Rotation of the reference table that best matches one current window.
///
/// Returns the offset in degrees and the window mean used as DC reference.
/// Ties go to the lowest offset.
pub fn best_phase(samples: &[u16]) -> (u16, u16) {
    let dc = average(samples);
    let mut best_score = 0i64;
    let mut best_offset = 0u16;
    for offset in 0..360u16 {
        let score = correlation(samples, offset, dc);
        if score > best_score {
            best_score = score;
            best_offset = offset;
        }
    }
    (best_offset, dc)
}

fn correlation(samples: &[u16], offset: u16, dc: u16) -> i64 {
    samples
        .iter()
        .enumerate()
        .map(|(i, &s)| (s as i64 - dc as i64) * reference_at(i, offset) as i64)
        .sum()
}

/// Integer mean, rounded down
pub fn mean(values: &[u16]) -> u16 {
    average(values)
}

/// Population variance around the integer mean, rounded down
pub fn population_variance(values: &[u16]) -> u32 {
    if values.is_empty() {
        return 0;
    }
    let m = mean(values) as i64;
    let sum: i64 = values
        .iter()
        .map(|&v| {
            let d = v as i64 - m;
            d * d
        })
        .sum();
    (sum / values.len() as i64) as u32
}

/// Moves estimates on the low side of the 0/360 seam up by a full turn so a
/// cluster straddling the seam becomes contiguous.
pub fn unwrap_phases(values: &mut [u16]) {
    for v in values.iter_mut().filter(|v| **v < 180) {
        *v += 360;
    }
}

/// Per-cycle estimates collected during calibration
#[derive(Debug, Default)]
pub struct PhaseAccumulator {
    phases: Vec<u16>,
    dc_sum: u32,
    capacity: usize,
}

impl PhaseAccumulator {
    pub fn new(cycles: usize) -> Self {
        Self {
            phases: Vec::with_capacity(cycles),
            dc_sum: 0,
            capacity: cycles,
        }
    }

    pub fn push(&mut self, phase: u16, dc: u16) {
        self.phases.push(phase);
        self.dc_sum += dc as u32;
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.phases.len() >= self.capacity
    }

    pub fn phases(&self) -> &[u16] {
        &self.phases
    }

    /// Turns the estimates into a calibration record, or refuses if they do
    /// not agree closely enough to be trusted.
    pub fn finish(mut self, threshold: u32) -> Result<CalibrationRecord, PhaseLockError> {
        if self.phases.is_empty() {
            return Err(PhaseLockError::Empty);
        }

        let mut variance = population_variance(&self.phases);
        log::debug!("Phase variance {}", variance);
        if variance > threshold {
            unwrap_phases(&mut self.phases);
            variance = population_variance(&self.phases);
            log::debug!("Phase variance after wrap correction {}", variance);
            if variance > threshold {
                return Err(PhaseLockError::Unstable { variance });
            }
        }

        let phase_offset = mean(&self.phases) % 360;
        let dc_offset = (self.dc_sum / self.phases.len() as u32) as u16;
        Ok(CalibrationRecord {
            phase_offset,
            dc_offset,
        })
    }
}
