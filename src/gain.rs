//! Closed-loop control of the current amplifier gain.

#[cfg(test)]
use mockall::automock;

use crate::config::{GainBounds, Thresholds};
use crate::sampler::{CURRENT_ONLY_CAPACITY, SampleBuffer};

/// Amplifier gain multipliers selectable through the digital pot
pub const GAIN_TABLE: [u8; 6] = [1, 2, 3, 5, 9, 17];

/// Programmable gain stage in front of the current ADC channel
#[cfg_attr(test, automock)]
pub trait Amplifier {
    /// Powers up the gain setting resistor
    fn enable(&mut self);
    fn disable(&mut self);
    fn set_gain(&mut self, multiplier: u8);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainSetting {
    TooLow,
    Ok,
    TooHigh,
}

/// Where the zero level of the current waveform comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baseline {
    /// Mean of the window being evaluated
    WindowAverage,
    /// Calibrated DC offset, already scaled to the window's resolution
    Fixed(u16),
}

impl Baseline {
    /// Baseline for normal operation. `dc_offset` is the calibrated 11 bit
    /// value, dual channel windows are one bit shorter.
    pub fn calibrated(dc_offset: u16, dual: bool, averaged_reference: bool) -> Self {
        match (averaged_reference, dual) {
            (true, _) => Baseline::WindowAverage,
            (false, false) => Baseline::Fixed(dc_offset),
            (false, true) => Baseline::Fixed(dc_offset >> 1),
        }
    }
}

pub struct GainController<M: Amplifier> {
    amplifier: M,
    index: usize,
    bounds: GainBounds,
    thresholds: Thresholds,
    adjusted: [i32; CURRENT_ONLY_CAPACITY],
    adjusted_len: usize,
}

impl<M: Amplifier> GainController<M> {
    pub fn new(amplifier: M, bounds: GainBounds, thresholds: Thresholds) -> Self {
        Self {
            amplifier,
            index: bounds.default_index,
            bounds,
            thresholds,
            adjusted: [0; CURRENT_ONLY_CAPACITY],
            adjusted_len: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn multiplier(&self) -> u8 {
        GAIN_TABLE[self.index]
    }

    /// Powers the amplifier and programs the current gain
    pub fn power_up(&mut self) {
        self.amplifier.enable();
        self.amplifier.set_gain(self.multiplier());
    }

    pub fn power_down(&mut self) {
        self.amplifier.disable();
    }

    /// Baseline-removed current samples of the last window that evaluated
    /// `Ok`. Partial after any other result.
    pub fn adjusted(&self) -> &[i32] {
        &self.adjusted[..self.adjusted_len]
    }

    pub fn evaluate(&mut self, window: &SampleBuffer, baseline: Baseline) -> GainSetting {
        let reference = match baseline {
            Baseline::WindowAverage => window.average_current(),
            Baseline::Fixed(dc) => dc,
        };
        self.evaluate_samples(window.current().iter().copied(), reference, window.is_dual())
    }

    /// Classifies a stream of samples and steps the gain index if needed.
    ///
    /// Stops consuming `samples` at the first one above the upper threshold.
    pub fn evaluate_samples(
        &mut self,
        samples: impl IntoIterator<Item = u16>,
        reference: u16,
        dual: bool,
    ) -> GainSetting {
        let (upper, lower) = if dual {
            (self.thresholds.upper >> 1, self.thresholds.lower >> 1)
        } else {
            (self.thresholds.upper, self.thresholds.lower)
        };

        let mut max = 0;
        self.adjusted_len = 0;
        for (i, sample) in samples.into_iter().take(CURRENT_ONLY_CAPACITY).enumerate() {
            let adjusted = sample as i32 - reference as i32;
            if adjusted > upper && self.index > self.bounds.min_index {
                self.step_to(self.index - 1);
                return GainSetting::TooHigh;
            }
            max = max.max(adjusted);
            self.adjusted[i] = adjusted;
            self.adjusted_len = i + 1;
        }

        if max < lower && self.index < self.bounds.max_index {
            self.step_to(self.index + 1);
            return GainSetting::TooLow;
        }
        GainSetting::Ok
    }

    fn step_to(&mut self, index: usize) {
        self.index = index.clamp(self.bounds.min_index, self.bounds.max_index);
        log::debug!("Amplifier gain now x{}", self.multiplier());
        self.amplifier.set_gain(self.multiplier());
    }
}
