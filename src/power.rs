use thiserror::Error;

use crate::adc::AdcFrontEnd;
use crate::gain::{Amplifier, Baseline, GainController, GainSetting};
use crate::reference::reference_at;
use crate::sampler::{SampleBuffer, Sampler, SamplerError};
use crate::storage::CalibrationRecord;

/// ADC counts to milliamps at unity gain, 11 bit samples
pub const I_TRANSFORM: f32 = 48.34468;
/// ADC counts to volts on the external voltage input
pub const VOLTAGE_SCALE: f32 = 1.262;

/// Why a cycle produced no reading
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CycleFailure {
    #[error("gain still {0:?} after retries")]
    GainUnsettled(GainSetting),
    #[error("dual channel sub-cycle {index} failed gain control")]
    SubCycleFailed { index: u32 },
    #[error("no zero-cross edge within the wait bound")]
    ZeroCrossTimeout,
    #[error(transparent)]
    Sampler(#[from] SamplerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    /// Current only, voltage taken from the calibrated reference table
    InternalReference,
    /// Synchronous current and voltage capture
    ExternalVoltage,
}

/// Baseline-removed sample to milliamps
pub fn current_transform(adjusted: i32, gain: u8, dual: bool) -> f32 {
    let counts = if dual { adjusted * 2 } else { adjusted };
    counts as f32 * I_TRANSFORM / gain as f32
}

fn voltage_transform(sample: u16, reference: u16) -> i32 {
    ((sample as i32 - reference as i32) as f32 * VOLTAGE_SCALE) as i32
}

/// Average power against the reference table, before rectification
pub fn signed_internal_reference_power(adjusted: &[i32], phase_offset: u16, gain: u8) -> i32 {
    if adjusted.is_empty() {
        return 0;
    }
    let energy: f32 = adjusted
        .iter()
        .enumerate()
        .map(|(i, &a)| current_transform(a, gain, false) * reference_at(i, phase_offset) as f32)
        .sum();
    (energy / adjusted.len() as f32) as i32
}

/// Average power in mW. A negative sum means the current transformer sits the
/// other way round, which is folded back rather than reported.
pub fn internal_reference_power(adjusted: &[i32], phase_offset: u16, gain: u8) -> u32 {
    signed_internal_reference_power(adjusted, phase_offset, gain).unsigned_abs()
}

/// Average power in mW from a dual channel window and its adjusted current
pub fn external_voltage_power(adjusted: &[i32], window: &SampleBuffer, gain: u8) -> u32 {
    if adjusted.is_empty() {
        return 0;
    }
    let voltage_reference = window.average_voltage();
    let energy: f32 = adjusted
        .iter()
        .enumerate()
        .map(|(j, &a)| {
            current_transform(a, gain, true)
                * voltage_transform(window.voltage_aligned(j), voltage_reference) as f32
        })
        .sum();
    ((energy / adjusted.len() as f32) as i32).unsigned_abs()
}

#[derive(Debug, Clone, Copy)]
pub struct PowerCalculator {
    pub calibration: CalibrationRecord,
    pub averaged_reference: bool,
    pub subcycles: u32,
}

impl PowerCalculator {
    /// One attempt at a reading. Must run right after the zero-cross edge.
    ///
    /// Gain changes are kept, so the caller can resync and try again.
    pub fn measure<A: AdcFrontEnd, M: Amplifier>(
        &self,
        sampler: &mut Sampler<A>,
        gain: &mut GainController<M>,
        mode: PowerMode,
    ) -> Result<u32, CycleFailure> {
        match mode {
            PowerMode::InternalReference => self.measure_internal(sampler, gain),
            PowerMode::ExternalVoltage => self.measure_external(sampler, gain),
        }
    }

    fn measure_internal<A: AdcFrontEnd, M: Amplifier>(
        &self,
        sampler: &mut Sampler<A>,
        gain: &mut GainController<M>,
    ) -> Result<u32, CycleFailure> {
        let window = sampler.sample(false)?;
        let baseline =
            Baseline::calibrated(self.calibration.dc_offset, false, self.averaged_reference);
        let setting = gain.evaluate(&window, baseline);
        sampler.recycle(window);

        match setting {
            GainSetting::Ok => Ok(internal_reference_power(
                gain.adjusted(),
                self.calibration.phase_offset,
                gain.multiplier(),
            )),
            other => Err(CycleFailure::GainUnsettled(other)),
        }
    }

    fn measure_external<A: AdcFrontEnd, M: Amplifier>(
        &self,
        sampler: &mut Sampler<A>,
        gain: &mut GainController<M>,
    ) -> Result<u32, CycleFailure> {
        let baseline =
            Baseline::calibrated(self.calibration.dc_offset, true, self.averaged_reference);
        let mut total = 0u32;
        for index in 0..self.subcycles {
            let window = sampler.sample(true)?;
            let setting = gain.evaluate(&window, baseline);
            let power = (setting == GainSetting::Ok)
                .then(|| external_voltage_power(gain.adjusted(), &window, gain.multiplier()));
            sampler.recycle(window);

            match power {
                Some(p) => total += p,
                None => return Err(CycleFailure::SubCycleFailed { index }),
            }
        }
        Ok(total >> self.subcycles.trailing_zeros())
    }
}
