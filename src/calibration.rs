//! First-boot calibration of phase and DC offset.
//!
//! Runs once per device lifetime. The result is written to storage and never
//! revisited, so a bad lock is a hard fault rather than a retry.

use std::time::Duration;

use embedded_hal::digital::v2::OutputPin;
use thiserror::Error;

use crate::adc::AdcFrontEnd;
use crate::config::{MeterConfig, RunMode};
use crate::frontend::{OneShotTimer, SensorFrontEnd, power_down_sensing};
use crate::gain::{Amplifier, Baseline, GainSetting};
use crate::gpio::EdgeInput;
use crate::phase::{PhaseAccumulator, PhaseLockError, best_phase};
use crate::sampler::SamplerError;
use crate::sensing::Sensing;
use crate::storage::{CalibrationRecord, CalibrationStorage, CalibrationStore, StorageError};

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    PhaseLock(#[from] PhaseLockError),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
}

#[derive(Debug, PartialEq, Eq)]
pub enum CalibrationStep {
    Continue,
    Done(CalibrationRecord),
}

pub struct CalibrationTask<'a, A, M, F, T, Z, L>
where
    A: AdcFrontEnd,
    M: Amplifier,
    F: SensorFrontEnd,
    T: OneShotTimer,
    Z: EdgeInput,
    L: OutputPin,
{
    sensing: &'a mut Sensing<A, M, F, T, Z, L>,
    config: &'a MeterConfig,
    accumulator: PhaseAccumulator,
    cycles: usize,
}

impl<'a, A, M, F, T, Z, L> CalibrationTask<'a, A, M, F, T, Z, L>
where
    A: AdcFrontEnd,
    M: Amplifier,
    F: SensorFrontEnd,
    T: OneShotTimer,
    Z: EdgeInput,
    L: OutputPin,
{
    pub fn new(sensing: &'a mut Sensing<A, M, F, T, Z, L>, config: &'a MeterConfig) -> Self {
        Self {
            sensing,
            config,
            accumulator: PhaseAccumulator::new(config.calibration_cycles),
            cycles: 0,
        }
    }

    /// Cycles that passed gain control so far
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    /// Runs until a record is stored or calibration proves impossible.
    /// In data dump mode this never returns.
    pub fn run<S: CalibrationStorage>(
        &mut self,
        store: &mut CalibrationStore<S>,
    ) -> Result<CalibrationRecord, CalibrationError> {
        self.start(store)?;
        loop {
            self.sensing.sleep_until_expiry();
            if let CalibrationStep::Done(record) = self.step(store)? {
                return Ok(record);
            }
        }
    }

    pub fn start<S: CalibrationStorage>(
        &mut self,
        store: &mut CalibrationStore<S>,
    ) -> Result<(), CalibrationError> {
        log::info!(
            "Uncalibrated device, collecting {} cycles",
            self.config.calibration_cycles
        );
        store.prepare()?;
        self.sensing.set_led(true);

        let front_end = &mut self.sensing.front_end;
        front_end.set_voltage_reference(true);
        front_end.set_voltage_sense(true);
        front_end.set_current_sense(true);
        self.sensing
            .arm(Duration::from_millis(self.config.calibration_warmup_ms));
        Ok(())
    }

    /// One calibration cycle, called on every timer expiry
    pub fn step<S: CalibrationStorage>(
        &mut self,
        store: &mut CalibrationStore<S>,
    ) -> Result<CalibrationStep, CalibrationError> {
        self.sensing.set_led(true);
        let setting = self.capture()?;
        self.sensing.set_led(false);

        let Some(setting) = setting else {
            self.sensing
                .arm(Duration::from_millis(self.config.calibration_retry_ms));
            return Ok(CalibrationStep::Continue);
        };
        if setting != GainSetting::Ok {
            log::debug!("Gain {:?}, now x{}", setting, self.sensing.gain.multiplier());
            self.sensing
                .arm(Duration::from_millis(self.config.calibration_retry_ms));
            return Ok(CalibrationStep::Continue);
        }

        match self.config.run_mode {
            RunMode::DataDump => self.sensing.dump_capture(),
            RunMode::Normal | RunMode::Debug => {
                if let Some(capture) = self.sensing.sampler.last_capture() {
                    let (phase, dc) = best_phase(capture.current());
                    self.accumulator.push(phase, dc);
                }
            }
        }
        self.cycles += 1;

        if self.config.run_mode == RunMode::DataDump || !self.accumulator.is_full() {
            self.sensing
                .arm(Duration::from_millis(self.config.calibration_interval_ms));
            return Ok(CalibrationStep::Continue);
        }

        self.finish(store).map(CalibrationStep::Done)
    }

    /// Captures a window right after the zero-cross. `None` if mains never
    /// showed up.
    fn capture(&mut self) -> Result<Option<GainSetting>, CalibrationError> {
        let synced = self.sensing.sync_to_zero_cross(self.config.zero_cross_timeout());
        if synced.is_err() {
            self.sensing.gain.power_down();
            return Ok(None);
        }

        let window = self.sensing.sampler.sample(false)?;
        self.sensing.front_end.set_comparator(false);
        let setting = self
            .sensing
            .gain
            .evaluate(&window, Baseline::WindowAverage);
        self.sensing.sampler.recycle(window);
        self.sensing.gain.power_down();
        Ok(Some(setting))
    }

    fn finish<S: CalibrationStorage>(
        &mut self,
        store: &mut CalibrationStore<S>,
    ) -> Result<CalibrationRecord, CalibrationError> {
        power_down_sensing(&mut self.sensing.front_end);

        if self.config.run_mode == RunMode::Debug {
            for phase in self.accumulator.phases() {
                log::debug!("phase sample: {}", phase);
            }
        }

        let accumulator = std::mem::take(&mut self.accumulator);
        let record = accumulator
            .finish(self.config.phase_variance_threshold)
            .inspect_err(|e| log::error!("Calibration failed: {}", e))?;
        store.persist(record)?;
        Ok(record)
    }
}
