use embedded_hal::digital::v2::OutputPin;
use serde::Serialize;
use std::{
    fmt::Display,
    sync::{Arc, Mutex},
};
use thiserror::Error;

use adc::AdcFrontEnd;
use calibration::{CalibrationError, CalibrationTask};
use config::MeterConfig;
use controller::MeasurementTask;
use frontend::{BatteryPack, OneShotTimer, SensorFrontEnd};
use gain::Amplifier;
use gpio::{EdgeInput, PeerLink};
use reading::Transmitter;
use sensing::Sensing;
use storage::{CalibrationRecord, CalibrationStorage, CalibrationStore, StorageError};

pub mod adc;
pub mod calibration;
pub mod config;
pub mod controller;
pub mod events;
pub mod frontend;
pub mod gain;
pub mod gpio;
pub mod logger;
pub mod phase;
pub mod power;
pub mod reading;
pub mod reference;
pub mod sampler;
pub mod sensing;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(target_arch = "riscv32")]
pub mod driver;

pub struct MeterPeripherals<A, M, F, T, Z, L, P, R, B, X, S>
where
    A: AdcFrontEnd,
    M: Amplifier,
    F: SensorFrontEnd,
    T: OneShotTimer,
    Z: EdgeInput,
    L: OutputPin,
    P: EdgeInput,
    R: OutputPin,
    B: BatteryPack,
    X: Transmitter,
    S: CalibrationStorage,
{
    /// Current and voltage channels
    pub adc: A,
    /// Digital pot setting the current amplifier gain
    pub amplifier: M,
    pub front_end: F,
    /// Real-time timer driving every state transition
    pub timer: T,
    /// Mains zero-cross comparator output
    pub zero_cross: Z,
    pub status_led: L,
    /// Shared ready line, input and open drain output
    pub ready_in: P,
    pub ready_out: R,
    pub battery: B,
    pub radio: X,
    /// Calibration page
    pub storage: S,
}

/// Selected once per boot from the calibration page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    Calibration,
    Measurement(CalibrationRecord),
}

pub fn boot<S: CalibrationStorage>(store: &CalibrationStore<S>) -> Result<BootMode, StorageError> {
    Ok(match store.load()? {
        Some(record) => BootMode::Measurement(record),
        None => BootMode::Calibration,
    })
}

#[derive(PartialEq, Debug, Copy, Clone, Default, Serialize)]
pub enum DeviceState {
    #[default]
    Booting,
    Calibrating,
    Measuring,
    /// Terminal. Calibration could not be trusted or storage failed.
    Faulted,
}

impl Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{self:?}"))
    }
}

#[derive(Debug, Error)]
pub enum MeterError {
    #[error("calibration failed: {0}")]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("measurement task stopped")]
    Stopped,
}

pub struct Meter<A, M, F, T, Z, L, P, R, B, X, S>
where
    A: AdcFrontEnd,
    M: Amplifier,
    F: SensorFrontEnd,
    T: OneShotTimer,
    Z: EdgeInput,
    L: OutputPin,
    P: EdgeInput,
    R: OutputPin,
    B: BatteryPack,
    X: Transmitter,
    S: CalibrationStorage,
{
    sensing: Sensing<A, M, F, T, Z, L>,
    peers: PeerLink<P, R>,
    battery: B,
    radio: X,
    store: CalibrationStore<S>,
    config: MeterConfig,
    state: Arc<Mutex<DeviceState>>,
}

impl<A, M, F, T, Z, L, P, R, B, X, S> Meter<A, M, F, T, Z, L, P, R, B, X, S>
where
    A: AdcFrontEnd,
    M: Amplifier,
    F: SensorFrontEnd,
    T: OneShotTimer,
    Z: EdgeInput,
    L: OutputPin,
    P: EdgeInput,
    R: OutputPin,
    B: BatteryPack,
    X: Transmitter,
    S: CalibrationStorage,
{
    pub fn new(
        peripherals: MeterPeripherals<A, M, F, T, Z, L, P, R, B, X, S>,
        config: MeterConfig,
    ) -> Self {
        let mut sensing = Sensing::new(
            peripherals.adc,
            peripherals.amplifier,
            peripherals.front_end,
            peripherals.timer,
            peripherals.zero_cross,
            peripherals.status_led,
            &config,
        );
        frontend::power_down_sensing(&mut sensing.front_end);
        sensing.gain.power_down();

        Self {
            sensing,
            peers: PeerLink::new(peripherals.ready_in, peripherals.ready_out),
            battery: peripherals.battery,
            radio: peripherals.radio,
            store: CalibrationStore::new(peripherals.storage),
            config,
            state: Default::default(),
        }
    }

    pub fn state(&self) -> Arc<Mutex<DeviceState>> {
        self.state.clone()
    }

    fn set_state(&self, state: DeviceState) {
        log::info!("Device state {}", state);
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    pub fn boot(&self) -> Result<BootMode, MeterError> {
        Ok(boot(&self.store)?)
    }

    /// Loads the stored calibration, or runs the calibration task once if
    /// there is none. Any failure leaves the device faulted.
    pub fn calibration(&mut self) -> Result<CalibrationRecord, MeterError> {
        let result = self.load_or_calibrate();
        if let Err(e) = &result {
            log::error!("Halting: {}", e);
            self.set_state(DeviceState::Faulted);
        }
        result
    }

    fn load_or_calibrate(&mut self) -> Result<CalibrationRecord, MeterError> {
        match self.boot()? {
            BootMode::Measurement(record) => Ok(record),
            BootMode::Calibration => {
                self.set_state(DeviceState::Calibrating);
                let record =
                    CalibrationTask::new(&mut self.sensing, &self.config).run(&mut self.store)?;
                // Events left over from calibration mean nothing to the next task
                self.sensing.mailbox.drain();
                Ok(record)
            }
        }
    }

    /// One-way handover to normal operation
    pub fn into_measurement(
        self,
        record: CalibrationRecord,
    ) -> MeasurementTask<A, M, F, T, Z, L, P, R, B, X> {
        self.set_state(DeviceState::Measuring);
        MeasurementTask::new(
            self.sensing,
            self.peers,
            self.battery,
            self.radio,
            self.config,
            record,
        )
    }

    /// Device entry point. Only returns on a fault.
    pub fn run(mut self) -> MeterError {
        let record = match self.calibration() {
            Ok(record) => record,
            Err(e) => return e,
        };
        let state = self.state();
        self.into_measurement(record).run();
        if let Ok(mut current) = state.lock() {
            *current = DeviceState::Faulted;
        }
        MeterError::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeterConfig;
    use crate::controller::CycleState;
    use crate::events::Event;
    use crate::reference::{REFERENCE_TABLE, table_degree};
    use crate::storage::ERASED_WORD;
    use crate::testing::*;
    use std::sync::atomic::Ordering;

    type TestMeter = Meter<
        WaveformAdc,
        SharedAmplifier,
        FakeFrontEnd,
        InstantTimer,
        FakeEdge,
        RecordingPin,
        FakeEdge,
        RecordingPin,
        FakeBatteryPack,
        RecordingRadio,
        MemoryStorage,
    >;

    fn meter(
        adc: WaveformAdc,
        storage: MemoryStorage,
        radio: RecordingRadio,
        config: MeterConfig,
    ) -> TestMeter {
        Meter::new(
            MeterPeripherals {
                adc,
                amplifier: SharedAmplifier::default(),
                front_end: FakeFrontEnd::default(),
                timer: InstantTimer::default(),
                zero_cross: FakeEdge::firing(),
                status_led: RecordingPin::default(),
                ready_in: FakeEdge::default(),
                ready_out: RecordingPin::default(),
                battery: FakeBatteryPack::default(),
                radio,
                storage,
            },
            config,
        )
    }

    #[test]
    fn boot_mode_follows_storage() {
        let store = CalibrationStore::new(MemoryStorage::erased());
        assert_eq!(boot(&store).unwrap(), BootMode::Calibration);

        let store = CalibrationStore::new(MemoryStorage::with_word(0x0400_002f));
        assert_eq!(
            boot(&store).unwrap(),
            BootMode::Measurement(CalibrationRecord {
                phase_offset: 47,
                dc_offset: 1024
            })
        );
    }

    #[test]
    fn calibrated_device_skips_calibration() {
        let storage = MemoryStorage::with_word(0x0400_002f);
        let mut meter = meter(
            WaveformAdc::sine(47, 1024, 300),
            storage.clone(),
            Default::default(),
            MeterConfig::default(),
        );

        let record = meter.calibration().unwrap();
        assert_eq!(record.phase_offset, 47);
        assert_eq!(storage.erases.load(Ordering::Relaxed), 0);
        assert_eq!(*meter.state().lock().unwrap(), DeviceState::Booting);
    }

    #[test]
    fn corrupt_record_faults() {
        let storage = MemoryStorage::with_word(0x0400_0200);
        let mut meter = meter(
            WaveformAdc::sine(0, 1024, 300),
            storage,
            Default::default(),
            MeterConfig::default(),
        );

        assert!(matches!(
            meter.calibration(),
            Err(MeterError::Storage(StorageError::Corrupt(_)))
        ));
        assert_eq!(*meter.state().lock().unwrap(), DeviceState::Faulted);
    }

    #[test]
    fn first_boot_calibrates_then_measures() {
        let config = MeterConfig {
            calibration_cycles: 32,
            ..Default::default()
        };
        let storage = MemoryStorage::erased();
        let radio = RecordingRadio::default();
        let mut meter = meter(
            WaveformAdc::sine(47, 1024, 300),
            storage.clone(),
            radio.clone(),
            config.clone(),
        );

        let record = meter.calibration().unwrap();
        assert_eq!(record.phase_offset, 47);
        assert_eq!(record.dc_offset, 1024);
        assert_ne!(*storage.word.lock().unwrap(), ERASED_WORD);

        let mut task = meter.into_measurement(record);
        task.start();
        task.handle(Event::TimerExpired);
        task.handle(Event::TimerExpired);
        task.handle(Event::TimerExpired);
        assert_eq!(task.state(), CycleState::MeterLedBlink);
        assert_eq!(radio.sent.lock().unwrap().len(), 1);

        // Next boot reads the record back
        let mut again = self::meter(
            WaveformAdc::sine(47, 1024, 300),
            storage.clone(),
            Default::default(),
            config,
        );
        assert_eq!(again.calibration().unwrap(), record);
        assert_eq!(storage.programs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn calibration_straddling_the_seam_faults() {
        let config = MeterConfig {
            calibration_cycles: 32,
            ..Default::default()
        };
        // Estimates alternate between 330 and 60: the wrap correction cannot
        // bring them together
        let adc = WaveformAdc::new(|r| {
            let phase = if r.cycle % 2 == 0 { 330 } else { 60 };
            (1024 + 2 * REFERENCE_TABLE[table_degree(r.index, phase)] as i32) as u16
        });
        let storage = MemoryStorage::erased();
        let meter = meter(adc, storage.clone(), Default::default(), config);
        let state = meter.state();

        assert!(matches!(
            meter.run(),
            MeterError::Calibration(CalibrationError::PhaseLock(_))
        ));
        assert_eq!(*state.lock().unwrap(), DeviceState::Faulted);
        assert_eq!(storage.programs.load(Ordering::Relaxed), 0);
        assert_eq!(*storage.word.lock().unwrap(), ERASED_WORD);
    }
}
