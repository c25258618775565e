//! Deterministic stand-ins for the hardware, shared by the unit tests.

use std::{
    convert::Infallible,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
    },
    time::Duration,
};

use embedded_hal::digital::v2::OutputPin;

use crate::adc::{AdcChannel, AdcDivider, AdcFrontEnd};
use crate::events::Notifier;
use crate::frontend::{BatteryPack, OneShotTimer, SensorFrontEnd};
use crate::gain::Amplifier;
use crate::gpio::EdgeInput;
use crate::reading::{Reading, Transmitter};
use crate::reference::{REFERENCE_TABLE, table_degree};
use crate::storage::{CalibrationStorage, ERASED_WORD, StorageError};

/// Position of one conversion inside the capture sequence
#[derive(Debug, Clone, Copy)]
pub struct AdcRead {
    pub channel: AdcChannel,
    pub cycle: usize,
    pub index: usize,
}

/// `dc + amplitude * sin(3 * index + phase)`, amplitude in output counts
pub fn sine_point(index: usize, phase: u16, dc: i32, amplitude: i32) -> u16 {
    (dc + amplitude * REFERENCE_TABLE[table_degree(index, phase)] as i32 / 170) as u16
}

/// ADC replaying a synthetic waveform, one window per capture
pub struct WaveformAdc {
    current_reads: usize,
    tick: u32,
    wave: Box<dyn FnMut(AdcRead) -> u16 + Send>,
}

impl WaveformAdc {
    pub fn new(wave: impl FnMut(AdcRead) -> u16 + Send + 'static) -> Self {
        Self {
            current_reads: 0,
            tick: 0,
            wave: Box::new(wave),
        }
    }

    /// Current only waveform
    pub fn sine(phase: u16, dc: i32, amplitude: i32) -> Self {
        Self::new(move |r| sine_point(r.index, phase, dc, amplitude))
    }

    /// In-phase current and voltage
    pub fn dual(
        current_dc: i32,
        current_amplitude: i32,
        voltage_dc: i32,
        voltage_amplitude: i32,
    ) -> Self {
        Self::new(move |r| match r.channel {
            AdcChannel::Current => sine_point(r.index, 0, current_dc, current_amplitude),
            AdcChannel::Voltage => sine_point(r.index, 0, voltage_dc, voltage_amplitude),
        })
    }
}

impl AdcFrontEnd for WaveformAdc {
    fn read(&mut self, channel: AdcChannel, divider: AdcDivider) -> u16 {
        let len = match divider {
            AdcDivider::Div512 => 120,
            AdcDivider::Div256 => 113,
        };
        if channel == AdcChannel::Current {
            self.current_reads += 1;
        }
        let n = self.current_reads.saturating_sub(1);
        let value = (self.wave)(AdcRead {
            channel,
            cycle: n / len,
            index: n % len,
        });
        ((value as u32) << divider.shift()).min(0xffff) as u16
    }

    fn timestamp(&self) -> u32 {
        self.tick
    }
}

/// Amplifier publishing its gain so a waveform can react to it
#[derive(Clone, Default)]
pub struct SharedAmplifier {
    pub gain: Arc<AtomicU8>,
    pub changes: Arc<AtomicUsize>,
    pub enabled: Arc<AtomicBool>,
}

impl Amplifier for SharedAmplifier {
    fn enable(&mut self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    fn disable(&mut self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    fn set_gain(&mut self, multiplier: u8) {
        self.gain.store(multiplier, Ordering::Relaxed);
        self.changes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Timer that expires as soon as it is armed
#[derive(Default)]
pub struct InstantTimer {
    pub notifier: Option<Notifier>,
    pub armed: Arc<Mutex<Vec<Duration>>>,
}

impl OneShotTimer for InstantTimer {
    fn subscribe(&mut self, notifier: Notifier) {
        self.notifier = Some(notifier);
    }

    fn arm(&mut self, after: Duration) {
        self.armed.lock().unwrap().push(after);
        if let Some(n) = &self.notifier {
            n.notify();
        }
    }
}

/// Edge input with a settable level. Fires right away on `arm` when
/// `fire_on_arm` is set.
#[derive(Default)]
pub struct FakeEdge {
    pub notifier: Option<Notifier>,
    pub high: Arc<AtomicBool>,
    pub fire_on_arm: bool,
    pub arms: Arc<AtomicUsize>,
}

impl FakeEdge {
    pub fn firing() -> Self {
        Self {
            fire_on_arm: true,
            ..Default::default()
        }
    }
}

impl EdgeInput for FakeEdge {
    fn subscribe(&mut self, notifier: Notifier) {
        self.notifier = Some(notifier);
    }

    fn arm(&mut self) {
        self.arms.fetch_add(1, Ordering::Relaxed);
        if self.fire_on_arm {
            if let Some(n) = &self.notifier {
                n.notify();
            }
        }
    }

    fn disarm(&mut self) {}

    fn is_high(&self) -> bool {
        self.high.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Default)]
pub struct RecordingPin {
    pub levels: Arc<Mutex<Vec<bool>>>,
}

impl OutputPin for RecordingPin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        self.levels.lock().unwrap().push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.levels.lock().unwrap().push(true);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeFrontEnd {
    pub external_selected: bool,
    pub log: Arc<Mutex<Vec<(&'static str, bool)>>>,
}

impl FakeFrontEnd {
    fn record(&self, what: &'static str, enabled: bool) {
        self.log.lock().unwrap().push((what, enabled));
    }
}

impl SensorFrontEnd for FakeFrontEnd {
    fn set_voltage_reference(&mut self, enabled: bool) {
        self.record("vref", enabled);
    }

    fn set_voltage_sense(&mut self, enabled: bool) {
        self.record("voltage", enabled);
    }

    fn set_current_sense(&mut self, enabled: bool) {
        self.record("current", enabled);
    }

    fn set_comparator(&mut self, enabled: bool) {
        self.record("comparator", enabled);
    }

    fn external_voltage_selected(&self) -> bool {
        self.external_selected
    }
}

/// Flash word in RAM
#[derive(Clone)]
pub struct MemoryStorage {
    pub word: Arc<Mutex<u32>>,
    pub erases: Arc<AtomicUsize>,
    pub programs: Arc<AtomicUsize>,
}

impl MemoryStorage {
    pub fn with_word(word: u32) -> Self {
        Self {
            word: Arc::new(Mutex::new(word)),
            erases: Default::default(),
            programs: Default::default(),
        }
    }

    pub fn erased() -> Self {
        Self::with_word(ERASED_WORD)
    }
}

impl CalibrationStorage for MemoryStorage {
    fn read_word(&self) -> Result<u32, StorageError> {
        Ok(*self.word.lock().unwrap())
    }

    fn erase_page(&mut self) -> Result<(), StorageError> {
        self.erases.fetch_add(1, Ordering::Relaxed);
        *self.word.lock().unwrap() = ERASED_WORD;
        Ok(())
    }

    fn program_word(&mut self, word: u32) -> Result<(), StorageError> {
        self.programs.fetch_add(1, Ordering::Relaxed);
        // Programming can only clear bits
        *self.word.lock().unwrap() &= word;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingRadio {
    pub sent: Arc<Mutex<Vec<Reading>>>,
}

impl Transmitter for RecordingRadio {
    fn transmit(&mut self, reading: &Reading) {
        self.sent.lock().unwrap().push(reading.clone());
    }
}

#[derive(Clone, Default)]
pub struct FakeBatteryPack {
    pub attached: bool,
    pub usb: bool,
    pub powered: Arc<Mutex<Vec<bool>>>,
    pub led: Arc<AtomicBool>,
}

impl BatteryPack for FakeBatteryPack {
    fn is_attached(&self) -> bool {
        self.attached
    }

    fn is_usb_attached(&self) -> bool {
        self.usb
    }

    fn set_power(&mut self, enabled: bool) {
        self.powered.lock().unwrap().push(enabled);
    }

    fn led_on(&mut self) {
        self.led.store(true, Ordering::Relaxed);
    }

    fn panel_id(&mut self) -> u8 {
        3
    }

    fn circuit_id(&mut self) -> u8 {
        12
    }
}
