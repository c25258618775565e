use std::time::Duration;

use embedded_hal::digital::v2::OutputPin;

use crate::adc::AdcFrontEnd;
use crate::config::{MeterConfig, RunMode};
use crate::events::{Event, Notifier};
use crate::frontend::{BatteryPack, OneShotTimer, SensorFrontEnd, power_down_sensing};
use crate::gain::Amplifier;
use crate::gpio::{EdgeInput, PeerLink};
use crate::power::{CycleFailure, PowerCalculator, PowerMode};
use crate::reading::{CycleStatus, Reading, Transmitter};
use crate::sensing::Sensing;
use crate::storage::CalibrationRecord;

/// Cycle period while dumping raw windows
const DATA_DUMP_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Init,
    WaitingVoltageStable,
    WaitingComparatorStable,
    BatteryLedBlink,
    MeterLedBlink,
}

/// Idle time between cycles. Shrinks when the peers keep being ready on the
/// first poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    interval_s: u8,
    floor_s: u8,
    history: u8,
}

impl BackoffState {
    const STREAK_MASK: u8 = 0x0f;

    pub fn new(initial_s: u8, floor_s: u8) -> Self {
        Self {
            interval_s: initial_s,
            floor_s,
            history: 0,
        }
    }

    /// Records whether this cycle's peer poll succeeded straight away
    pub fn record(&mut self, ready_on_first_poll: bool) {
        if ready_on_first_poll
            && self.history & Self::STREAK_MASK == Self::STREAK_MASK
            && self.interval_s > self.floor_s
        {
            self.interval_s = (self.interval_s >> 1).max(self.floor_s);
            log::debug!("Backoff now {}s", self.interval_s);
        }
        self.history = (self.history << 1) | ready_on_first_poll as u8;
    }

    pub fn interval_s(&self) -> u8 {
        self.interval_s
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_s as u64)
    }
}

/// Normal operation: one reading per cycle, forever.
pub struct MeasurementTask<A, M, F, T, Z, L, P, R, B, X>
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
{
    sensing: Sensing<A, M, F, T, Z, L>,
    peers: PeerLink<P, R>,
    battery: B,
    radio: X,
    config: MeterConfig,
    power: PowerCalculator,
    state: CycleState,
    backoff: BackoffState,
    sample_count: u32,
    nonce: u32,
}

impl<A, M, F, T, Z, L, P, R, B, X> MeasurementTask<A, M, F, T, Z, L, P, R, B, X>
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
{
    pub fn new(
        sensing: Sensing<A, M, F, T, Z, L>,
        mut peers: PeerLink<P, R>,
        battery: B,
        radio: X,
        config: MeterConfig,
        calibration: CalibrationRecord,
    ) -> Self {
        peers.subscribe(Notifier::posting(sensing.mailbox.sender(), Event::PeersReady));
        let power = PowerCalculator {
            calibration,
            averaged_reference: config.averaged_reference,
            subcycles: config.external_subcycles,
        };
        let backoff = BackoffState::new(config.initial_backoff_s, config.min_backoff_s);

        Self {
            sensing,
            peers,
            battery,
            radio,
            config,
            power,
            state: CycleState::Init,
            backoff,
            sample_count: 0,
            nonce: 0,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn backoff(&self) -> &BackoffState {
        &self.backoff
    }

    /// Cycles attempted since boot
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn start(&mut self) {
        log::info!(
            "Measuring with phase {} deg, dc {}",
            self.power.calibration.phase_offset,
            self.power.calibration.dc_offset
        );
        self.peers.signal_ready();
        self.state = CycleState::Init;
        self.sensing
            .arm(Duration::from_millis(self.config.startup_delay_ms));
    }

    /// Runs until the mailbox goes away, which only happens on teardown
    pub fn run(&mut self) {
        self.start();
        while let Some(event) = self.sensing.mailbox.next() {
            self.handle(event);
        }
        log::error!("Mailbox closed, measurement stopped");
    }

    pub fn handle(&mut self, event: Event) {
        self.state = match (self.state, event) {
            (CycleState::Init, Event::TimerExpired) => {
                if self.peers.all_ready() {
                    self.begin_cycle(true)
                } else {
                    log::debug!("Peers not ready, waiting for the ready line");
                    self.peers.arm();
                    CycleState::Init
                }
            }
            (CycleState::Init, Event::PeersReady) => self.begin_cycle(false),
            (CycleState::WaitingVoltageStable, Event::TimerExpired) => {
                self.sensing.front_end.set_current_sense(true);
                self.sensing.arm(self.config.current_settle());
                CycleState::WaitingComparatorStable
            }
            (CycleState::WaitingComparatorStable, Event::TimerExpired) => self.measure_cycle(),
            (CycleState::BatteryLedBlink, Event::TimerExpired) => {
                self.battery.set_power(false);
                self.sensing.arm(self.backoff.interval());
                CycleState::Init
            }
            (CycleState::MeterLedBlink, Event::TimerExpired) => {
                self.sensing.set_led(false);
                let idle = match self.config.run_mode {
                    RunMode::DataDump => DATA_DUMP_INTERVAL,
                    RunMode::Normal | RunMode::Debug => self.backoff.interval(),
                };
                self.sensing.arm(idle);
                CycleState::Init
            }
            (state, event) => {
                log::debug!("Ignoring {:?} in {:?}", event, state);
                state
            }
        };
    }

    fn begin_cycle(&mut self, ready_on_first_poll: bool) -> CycleState {
        self.sensing.front_end.set_voltage_reference(true);
        self.sensing.front_end.set_voltage_sense(true);
        self.sensing.arm(self.config.voltage_settle());
        self.backoff.record(ready_on_first_poll);
        CycleState::WaitingVoltageStable
    }

    fn measure_cycle(&mut self) -> CycleState {
        let external =
            self.config.external_voltage && self.sensing.front_end.external_voltage_selected();
        let status = CycleStatus::new(
            self.sample_count == 0,
            external,
            self.battery.is_attached(),
            self.config.three_phase_role,
        );
        let mode = if external {
            PowerMode::ExternalVoltage
        } else {
            PowerMode::InternalReference
        };

        let result = self.acquire(mode);
        self.sample_count = self.sample_count.wrapping_add(1);
        power_down_sensing(&mut self.sensing.front_end);
        self.sensing.gain.power_down();
        self.sensing.arm(self.config.led_blink());

        match result {
            Ok(power_mw) => {
                self.report(status, power_mw);
                if status.first_sample() && self.battery.is_usb_attached() {
                    self.battery.set_power(true);
                    self.battery.led_on();
                    CycleState::BatteryLedBlink
                } else {
                    self.sensing.set_led(true);
                    CycleState::MeterLedBlink
                }
            }
            Err(failure) => {
                log::warn!("Cycle {} failed: {}", self.sample_count, failure);
                if status.battery_pack() {
                    self.battery.set_power(false);
                }
                CycleState::MeterLedBlink
            }
        }
    }

    /// Samples until the gain settles, resyncing to mains for every attempt
    fn acquire(&mut self, mode: PowerMode) -> Result<u32, CycleFailure> {
        let timeout = self.config.zero_cross_timeout();
        let mut attempts = self.config.gain_retries.max(1);
        loop {
            self.sensing.sync_to_zero_cross(timeout)?;
            match self
                .power
                .measure(&mut self.sensing.sampler, &mut self.sensing.gain, mode)
            {
                Err(CycleFailure::GainUnsettled(setting)) if attempts > 1 => {
                    log::debug!(
                        "Gain {:?}, resampling at x{}",
                        setting,
                        self.sensing.gain.multiplier()
                    );
                    attempts -= 1;
                }
                result => return result,
            }
        }
    }

    fn report(&mut self, status: CycleStatus, power_mw: u32) {
        if self.config.run_mode == RunMode::DataDump {
            self.sensing.dump_capture();
            return;
        }

        let location = if status.battery_pack() {
            self.battery.set_power(true);
            let location = (self.battery.panel_id(), self.battery.circuit_id());
            self.battery.set_power(false);
            Some(location)
        } else {
            None
        };

        let reading = Reading {
            status,
            power_mw,
            device_id: self.config.device_id,
            nonce: self.nonce,
            location,
        };
        self.nonce = self.nonce.wrapping_add(1);
        log::info!("Average power {} mW (status {:#06x})", power_mw, status.bits());
        self.radio.transmit(&reading);
    }
}
