use std::time::Duration;

use embedded_hal::digital::v2::OutputPin;

use crate::adc::AdcFrontEnd;
use crate::config::MeterConfig;
use crate::events::{Event, Mailbox, Notifier};
use crate::frontend::{OneShotTimer, SensorFrontEnd};
use crate::gain::{Amplifier, GainController};
use crate::gpio::EdgeInput;
use crate::power::CycleFailure;
use crate::sampler::Sampler;

/// Everything a task needs to capture a phase locked cycle. Owned by exactly
/// one task at a time.
pub struct Sensing<A, M, F, T, Z, L>
where
    A: AdcFrontEnd,
    M: Amplifier,
    F: SensorFrontEnd,
    T: OneShotTimer,
    Z: EdgeInput,
    L: OutputPin,
{
    pub sampler: Sampler<A>,
    pub gain: GainController<M>,
    pub front_end: F,
    pub timer: T,
    zero_cross: Z,
    led: L,
    pub mailbox: Mailbox,
}

impl<A, M, F, T, Z, L> Sensing<A, M, F, T, Z, L>
where
    A: AdcFrontEnd,
    M: Amplifier,
    F: SensorFrontEnd,
    T: OneShotTimer,
    Z: EdgeInput,
    L: OutputPin,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adc: A,
        amplifier: M,
        front_end: F,
        mut timer: T,
        mut zero_cross: Z,
        led: L,
        config: &MeterConfig,
    ) -> Self {
        let mailbox = Mailbox::default();
        timer.subscribe(Notifier::posting(mailbox.sender(), Event::TimerExpired));
        zero_cross.subscribe(Notifier::posting(mailbox.sender(), Event::ZeroCross));
        zero_cross.disarm();

        Self {
            sampler: Sampler::new(adc, config.sample_budget),
            gain: GainController::new(amplifier, config.gain_bounds, config.thresholds),
            front_end,
            timer,
            zero_cross,
            led,
            mailbox,
        }
    }

    pub fn arm(&mut self, after: Duration) {
        self.timer.arm(after);
    }

    /// Parks the task until the cycle timer fires
    pub fn sleep_until_expiry(&self) {
        while let Some(event) = self.mailbox.next() {
            if event == Event::TimerExpired {
                return;
            }
            log::debug!("Ignoring {:?} while sleeping", event);
        }
    }

    /// Powers the amplifier, enables the comparator and spins until the next
    /// rising zero-cross. Sampling has to start right after this returns.
    ///
    /// Only an edge seen after arming counts, anything already queued is
    /// thrown away first.
    pub fn sync_to_zero_cross(&mut self, timeout: Duration) -> Result<(), CycleFailure> {
        self.gain.power_up();
        self.front_end.set_comparator(true);
        self.mailbox.drain();
        self.zero_cross.arm();

        if self.mailbox.spin_for(Event::ZeroCross, timeout) {
            Ok(())
        } else {
            self.zero_cross.disarm();
            self.front_end.set_comparator(false);
            log::error!("No zero-cross within {:?}, is mains present?", timeout);
            Err(CycleFailure::ZeroCrossTimeout)
        }
    }

    pub fn set_led(&mut self, on: bool) {
        let result = if on { self.led.set_high() } else { self.led.set_low() };
        if result.is_err() {
            log::warn!("Could not switch status LED");
        }
    }

    /// Logs the last capture verbatim for offline analysis
    pub fn dump_capture(&self) {
        let Some(capture) = self.sampler.last_capture() else {
            return;
        };
        log::info!(target: "phasemeter::dump", "ADC reference: {}", capture.average_current());
        log::info!(
            target: "phasemeter::dump",
            "Time difference: {}",
            capture.sample_period_ticks()
        );
        log::info!(target: "phasemeter::dump", "INA Gain: {}", self.gain.multiplier());
        for sample in capture.current() {
            log::info!(target: "phasemeter::dump", "Current reading: {}", sample);
        }
        for sample in capture.voltage() {
            log::info!(target: "phasemeter::dump", "Voltage reading: {}", sample);
        }
    }
}
