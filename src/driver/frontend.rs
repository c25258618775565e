use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, Input, Level, Output, PinDriver, Pull};
use esp_idf_sys::EspError;

use crate::frontend::SensorFrontEnd;

type OutPin = PinDriver<'static, AnyOutputPin, Output>;

/// Load switches of the analog front end on plain GPIOs, active high
pub struct GpioFrontEnd {
    pub voltage_reference: OutPin,
    pub voltage_sense: OutPin,
    pub current_sense: OutPin,
    pub comparator: OutPin,
    /// Jumper selecting the external voltage input, active low
    pub external_select: PinDriver<'static, AnyIOPin, Input>,
}

impl GpioFrontEnd {
    pub fn new(
        voltage_reference: AnyOutputPin,
        voltage_sense: AnyOutputPin,
        current_sense: AnyOutputPin,
        comparator: AnyOutputPin,
        external_select: AnyIOPin,
    ) -> Result<Self, EspError> {
        let mut external_select = PinDriver::input(external_select)?;
        external_select.set_pull(Pull::Up)?;

        Ok(Self {
            voltage_reference: PinDriver::output(voltage_reference)?,
            voltage_sense: PinDriver::output(voltage_sense)?,
            current_sense: PinDriver::output(current_sense)?,
            comparator: PinDriver::output(comparator)?,
            external_select,
        })
    }
}

fn switch(pin: &mut OutPin, name: &str, enabled: bool) {
    if let Err(e) = pin.set_level(Level::from(enabled)) {
        log::warn!("Could not switch {}: {}", name, e);
    }
}

impl SensorFrontEnd for GpioFrontEnd {
    fn set_voltage_reference(&mut self, enabled: bool) {
        switch(&mut self.voltage_reference, "voltage reference", enabled);
    }

    fn set_voltage_sense(&mut self, enabled: bool) {
        switch(&mut self.voltage_sense, "voltage sense", enabled);
    }

    fn set_current_sense(&mut self, enabled: bool) {
        switch(&mut self.current_sense, "current sense", enabled);
    }

    fn set_comparator(&mut self, enabled: bool) {
        switch(&mut self.comparator, "comparator", enabled);
    }

    fn external_voltage_selected(&self) -> bool {
        self.external_select.is_low()
    }
}
