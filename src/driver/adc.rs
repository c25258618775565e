use std::sync::Arc;

#[allow(deprecated)]
use esp_idf_hal::adc::attenuation::DB_11;
use esp_idf_hal::{
    adc::oneshot::{AdcChannelDriver, AdcDriver, config::AdcChannelConfig},
    gpio::ADCPin,
    peripheral::Peripheral,
};
use esp_idf_sys::*;

use crate::adc::{AdcChannel, AdcDivider, AdcFrontEnd};

type SharedAdc<A> = Arc<AdcDriver<'static, A>>;

/// Both front end channels on one ADC unit, read one conversion at a time
pub struct OneshotAdc<C, V>
where
    C: ADCPin,
    V: ADCPin<Adc = C::Adc>,
{
    current: AdcChannelDriver<'static, C, SharedAdc<C::Adc>>,
    voltage: AdcChannelDriver<'static, V, SharedAdc<C::Adc>>,
}

impl<C, V> OneshotAdc<C, V>
where
    C: ADCPin,
    V: ADCPin<Adc = C::Adc>,
{
    pub fn new(
        adc: impl Peripheral<P = C::Adc> + 'static,
        current_pin: impl Peripheral<P = C> + 'static,
        voltage_pin: impl Peripheral<P = V> + 'static,
    ) -> Result<Self, EspError> {
        log::info!("Initializing ADC");
        let adc = Arc::new(AdcDriver::new(adc)?);
        #[allow(deprecated)]
        let config = AdcChannelConfig {
            attenuation: DB_11,
            ..Default::default()
        };
        Ok(Self {
            current: AdcChannelDriver::new(adc.clone(), current_pin, &config)?,
            voltage: AdcChannelDriver::new(adc, voltage_pin, &config)?,
        })
    }
}

impl<C, V> AdcFrontEnd for OneshotAdc<C, V>
where
    C: ADCPin,
    V: ADCPin<Adc = C::Adc>,
{
    fn read(&mut self, channel: AdcChannel, _divider: AdcDivider) -> u16 {
        let raw = match channel {
            AdcChannel::Current => self.current.read_raw(),
            AdcChannel::Voltage => self.voltage.read_raw(),
        };
        match raw {
            // 12 bit conversions, left aligned to the 15 bit range the
            // dividers expect
            Ok(value) => (value & 0x0fff) << 3,
            Err(_) => 0,
        }
    }

    fn timestamp(&self) -> u32 {
        unsafe { esp_timer_get_time() as u32 }
    }
}
