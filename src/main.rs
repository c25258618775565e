#![allow(unexpected_cfgs)]

use embedded_svc::wifi::{ClientConfiguration, Configuration};
use esp_idf_hal::gpio::{InterruptType, PinDriver, Pull};
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::prelude::*;
use esp_idf_svc::espnow::EspNow;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::EspWifi;
use phasemeter::driver::{
    adc::OneshotAdc, amplifier::Ad5274Amplifier, frontend::GpioFrontEnd, gpio::InterruptPin,
    radio::EspNowTransmitter, storage::NvsCalibrationStorage, timer::TaskTimer,
};
use phasemeter::frontend::NoBatteryPack;
use phasemeter::logger::install_logger;
use phasemeter::*;

mod settings;

esp_idf_sys::esp_app_desc! {}

fn main() -> Result<(), anyhow::Error> {
    esp_idf_svc::sys::link_patches();

    let peripherals = esp_idf_hal::peripherals::Peripherals::take()?;
    let pins = peripherals.pins;
    let partition = EspDefaultNvsPartition::take()?;

    // Load configuration from NVS before logging so the level is known
    let config = settings::load(partition.clone())?;
    let _ring = install_logger(config.run_mode)?;
    log::info!("{config:?}");

    // ESP-NOW needs the radio up, no association
    let mut wifi = EspWifi::new(
        peripherals.modem,
        EspSystemEventLoop::take()?,
        Some(partition.clone()),
    )?;
    wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
    wifi.start()?;
    let radio = EspNowTransmitter::new(EspNow::take()?)?;

    let mut zero_cross = PinDriver::input(pins.gpio2)?;
    zero_cross.set_pull(Pull::Floating)?;
    let mut ready_in = PinDriver::input(pins.gpio3)?;
    ready_in.set_pull(Pull::Down)?;

    let i2c = I2cDriver::new(
        peripherals.i2c0,
        pins.gpio8,
        pins.gpio9,
        &I2cConfig::new().baudrate(400.kHz().into()),
    )?;

    let meter = Meter::new(
        MeterPeripherals {
            adc: OneshotAdc::new(peripherals.adc1, pins.gpio0, pins.gpio1)?,
            amplifier: Ad5274Amplifier::new(i2c),
            front_end: GpioFrontEnd::new(
                pins.gpio6.into(),
                pins.gpio7.into(),
                pins.gpio10.into(),
                pins.gpio18.into(),
                pins.gpio19.into(),
            )?,
            timer: TaskTimer::new()?,
            zero_cross: InterruptPin::new(zero_cross, InterruptType::PosEdge)?,
            status_led: PinDriver::output(pins.gpio5)?,
            ready_in: InterruptPin::new(ready_in, InterruptType::NegEdge)?,
            ready_out: PinDriver::output_od(pins.gpio4)?,
            battery: NoBatteryPack,
            radio,
            storage: NvsCalibrationStorage::new(partition)?,
        },
        config,
    );

    // Only comes back on a fault
    let error = meter.run();
    log::error!("Meter stopped: {error}");
    loop {
        std::thread::park();
    }
}
