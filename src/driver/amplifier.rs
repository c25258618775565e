use esp_idf_hal::{delay::BLOCK, i2c::I2cDriver};

use crate::gain::Amplifier;

/// AD5274 with the ADDR pin floating
const AD5274_ADDRESS: u8 = 0x2c;
const CMD_WRITE_RDAC: u16 = 0x1 << 10;
const CMD_WRITE_CONTROL: u16 = 0x7 << 10;
const CMD_SHUTDOWN: u16 = 0x9 << 10;
/// Control register bit allowing RDAC updates over the bus
const CONTROL_RDAC_WRITE: u16 = 0x002;

/// End to end resistance, and the feedback resistor fixing the gain as
/// `1 + FEEDBACK / rdac`
const FULL_SCALE_OHMS: u32 = 100_000;
const FEEDBACK_OHMS: u32 = 100_000;
const RDAC_STEPS: u32 = 256;

/// Instrumentation amplifier whose gain resistor is an AD5274 rheostat
pub struct Ad5274Amplifier {
    i2c: I2cDriver<'static>,
}

impl Ad5274Amplifier {
    pub fn new(i2c: I2cDriver<'static>) -> Self {
        Self { i2c }
    }

    fn command(&mut self, frame: u16) {
        if let Err(e) = self.i2c.write(AD5274_ADDRESS, &frame.to_be_bytes(), BLOCK) {
            log::warn!("AD5274 write {:#06x} failed: {}", frame, e);
        }
    }
}

/// RDAC code for a gain multiplier. Unity gain is the open rheostat.
pub fn rdac_code(multiplier: u8) -> u16 {
    if multiplier <= 1 {
        return (RDAC_STEPS - 1) as u16;
    }
    let ohms = FEEDBACK_OHMS / (multiplier as u32 - 1);
    (ohms * RDAC_STEPS / FULL_SCALE_OHMS).clamp(1, RDAC_STEPS - 1) as u16
}

impl Amplifier for Ad5274Amplifier {
    fn enable(&mut self) {
        self.command(CMD_SHUTDOWN);
        self.command(CMD_WRITE_CONTROL | CONTROL_RDAC_WRITE);
    }

    fn disable(&mut self) {
        self.command(CMD_SHUTDOWN | 0x1);
    }

    fn set_gain(&mut self, multiplier: u8) {
        // 8 bit part: code sits in bits 9..2
        self.command(CMD_WRITE_RDAC | (rdac_code(multiplier) << 2));
    }
}
