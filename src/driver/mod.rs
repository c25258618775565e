pub mod adc;
pub mod amplifier;
pub mod frontend;
pub mod gpio;
pub mod radio;
pub mod storage;
pub mod timer;
