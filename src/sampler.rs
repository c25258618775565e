//! Back-to-back waveform capture across one mains cycle.
//!
//! The phase offset stored at calibration time is only meaningful for the exact
//! sample count and cadence used here. Do not add work to the sampling loops.

use thiserror::Error;

use crate::adc::{AdcChannel, AdcDivider, AdcFrontEnd};
use crate::config::SampleBudget;

/// Current only capture, 11 bit
pub const CURRENT_ONLY_CAPACITY: usize = 120;
/// Current + voltage capture, 10 bit
pub const DUAL_CHANNEL_CAPACITY: usize = 113;
/// The voltage conversion trails the current one, voltage sample `j + 2` lines
/// up with current sample `j`.
pub const VOLTAGE_SAMPLE_SHIFT: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SamplerError {
    #[error("sample buffer is still held by a previous window")]
    BufferInUse,
}

#[derive(Debug)]
pub struct SampleBuffer {
    current: [u16; CURRENT_ONLY_CAPACITY],
    voltage: [u16; DUAL_CHANNEL_CAPACITY],
    ticks: [u32; CURRENT_ONLY_CAPACITY],
    len: usize,
    dual: bool,
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self {
            current: [0; CURRENT_ONLY_CAPACITY],
            voltage: [0; DUAL_CHANNEL_CAPACITY],
            ticks: [0; CURRENT_ONLY_CAPACITY],
            len: 0,
            dual: false,
        }
    }
}

impl SampleBuffer {
    pub fn current(&self) -> &[u16] {
        &self.current[..self.len]
    }

    /// Raw voltage samples, in capture order. Empty for current-only windows.
    pub fn voltage(&self) -> &[u16] {
        if self.dual { &self.voltage[..self.len] } else { &[] }
    }

    /// Voltage sample aligned with current sample `j`, wrapping around the
    /// end of the cycle.
    pub fn voltage_aligned(&self, j: usize) -> u16 {
        self.voltage[(j + VOLTAGE_SAMPLE_SHIFT) % self.len]
    }

    pub fn ticks(&self) -> &[u32] {
        &self.ticks[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_dual(&self) -> bool {
        self.dual
    }

    pub fn average_current(&self) -> u16 {
        average(self.current())
    }

    pub fn average_voltage(&self) -> u16 {
        average(self.voltage())
    }

    /// Ticks between the first two samples. The tick counter counts up.
    pub fn sample_period_ticks(&self) -> u32 {
        match self.ticks() {
            [first, second, ..] => second.wrapping_sub(*first),
            _ => 0,
        }
    }
}

/// Integer mean, rounded down. Zero for an empty slice.
pub fn average(data: &[u16]) -> u16 {
    if data.is_empty() {
        return 0;
    }
    let sum: u32 = data.iter().map(|&d| d as u32).sum();
    (sum / data.len() as u32) as u16
}

/// One captured cycle. Owns the sampler's buffer until handed back with
/// [`Sampler::recycle`].
#[derive(Debug)]
pub struct SampleWindow(Box<SampleBuffer>);

impl std::ops::Deref for SampleWindow {
    type Target = SampleBuffer;

    fn deref(&self) -> &SampleBuffer {
        &self.0
    }
}

impl SampleWindow {
    #[cfg(test)]
    pub(crate) fn from_current(samples: &[u16]) -> Self {
        let mut buf = Box::<SampleBuffer>::default();
        buf.current[..samples.len()].copy_from_slice(samples);
        buf.len = samples.len();
        Self(buf)
    }

    #[cfg(test)]
    pub(crate) fn from_dual(current: &[u16], voltage: &[u16]) -> Self {
        let mut buf = Box::<SampleBuffer>::default();
        buf.current[..current.len()].copy_from_slice(current);
        buf.voltage[..voltage.len()].copy_from_slice(voltage);
        buf.len = current.len();
        buf.dual = true;
        Self(buf)
    }
}

pub struct Sampler<A: AdcFrontEnd> {
    adc: A,
    budget: SampleBudget,
    buffer: Option<Box<SampleBuffer>>,
}

impl<A: AdcFrontEnd> Sampler<A> {
    pub fn new(adc: A, budget: SampleBudget) -> Self {
        Self {
            adc,
            budget,
            buffer: Some(Box::default()),
        }
    }

    /// Captures one window. Must be called right after the zero-cross edge.
    pub fn sample(&mut self, dual_channel: bool) -> Result<SampleWindow, SamplerError> {
        let mut buf = self.buffer.take().ok_or(SamplerError::BufferInUse)?;
        if dual_channel {
            self.sample_current_voltage(&mut buf);
        } else {
            self.sample_current(&mut buf);
        }
        Ok(SampleWindow(buf))
    }

    pub fn recycle(&mut self, window: SampleWindow) {
        self.buffer = Some(window.0);
    }

    /// Last captured data, if the buffer is back home
    pub fn last_capture(&self) -> Option<&SampleBuffer> {
        self.buffer.as_deref()
    }

    fn sample_current(&mut self, buf: &mut SampleBuffer) {
        let divider = AdcDivider::Div512;
        let len = self.budget.current_only.min(CURRENT_ONLY_CAPACITY);
        for i in 0..len {
            buf.ticks[i] = self.adc.timestamp();
            buf.current[i] = clamp(self.adc.read(AdcChannel::Current, divider), divider);
        }
        buf.len = len;
        buf.dual = false;
    }

    fn sample_current_voltage(&mut self, buf: &mut SampleBuffer) {
        let divider = AdcDivider::Div256;
        let len = self.budget.dual_channel.min(DUAL_CHANNEL_CAPACITY);
        for i in 0..len {
            buf.ticks[i] = self.adc.timestamp();
            buf.current[i] = clamp(self.adc.read(AdcChannel::Current, divider), divider);
            buf.voltage[i] = clamp(self.adc.read(AdcChannel::Voltage, divider), divider);
        }
        buf.len = len;
        buf.dual = true;
    }
}

#[inline(always)]
fn clamp(raw: u16, divider: AdcDivider) -> u16 {
    let value = raw >> divider.shift();
    if value > divider.rail() { 0 } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::MockAdcFrontEnd;
    use mockall::predicate::*;

    fn ticking_adc() -> MockAdcFrontEnd {
        let mut adc = MockAdcFrontEnd::new();
        let mut tick = 0u32;
        adc.expect_timestamp().returning(move || {
            tick += 7;
            tick
        });
        adc
    }

    #[test]
    fn current_only_window_has_fixed_length() {
        let mut adc = ticking_adc();
        adc.expect_read()
            .with(eq(AdcChannel::Current), eq(AdcDivider::Div512))
            .times(CURRENT_ONLY_CAPACITY)
            .return_const(1000u16 << 4);

        let mut sampler = Sampler::new(adc, SampleBudget::default());
        let window = sampler.sample(false).unwrap();
        assert_eq!(window.len(), 120);
        assert!(!window.is_dual());
        assert!(window.current().iter().all(|&s| s == 1000));
        assert!(window.voltage().is_empty());
        assert_eq!(window.sample_period_ticks(), 7);
    }

    #[test]
    fn dual_window_reads_both_channels() {
        let mut adc = ticking_adc();
        adc.expect_read()
            .with(eq(AdcChannel::Current), eq(AdcDivider::Div256))
            .times(DUAL_CHANNEL_CAPACITY)
            .return_const(300u16 << 5);
        adc.expect_read()
            .with(eq(AdcChannel::Voltage), eq(AdcDivider::Div256))
            .times(DUAL_CHANNEL_CAPACITY)
            .return_const(600u16 << 5);

        let mut sampler = Sampler::new(adc, SampleBudget::default());
        let window = sampler.sample(true).unwrap();
        assert_eq!(window.len(), 113);
        assert_eq!(window.average_current(), 300);
        assert_eq!(window.average_voltage(), 600);
    }

    #[test]
    fn rail_readings_are_clamped_to_zero() {
        assert_eq!(clamp(0xffff, AdcDivider::Div512), 0);
        assert_eq!(clamp(0x8000, AdcDivider::Div512), 0);
        assert_eq!(clamp(0x7ff0, AdcDivider::Div512), 2047);
        assert_eq!(clamp(0x8000, AdcDivider::Div256), 0);
        assert_eq!(clamp(0x7fe0, AdcDivider::Div256), 1023);
    }

    #[test]
    fn buffer_cannot_be_lent_twice() {
        let mut adc = ticking_adc();
        adc.expect_read().return_const(0u16);

        let mut sampler = Sampler::new(adc, SampleBudget::default());
        let window = sampler.sample(false).unwrap();
        assert_eq!(sampler.sample(false).unwrap_err(), SamplerError::BufferInUse);
        assert!(sampler.last_capture().is_none());

        sampler.recycle(window);
        assert_eq!(sampler.last_capture().map(|b| b.len()), Some(120));
        assert!(sampler.sample(false).is_ok());
    }

    #[test]
    fn voltage_alignment_wraps() {
        let current = [0u16; DUAL_CHANNEL_CAPACITY];
        let voltage: Vec<u16> = (0..DUAL_CHANNEL_CAPACITY as u16).collect();
        let window = SampleWindow::from_dual(&current, &voltage);

        assert_eq!(window.voltage_aligned(0), 2);
        assert_eq!(window.voltage_aligned(110), 112);
        assert_eq!(window.voltage_aligned(111), 0);
        assert_eq!(window.voltage_aligned(112), 1);
    }
}
