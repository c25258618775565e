#[cfg(test)]
use mockall::automock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcChannel {
    /// Current transformer, after the instrumentation amplifier
    Current,
    /// External voltage waveform input
    Voltage,
}

/// Decimation setting for a conversion. Longer decimation gives more stable
/// bits but takes longer, which limits how many samples fit in a mains cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcDivider {
    /// 11 stable bits
    Div512,
    /// 10 stable bits
    Div256,
}

impl AdcDivider {
    /// Conversions are left aligned in 16 bits, this drops the unstable tail
    pub const fn shift(self) -> u32 {
        match self {
            AdcDivider::Div512 => 4,
            AdcDivider::Div256 => 5,
        }
    }

    /// Largest valid value after shifting. Anything above is a rail reading.
    pub const fn rail(self) -> u16 {
        match self {
            AdcDivider::Div512 => 2047,
            AdcDivider::Div256 => 1023,
        }
    }
}

/// Analog front end as seen by the sampler
#[cfg_attr(test, automock)]
pub trait AdcFrontEnd {
    /// Single blocking conversion, left aligned to 16 bits
    fn read(&mut self, channel: AdcChannel, divider: AdcDivider) -> u16;
    /// Free running hardware tick counter
    fn timestamp(&self) -> u32;
}
