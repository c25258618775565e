use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gain::GAIN_TABLE;
use crate::sampler::{CURRENT_ONLY_CAPACITY, DUAL_CHANNEL_CAPACITY};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// What the pipeline does with a captured cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Normal,
    /// Verbose logging of intermediate calibration values
    Debug,
    /// Logs raw windows instead of calibrating or transmitting
    DataDump,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreePhaseRole {
    #[default]
    None,
    Master,
    Slave1,
    Slave2,
}

impl ThreePhaseRole {
    pub const fn id(self) -> u16 {
        match self {
            ThreePhaseRole::None => 0,
            ThreePhaseRole::Master => 1,
            ThreePhaseRole::Slave1 => 2,
            ThreePhaseRole::Slave2 => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleBudget {
    pub current_only: usize,
    pub dual_channel: usize,
}

impl Default for SampleBudget {
    fn default() -> Self {
        Self {
            current_only: CURRENT_ONLY_CAPACITY,
            dual_channel: DUAL_CHANNEL_CAPACITY,
        }
    }
}

/// Operating range of the gain index. Both ends stay clear of the table ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainBounds {
    pub default_index: usize,
    pub min_index: usize,
    pub max_index: usize,
}

impl Default for GainBounds {
    fn default() -> Self {
        Self {
            default_index: 3,
            min_index: 1,
            max_index: 4,
        }
    }
}

/// Limits on baseline-removed samples, for the 11 bit current-only capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Any sample above this and the gain is too large
    pub upper: i32,
    /// Peak below this and the gain is too small
    pub lower: i32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            upper: 430,
            lower: 185,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub run_mode: RunMode,
    pub sample_budget: SampleBudget,
    pub calibration_cycles: usize,
    pub phase_variance_threshold: u32,
    pub gain_bounds: GainBounds,
    pub thresholds: Thresholds,
    /// Resample attempts per measurement cycle while the gain settles
    pub gain_retries: usize,
    /// Hardware has the external voltage input populated
    pub external_voltage: bool,
    /// Dual channel windows averaged per reading. Power of two.
    pub external_subcycles: u32,
    /// Use each window's own mean as current baseline instead of the
    /// calibrated DC offset
    pub averaged_reference: bool,
    pub three_phase_role: ThreePhaseRole,
    pub device_id: [u8; 8],

    pub startup_delay_ms: u64,
    pub voltage_settle_ms: u64,
    pub current_settle_ms: u64,
    pub led_blink_ms: u64,
    pub zero_cross_timeout_ms: u64,
    pub initial_backoff_s: u8,
    pub min_backoff_s: u8,

    pub calibration_warmup_ms: u64,
    pub calibration_interval_ms: u64,
    pub calibration_retry_ms: u64,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            run_mode: RunMode::Normal,
            sample_budget: SampleBudget::default(),
            calibration_cycles: 512,
            phase_variance_threshold: 15,
            gain_bounds: GainBounds::default(),
            thresholds: Thresholds::default(),
            gain_retries: 4,
            external_voltage: false,
            external_subcycles: 16,
            averaged_reference: false,
            three_phase_role: ThreePhaseRole::None,
            device_id: [0; 8],
            startup_delay_ms: 1000,
            voltage_settle_ms: 400,
            current_settle_ms: 300,
            led_blink_ms: 100,
            // Two mains half cycles at 50Hz
            zero_cross_timeout_ms: 40,
            initial_backoff_s: 4,
            min_backoff_s: 2,
            calibration_warmup_ms: 10_000,
            calibration_interval_ms: 100,
            calibration_retry_ms: 1000,
        }
    }
}

impl MeterConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let budget = &self.sample_budget;
        if budget.current_only == 0 || budget.current_only > CURRENT_ONLY_CAPACITY {
            return Err(ConfigError::Invalid("current-only sample budget out of range"));
        }
        if budget.dual_channel <= crate::sampler::VOLTAGE_SAMPLE_SHIFT
            || budget.dual_channel > DUAL_CHANNEL_CAPACITY
        {
            return Err(ConfigError::Invalid("dual-channel sample budget out of range"));
        }
        if *budget != SampleBudget::default() {
            log::warn!("Non-default sample budget, stored phase offsets will not match");
        }

        let gain = &self.gain_bounds;
        if gain.min_index == 0
            || gain.max_index >= GAIN_TABLE.len() - 1
            || gain.min_index > gain.max_index
            || !(gain.min_index..=gain.max_index).contains(&gain.default_index)
        {
            return Err(ConfigError::Invalid(
                "gain bounds must be a strict sub-range of the gain table",
            ));
        }

        if self.thresholds.lower >= self.thresholds.upper {
            return Err(ConfigError::Invalid("lower threshold must be below upper"));
        }
        if self.calibration_cycles == 0 {
            return Err(ConfigError::Invalid("calibration needs at least one cycle"));
        }
        if !self.external_subcycles.is_power_of_two() || self.external_subcycles > 64 {
            return Err(ConfigError::Invalid("sub-cycle count must be a power of two up to 64"));
        }
        if self.min_backoff_s == 0 || self.min_backoff_s > self.initial_backoff_s {
            return Err(ConfigError::Invalid("backoff floor must be in 1..=initial backoff"));
        }

        Ok(())
    }

    pub fn voltage_settle(&self) -> Duration {
        Duration::from_millis(self.voltage_settle_ms)
    }

    pub fn current_settle(&self) -> Duration {
        Duration::from_millis(self.current_settle_ms)
    }

    pub fn led_blink(&self) -> Duration {
        Duration::from_millis(self.led_blink_ms)
    }

    pub fn zero_cross_timeout(&self) -> Duration {
        Duration::from_millis(self.zero_cross_timeout_ms)
    }
}
