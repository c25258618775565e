use esp_idf_svc::nvs::{EspDefaultNvs, EspDefaultNvsPartition};

use crate::storage::{CalibrationStorage, ERASED_WORD, StorageError};

const NAMESPACE: &str = "phasemeter";
const KEY: &str = "calibration";

/// Calibration word kept under a single NVS key. A missing key reads as the
/// erased word.
pub struct NvsCalibrationStorage {
    nvs: EspDefaultNvs,
}

impl NvsCalibrationStorage {
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self, anyhow::Error> {
        Ok(Self {
            nvs: EspDefaultNvs::new(partition, NAMESPACE, true)?,
        })
    }
}

fn io(e: impl std::fmt::Display) -> StorageError {
    StorageError::Io(e.to_string())
}

impl CalibrationStorage for NvsCalibrationStorage {
    fn read_word(&self) -> Result<u32, StorageError> {
        Ok(self.nvs.get_u32(KEY).map_err(io)?.unwrap_or(ERASED_WORD))
    }

    fn erase_page(&mut self) -> Result<(), StorageError> {
        self.nvs.remove(KEY).map(|_| ()).map_err(io)
    }

    fn program_word(&mut self, word: u32) -> Result<(), StorageError> {
        self.nvs.set_u32(KEY, word).map_err(io)
    }
}
