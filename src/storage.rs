//! Persistent calibration record: one 32 bit word in its own erase page.

#[cfg(test)]
use mockall::automock;
use thiserror::Error;

/// Erased flash reads as all ones
pub const ERASED_WORD: u32 = 0xffff_ffff;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage access failed: {0}")]
    Io(String),
    #[error("calibration record is already written")]
    AlreadyWritten,
    #[error("stored word {0:#010x} is not a valid calibration record")]
    Corrupt(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationRecord {
    /// Rotation of the reference table, degrees in 0..360
    pub phase_offset: u16,
    /// Current channel bias at 11 bit resolution
    pub dc_offset: u16,
}

impl CalibrationRecord {
    pub const fn to_word(self) -> u32 {
        ((self.dc_offset as u32) << 16) | self.phase_offset as u32
    }

    pub fn from_word(word: u32) -> Result<Option<Self>, StorageError> {
        if word == ERASED_WORD {
            return Ok(None);
        }
        let record = Self {
            phase_offset: (word & 0xffff) as u16,
            dc_offset: (word >> 16) as u16,
        };
        if record.phase_offset >= 360 {
            return Err(StorageError::Corrupt(word));
        }
        Ok(Some(record))
    }
}

/// Raw access to the calibration page
#[cfg_attr(test, automock)]
pub trait CalibrationStorage {
    fn read_word(&self) -> Result<u32, StorageError>;
    fn erase_page(&mut self) -> Result<(), StorageError>;
    /// Programs the whole word in one operation. The page must be erased.
    fn program_word(&mut self, word: u32) -> Result<(), StorageError>;
}

pub struct CalibrationStore<S: CalibrationStorage> {
    storage: S,
}

impl<S: CalibrationStorage> CalibrationStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// `None` means the device has never been calibrated
    pub fn load(&self) -> Result<Option<CalibrationRecord>, StorageError> {
        CalibrationRecord::from_word(self.storage.read_word()?)
    }

    /// Erases the page before calibration starts. Only legal while no record
    /// exists.
    pub fn prepare(&mut self) -> Result<(), StorageError> {
        if self.load()?.is_some() {
            return Err(StorageError::AlreadyWritten);
        }
        self.storage.erase_page()
    }

    /// Writes the record. There is no way to overwrite it afterwards.
    pub fn persist(&mut self, record: CalibrationRecord) -> Result<(), StorageError> {
        if self.storage.read_word()? != ERASED_WORD {
            return Err(StorageError::AlreadyWritten);
        }
        self.storage.program_word(record.to_word())?;
        log::info!(
            "Calibration stored: phase {} deg, dc {}",
            record.phase_offset,
            record.dc_offset
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;

    #[test]
    fn word_layout() {
        let record = CalibrationRecord {
            phase_offset: 47,
            dc_offset: 1024,
        };
        assert_eq!(record.to_word(), 0x0400_002f);
        assert_eq!(CalibrationRecord::from_word(0x0400_002f).unwrap(), Some(record));
    }

    #[test]
    fn erased_word_is_uncalibrated() {
        assert_eq!(CalibrationRecord::from_word(ERASED_WORD).unwrap(), None);
    }

    #[test]
    fn out_of_range_phase_is_corrupt() {
        assert!(matches!(
            CalibrationRecord::from_word(0x0400_0168),
            Err(StorageError::Corrupt(0x0400_0168))
        ));
    }

    #[test]
    fn persists_into_erased_page() {
        let mut storage = MockCalibrationStorage::new();
        storage.expect_read_word().return_once(|| Ok(ERASED_WORD));
        storage
            .expect_program_word()
            .with(eq(0x0400_002f))
            .once()
            .returning(|_| Ok(()));

        let mut store = CalibrationStore::new(storage);
        store
            .persist(CalibrationRecord {
                phase_offset: 47,
                dc_offset: 1024,
            })
            .unwrap();
    }

    #[test]
    fn record_is_write_once() {
        let mut storage = MockCalibrationStorage::new();
        storage.expect_read_word().returning(|| Ok(0x0400_002f));
        storage.expect_program_word().never();
        storage.expect_erase_page().never();

        let mut store = CalibrationStore::new(storage);
        let record = CalibrationRecord {
            phase_offset: 10,
            dc_offset: 1000,
        };
        assert!(matches!(store.persist(record), Err(StorageError::AlreadyWritten)));
        assert!(matches!(store.prepare(), Err(StorageError::AlreadyWritten)));
    }
}
