#[cfg(test)]
use mockall::automock;

use crate::config::ThreePhaseRole;

/// Status bits sent along with every reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStatus(u16);

impl CycleStatus {
    pub const FIRST_SAMPLE: u16 = 0x0100;
    pub const EXTERNAL_VOLTAGE: u16 = 0x0080;
    pub const BATTERY_PACK: u16 = 0x0040;
    pub const THREE_PHASE_MASK: u16 = 0x0030;

    pub fn new(
        first_sample: bool,
        external_voltage: bool,
        battery_pack: bool,
        role: ThreePhaseRole,
    ) -> Self {
        let mut bits = (role.id() << 4) & Self::THREE_PHASE_MASK;
        if first_sample {
            bits |= Self::FIRST_SAMPLE;
        }
        if external_voltage {
            bits |= Self::EXTERNAL_VOLTAGE;
        }
        if battery_pack {
            bits |= Self::BATTERY_PACK;
        }
        Self(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn first_sample(self) -> bool {
        self.0 & Self::FIRST_SAMPLE != 0
    }

    pub fn external_voltage(self) -> bool {
        self.0 & Self::EXTERNAL_VOLTAGE != 0
    }

    pub fn battery_pack(self) -> bool {
        self.0 & Self::BATTERY_PACK != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub status: CycleStatus,
    pub power_mw: u32,
    pub device_id: [u8; 8],
    /// Monotonic per boot, never reused for the same key
    pub nonce: u32,
    /// Panel and circuit selector of an attached battery pack
    pub location: Option<(u8, u8)>,
}

impl Reading {
    /// Plaintext handed to the authenticated encryption: power little endian,
    /// the low status byte, then the optional location.
    pub fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(7);
        payload.extend_from_slice(&self.power_mw.to_le_bytes());
        payload.push(self.status.bits() as u8);
        if let Some((panel, circuit)) = self.location {
            payload.push(panel);
            payload.push(circuit);
        }
        payload
    }

    /// CCM nonce: device id followed by the little endian counter
    pub fn ccm_nonce(&self) -> [u8; 13] {
        let mut nonce = [0u8; 13];
        nonce[..8].copy_from_slice(&self.device_id);
        nonce[9..].copy_from_slice(&self.nonce.to_le_bytes());
        nonce
    }
}

/// Packet framing, encryption and radio. Fire and forget.
#[cfg_attr(test, automock)]
pub trait Transmitter {
    fn transmit(&mut self, reading: &Reading);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_layout() {
        let status = CycleStatus::new(true, true, false, ThreePhaseRole::Slave1);
        assert_eq!(status.bits(), 0x0100 | 0x0080 | 0x0020);
        assert!(status.first_sample());
        assert!(!status.battery_pack());

        assert_eq!(CycleStatus::new(false, false, true, ThreePhaseRole::None).bits(), 0x0040);
    }

    #[test]
    fn payload_layout() {
        let mut reading = Reading {
            status: CycleStatus::new(false, true, false, ThreePhaseRole::Master),
            power_mw: 0x0102_0304,
            device_id: [0xc0, 0x98, 0xe5, 0x54, 0x52, 0xa0, 0x00, 0x01],
            nonce: 7,
            location: None,
        };
        assert_eq!(reading.payload(), vec![0x04, 0x03, 0x02, 0x01, 0x90]);

        reading.location = Some((3, 12));
        assert_eq!(reading.payload(), vec![0x04, 0x03, 0x02, 0x01, 0x90, 3, 12]);

        let nonce = reading.ccm_nonce();
        assert_eq!(&nonce[..8], &reading.device_id);
        assert_eq!(&nonce[9..], &[7, 0, 0, 0]);
    }
}
