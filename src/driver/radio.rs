use esp_idf_svc::espnow::{BROADCAST, EspNow, PeerInfo};
use esp_idf_sys::EspError;

use crate::reading::{Reading, Transmitter};

/// Leading byte telling receivers what kind of packet follows
const PACKET_IDENTIFIER: u8 = 0xa0;

/// Broadcasts readings over ESP-NOW. Link encryption is left to the peer
/// configuration.
pub struct EspNowTransmitter {
    espnow: EspNow<'static>,
}

impl EspNowTransmitter {
    pub fn new(espnow: EspNow<'static>) -> Result<Self, EspError> {
        espnow.add_peer(PeerInfo {
            peer_addr: BROADCAST,
            ..Default::default()
        })?;
        Ok(Self { espnow })
    }
}

/// Identifier, little endian nonce, then the reading payload
pub fn frame(reading: &Reading) -> Vec<u8> {
    let payload = reading.payload();
    let mut packet = Vec::with_capacity(5 + payload.len());
    packet.push(PACKET_IDENTIFIER);
    packet.extend_from_slice(&reading.nonce.to_le_bytes());
    packet.extend_from_slice(&payload);
    packet
}

impl Transmitter for EspNowTransmitter {
    fn transmit(&mut self, reading: &Reading) {
        if let Err(e) = self.espnow.send(BROADCAST, &frame(reading)) {
            log::warn!("Dropped reading {}: {}", reading.nonce, e);
        }
    }
}
