//! CAN frame payload
//!
//! Helper to transport a received CAN frame through a port. The layout is:
//! CAN ID (u32, little endian), flags (bit 0: extended ID), DLC, data bytes.

use crate::types::{DispatcherError, Result};
use byteorder::{ByteOrder, LittleEndian};

const HEADER_SIZE: usize = 6;
const FLAG_EXTENDED: u8 = 0x01;

/// Maximum number of data bytes (CAN-FD)
pub const MAX_DATA_LEN: usize = 64;

/// A received CAN frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    /// CAN message ID (11-bit or 29-bit)
    pub can_id: u32,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
    /// Frame data bytes (0-8 bytes for classic CAN, up to 64 for CAN-FD)
    pub data: Vec<u8>,
}

impl CanFrame {
    pub fn new(can_id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            can_id,
            is_extended: can_id > 0x7FF,
            data: data.into(),
        }
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }

    /// Size of the encoded payload
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }

    /// Serialize the frame into a port payload
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.data.len() > MAX_DATA_LEN {
            return Err(DispatcherError::InvalidData(format!(
                "CAN frame 0x{:X} carries {} bytes, at most {} are possible",
                self.can_id,
                self.data.len(),
                MAX_DATA_LEN
            )));
        }

        let mut payload = vec![0u8; self.encoded_len()];
        LittleEndian::write_u32(&mut payload[0..4], self.can_id);
        payload[4] = if self.is_extended { FLAG_EXTENDED } else { 0 };
        payload[5] = self.data.len() as u8;
        payload[HEADER_SIZE..].copy_from_slice(&self.data);
        Ok(payload)
    }

    /// Parse a port payload back into a frame
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < HEADER_SIZE {
            return Err(DispatcherError::InvalidData(format!(
                "CAN frame payload too short: {} bytes",
                payload.len()
            )));
        }

        let can_id = LittleEndian::read_u32(&payload[0..4]);
        let dlc = payload[5] as usize;
        if dlc > MAX_DATA_LEN || payload.len() != HEADER_SIZE + dlc {
            return Err(DispatcherError::InvalidData(format!(
                "CAN frame 0x{:X}: DLC {} doesn't match payload of {} bytes",
                can_id,
                dlc,
                payload.len()
            )));
        }

        Ok(Self {
            can_id,
            is_extended: payload[4] & FLAG_EXTENDED != 0,
            data: payload[HEADER_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_payload() {
        let frame = CanFrame::new(0x18FF_1234, vec![1, 2, 3]);
        assert!(frame.is_extended);

        let payload = frame.encode().unwrap();
        assert_eq!(payload.len(), 9);
        assert_eq!(&payload[0..4], &[0x34, 0x12, 0xFF, 0x18]);
        assert_eq!(CanFrame::decode(&payload).unwrap(), frame);
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(CanFrame::decode(&[1, 2, 3]).is_err());

        let mut payload = CanFrame::new(0x123, vec![0; 8]).encode().unwrap();
        payload.pop();
        assert!(CanFrame::decode(&payload).is_err());

        assert!(CanFrame::new(0x123, vec![0; 65]).encode().is_err());
    }
}
