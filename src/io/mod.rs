// src/io/mod.rs
//
// CAN transport abstraction for the actuator programmer.
// Provides a validated frame type, the `CanPort` send/receive interface and the
// concrete channel drivers (SocketCAN, slcan, in-process simulator).

// Core modules
pub mod codec; // Frame codec trait (slcan ASCII)
mod error;
pub mod traits; // CanPort transport interface
mod types;

// Channel drivers
pub mod simulator;
#[cfg(any(target_os = "windows", target_os = "macos", target_os = "linux"))]
pub mod slcan;
#[cfg(target_os = "linux")]
pub mod socketcan;

pub use codec::FrameCodec;
pub use error::IoError;
pub use simulator::{SimHandle, SimulatedActuator};
pub use traits::{open_channel, CanPort, ChannelLease};
pub use types::{ChannelSpec, DEFAULT_CAN_BITRATE, DEFAULT_SLCAN_BAUD_RATE};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Shared Types
// ============================================================================

/// Raw frame as delivered by a driver, before validation.
/// May be extended, short or otherwise unusable by the actuator protocol.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameMessage {
    /// Host UNIX timestamp in microseconds.
    pub timestamp_us: u64,
    pub frame_id: u32,
    pub dlc: u8,
    pub bytes: Vec<u8>,
    pub is_extended: bool,
}

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Payload length of every frame the actuator protocol uses
pub const FRAME_LEN: usize = 8;

/// Mask for standard (11-bit) CAN ID
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;

/// A classic, standard-identifier CAN frame with a full 8-byte payload.
///
/// Construction validates the identifier, so a `CanFrame` in hand is always
/// something the actuator protocol can put on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanFrame {
    id: u16,
    data: [u8; FRAME_LEN],
}

impl CanFrame {
    /// Build a frame, rejecting identifiers outside the 11-bit range.
    pub fn new(id: u16, data: [u8; FRAME_LEN]) -> Result<Self, IoError> {
        if u32::from(id) > CAN_SFF_MASK {
            return Err(IoError::configuration(format!(
                "CAN identifier 0x{:X} exceeds 11-bit range",
                id
            )));
        }
        Ok(Self { id, data })
    }

    /// Validate a received frame. Extended, out-of-range or short frames
    /// yield `None` and are treated by callers as absent data.
    pub fn from_message(msg: &FrameMessage) -> Option<Self> {
        if msg.is_extended || msg.frame_id > CAN_SFF_MASK || msg.bytes.len() < FRAME_LEN {
            return None;
        }
        let mut data = [0u8; FRAME_LEN];
        data.copy_from_slice(&msg.bytes[..FRAME_LEN]);
        Some(Self {
            id: msg.frame_id as u16,
            data,
        })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn data(&self) -> &[u8; FRAME_LEN] {
        &self.data
    }

    /// Always false: the actuator only speaks 11-bit identifiers.
    pub fn is_extended(&self) -> bool {
        false
    }

    /// Convert back into a driver-level message (for encoders and logs)
    pub fn to_message(&self) -> FrameMessage {
        FrameMessage {
            timestamp_us: now_us(),
            frame_id: u32::from(self.id),
            dlc: FRAME_LEN as u8,
            bytes: self.data.to_vec(),
            is_extended: false,
        }
    }
}

/// candump-style rendering: `3F0#4900000000000000`
impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03X}#{}", self.id, hex::encode_upper(self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(frame_id: u32, bytes: Vec<u8>, is_extended: bool) -> FrameMessage {
        FrameMessage {
            timestamp_us: now_us(),
            frame_id,
            dlc: bytes.len() as u8,
            bytes,
            is_extended,
        }
    }

    #[test]
    fn test_new_rejects_extended_range_id() {
        assert!(CanFrame::new(0x7FF, [0; 8]).is_ok());
        assert!(CanFrame::new(0x800, [0; 8]).is_err());
    }

    #[test]
    fn test_from_message_accepts_full_standard_frame() {
        let frame = CanFrame::from_message(&message(0x3E8, vec![1, 2, 3, 4, 5, 6, 7, 8], false))
            .unwrap();
        assert_eq!(frame.id(), 0x3E8);
        assert_eq!(frame.data(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(!frame.is_extended());
    }

    #[test]
    fn test_from_message_drops_unusable_frames() {
        // Short payload
        assert!(CanFrame::from_message(&message(0x3E8, vec![1, 2, 3], false)).is_none());
        // Extended identifier
        assert!(CanFrame::from_message(&message(0x3E8, vec![0; 8], true)).is_none());
        // Identifier outside 11 bits
        assert!(CanFrame::from_message(&message(0x1234, vec![0; 8], false)).is_none());
    }

    #[test]
    fn test_display_candump_style() {
        let frame = CanFrame::new(0x3F0, [0x49, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(frame.to_string(), "3F0#4900000000000000");
    }
}
