// src/actuator/frames.rs
//
// Frame codec for the four message roles of the programming protocol.
//
// | ID    | Direction        | Role                                  |
// |-------|------------------|---------------------------------------|
// | 0x3F0 | engine->actuator | request / keepalive / opcode carrier  |
// | 0x3E8 | actuator->engine | one EEPROM byte, echoing its address  |
// | 0x3EA | actuator->engine | telemetry                             |
// | 0x3EB | actuator->engine | handshake ack (0x53 marker)           |
//
// Identifiers and the ack marker come from `ProtocolConfig`; the opcode bytes
// are fixed.

use crate::io::{CanFrame, FRAME_LEN};
use crate::settings::ProtocolConfig;

use super::error::ProgError;

// ============================================================================
// Opcodes
// ============================================================================

/// Keepalive / session request
pub const OP_KEEPALIVE: u8 = 0x49;
/// Select a register (page, address)
pub const OP_SELECT: u8 = 0x31;
/// Write a value to the selected register
pub const OP_WRITE: u8 = 0x57;
/// Terminates a programming sequence
pub const OP_END: u8 = 0x44;

/// Select page addressing the EEPROM
pub const PAGE_EEPROM: u8 = 0x0C;

/// Highest EEPROM address
pub const MAX_ADDRESS: u8 = 0x7F;
/// Number of EEPROM bytes
pub const MEMORY_SIZE: usize = 128;

/// Addresses whose modification is known or suspected to disable CAN
/// communication or change the control mode.
pub const DANGEROUS_ADDRESSES: [u8; 12] = [
    0x09, 0x0A, // command CAN ID
    0x24, 0x25, // request CAN ID
    0x27, 0x28, // response CAN ID
    0x29, // control mode config
    0x36, 0x37, 0x39, // unknown, changes brick the unit
    0x41, // interface config
    0x65,
];

pub fn is_dangerous_address(address: u8) -> bool {
    DANGEROUS_ADDRESSES.contains(&address)
}

// ============================================================================
// Encoding
// ============================================================================

/// Build a frame on the request identifier.
pub fn request_frame(config: &ProtocolConfig, data: [u8; FRAME_LEN]) -> Result<CanFrame, ProgError> {
    CanFrame::new(config.request_id, data)
        .map_err(|e| ProgError::invalid_argument(format!("request frame: {}", e)))
}

/// `49 00 00 00 00 00 00 00`
pub fn encode_keepalive() -> [u8; FRAME_LEN] {
    [OP_KEEPALIVE, 0, 0, 0, 0, 0, 0, 0]
}

/// EEPROM read select. The captured traffic repeats the address in bytes
/// 2..5; kept verbatim.
pub fn encode_memory_read(address: u8) -> [u8; FRAME_LEN] {
    [OP_SELECT, PAGE_EEPROM, address, address, address, 0, 0, 0]
}

/// Select frame as it appears inside programming sequences
pub fn encode_select(page: u8, register: u8) -> [u8; FRAME_LEN] {
    [OP_SELECT, page, register, 0, 0, 0, 0, 0]
}

/// Write frame: the value travels in byte 3
pub fn encode_write(value: u8) -> [u8; FRAME_LEN] {
    [OP_WRITE, 0, 0, value, 0, 0, 0, 0]
}

/// Select-then-write pair for one EEPROM byte
pub fn encode_memory_write(address: u8, value: u8) -> [[u8; FRAME_LEN]; 2] {
    [encode_select(PAGE_EEPROM, address), encode_write(value)]
}

pub fn encode_end() -> [u8; FRAME_LEN] {
    [OP_END, 0, 0, 0, 0, 0, 0, 0]
}

// ============================================================================
// Decoding
// ============================================================================

/// True for a valid handshake acknowledgement.
pub fn is_ack(config: &ProtocolConfig, frame: &CanFrame) -> bool {
    frame.id() == config.ack_id
        && frame.data().get(config.ack_marker_index) == Some(&config.ack_marker)
}

/// The byte carried by a memory response for `address`, or `None` when the
/// frame is some other traffic (including responses for other addresses).
pub fn match_memory_response(config: &ProtocolConfig, frame: &CanFrame, address: u8) -> Option<u8> {
    if frame.id() != config.memory_response_id {
        return None;
    }
    let data = frame.data();
    if data[1] != address {
        return None;
    }
    Some(data[0])
}

// ============================================================================
// Position Values
// ============================================================================

/// Split a 16-bit position into the (high, low) bytes used by the
/// programming sequences.
pub fn split_position(config: &ProtocolConfig, value: u16) -> (u8, u8) {
    let high = ((value >> config.position_high_shift) & 0xFF) as u8;
    let low = (value & 0xFF) as u8;
    (high, low)
}

/// Combine two memory bytes into a big-endian position value.
pub fn combine_position(high: u8, low: u8) -> u16 {
    u16::from_be_bytes([high, low])
}

/// Range byte written to 0x22 for a min/max pair: a quarter of the span.
/// `None` when the span is negative or too wide for one byte.
pub fn range_byte(min: u16, max: u16) -> Option<u8> {
    u8::try_from((i32::from(max) - i32::from(min)) / 4).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: u16, data: [u8; 8]) -> CanFrame {
        CanFrame::new(id, data).unwrap()
    }

    #[test]
    fn test_keepalive_and_read_layout() {
        assert_eq!(encode_keepalive(), [0x49, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(encode_memory_read(0x2A), [0x31, 0x0C, 0x2A, 0x2A, 0x2A, 0, 0, 0]);
        assert_eq!(
            encode_memory_write(0x05, 0x99),
            [[0x31, 0x0C, 0x05, 0, 0, 0, 0, 0], [0x57, 0, 0, 0x99, 0, 0, 0, 0]]
        );
    }

    #[test]
    fn test_memory_response_matches_every_address() {
        let cfg = ProtocolConfig::default();
        for address in 0..=MAX_ADDRESS {
            let value = address.wrapping_mul(7) ^ 0x5A;
            let request = encode_memory_read(address);
            let reply = frame(0x3E8, [value, request[2], 0, 0, 0, 0, 0, 0]);
            assert_eq!(match_memory_response(&cfg, &reply, address), Some(value));
        }
    }

    #[test]
    fn test_memory_response_ignores_other_traffic() {
        let cfg = ProtocolConfig::default();
        // Wrong address echo
        assert_eq!(match_memory_response(&cfg, &frame(0x3E8, [1, 0x06, 0, 0, 0, 0, 0, 0]), 0x05), None);
        // Wrong identifier
        assert_eq!(match_memory_response(&cfg, &frame(0x3EA, [1, 0x05, 0, 0, 0, 0, 0, 0]), 0x05), None);
    }

    #[test]
    fn test_ack_requires_marker_at_configured_index() {
        let cfg = ProtocolConfig::default();
        assert!(is_ack(&cfg, &frame(0x3EB, [0, 0x53, 0, 0, 0, 0, 0, 0])));
        assert!(!is_ack(&cfg, &frame(0x3EB, [0, 0, 0, 0, 0, 0, 0, 0x53])));
        assert!(!is_ack(&cfg, &frame(0x3E8, [0, 0x53, 0, 0, 0, 0, 0, 0])));

        let legacy = ProtocolConfig {
            ack_marker_index: 7,
            ..ProtocolConfig::default()
        };
        assert!(is_ack(&legacy, &frame(0x3EB, [0, 0, 0, 0, 0, 0, 0, 0x53])));
    }

    #[test]
    fn test_split_position() {
        let cfg = ProtocolConfig::default();
        assert_eq!(split_position(&cfg, 0x0220), (0x01, 0x20));
        assert_eq!(split_position(&cfg, 0xFFFF), (0x7F, 0xFF));

        let byte_shift = ProtocolConfig {
            position_high_shift: 8,
            ..ProtocolConfig::default()
        };
        assert_eq!(split_position(&byte_shift, 0x0220), (0x02, 0x20));
    }

    #[test]
    fn test_range_byte() {
        assert_eq!(range_byte(0x0113, 0x0220), Some(0x43));
        assert_eq!(range_byte(100, 100), Some(0));
        assert_eq!(range_byte(0x0220, 0x0113), None);
        assert_eq!(range_byte(0, 0x0400), None);
    }

    #[test]
    fn test_dangerous_addresses() {
        for addr in [0x09, 0x0A, 0x24, 0x25, 0x27, 0x28, 0x29, 0x36, 0x37, 0x39, 0x41, 0x65] {
            assert!(is_dangerous_address(addr), "0x{:02X}", addr);
        }
        assert!(!is_dangerous_address(0x03));
        assert!(!is_dangerous_address(0x10));
    }
}
