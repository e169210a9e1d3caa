// src/actuator/telemetry.rs
//
// Telemetry frame decoding.
//
// Payload layout:
//   byte 0    status
//   byte 1    reserved
//   bytes 2-3 position, big-endian, inverted scale (688 closed .. 212 open)
//   byte 4    reserved
//   byte 5    temperature in degrees C
//   bytes 6-7 motor load, big-endian

use serde::Serialize;
use std::fmt;

/// Position reported with the actuator fully closed
pub const POSITION_CLOSED: u16 = 688;
/// Position reported with the actuator fully open
pub const POSITION_OPEN: u16 = 212;

/// One decoded telemetry frame. Never cached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TelemetrySample {
    pub position: u16,
    pub status: u8,
    pub temperature_c: u8,
    pub motor_load: u16,
    /// Host UNIX timestamp in microseconds
    pub timestamp_us: u64,
}

impl TelemetrySample {
    /// Decode a telemetry payload. Short payloads are absent data.
    pub fn decode(bytes: &[u8], timestamp_us: u64) -> Option<Self> {
        if bytes.len() < 8 {
            return None;
        }
        Some(Self {
            position: u16::from_be_bytes([bytes[2], bytes[3]]),
            status: bytes[0],
            temperature_c: bytes[5],
            motor_load: u16::from_be_bytes([bytes[6], bytes[7]]),
            timestamp_us,
        })
    }

    /// Opening in percent (0 closed, 100 open), or `None` outside 212..=688.
    pub fn percent_open(&self) -> Option<u8> {
        if !(POSITION_OPEN..=POSITION_CLOSED).contains(&self.position) {
            return None;
        }
        let span = u32::from(POSITION_CLOSED - POSITION_OPEN);
        let travelled = u32::from(POSITION_CLOSED - self.position);
        Some((travelled * 100 / span) as u8)
    }
}

impl fmt::Display for TelemetrySample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pos: {:04X} ", self.position)?;
        match self.percent_open() {
            Some(p) => write!(f, "({}%)", p)?,
            None => write!(f, "(out of range)")?,
        }
        write!(
            f,
            " Status: {:02X} Temp: {}C Load: {}",
            self.status, self.temperature_c, self.motor_load
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reference_frame() {
        let sample =
            TelemetrySample::decode(&[0x04, 0x00, 0x00, 0xB2, 0x00, 0x19, 0x00, 0x00], 42).unwrap();
        assert_eq!(sample.position, 0x00B2);
        assert_eq!(sample.position, 178);
        assert_eq!(sample.status, 0x04);
        assert_eq!(sample.temperature_c, 25);
        assert_eq!(sample.motor_load, 0);
        assert_eq!(sample.timestamp_us, 42);
        // 178 is below the open end of the scale
        assert_eq!(sample.percent_open(), None);
    }

    #[test]
    fn test_decode_big_endian_fields() {
        let sample =
            TelemetrySample::decode(&[0x01, 0xFF, 0x02, 0xB0, 0xFF, 0x30, 0x01, 0x02], 0).unwrap();
        assert_eq!(sample.position, 0x02B0);
        assert_eq!(sample.temperature_c, 0x30);
        assert_eq!(sample.motor_load, 0x0102);
    }

    #[test]
    fn test_short_payload_is_absent() {
        assert!(TelemetrySample::decode(&[0x04, 0x00, 0x00, 0xB2], 0).is_none());
    }

    #[test]
    fn test_percent_open_scale() {
        let at = |position| TelemetrySample {
            position,
            status: 0,
            temperature_c: 0,
            motor_load: 0,
            timestamp_us: 0,
        };
        assert_eq!(at(688).percent_open(), Some(0));
        assert_eq!(at(212).percent_open(), Some(100));
        assert_eq!(at(450).percent_open(), Some(50));
        assert_eq!(at(689).percent_open(), None);
        assert_eq!(at(211).percent_open(), None);
    }

    #[test]
    fn test_display() {
        let sample =
            TelemetrySample::decode(&[0x04, 0x00, 0x02, 0xB0, 0x00, 0x19, 0x00, 0x05], 0).unwrap();
        assert_eq!(sample.to_string(), "Pos: 02B0 (0%) Status: 04 Temp: 25C Load: 5");
    }
}
