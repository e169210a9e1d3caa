// src/io/slcan/codec.rs
//
// slcan (Serial Line CAN) ASCII protocol codec.
//
// Protocol reference: http://www.can232.com/docs/can232_v3.pdf
//
// Frame formats:
//   Standard: t<ID:3hex><DLC:1hex><DATA:2hex*DLC>\r
//   Extended: T<ID:8hex><DLC:1hex><DATA:2hex*DLC>\r
//   RTR:      r<ID:3hex><DLC:1hex>\r / R<ID:8hex><DLC:1hex>\r

use crate::io::codec::FrameCodec;
use crate::io::error::IoError;
use crate::io::{now_us, CanFrame, FrameMessage};

/// slcan (Serial Line CAN) ASCII protocol codec.
pub struct SlcanCodec;

impl FrameCodec for SlcanCodec {
    /// Raw frame is an ASCII string (without trailing \r)
    type RawFrame = str;
    /// Encoded frame is a Vec<u8> (ASCII bytes with trailing \r)
    type EncodedFrame = Vec<u8>;

    /// Decode an slcan ASCII frame line.
    ///
    /// Examples:
    ///   `t3E884200000000000000` -> Standard frame, ID=0x3E8, DLC=8
    ///   `T123456782AABB` -> Extended frame, ID=0x12345678, DLC=2
    ///   `r1230` -> Standard RTR, ID=0x123, DLC=0
    fn decode(line: &str) -> Result<FrameMessage, IoError> {
        let bytes = line.as_bytes();
        if bytes.is_empty() {
            return Err(IoError::protocol("slcan", "empty frame"));
        }

        // Determine frame type from first character
        let (is_extended, is_rtr) = match bytes[0] {
            b't' => (false, false),
            b'T' => (true, false),
            b'r' => (false, true),
            b'R' => (true, true),
            c => {
                return Err(IoError::protocol(
                    "slcan",
                    format!("invalid frame prefix: '{}'", c as char),
                ))
            }
        };

        let id_len = if is_extended { 8 } else { 3 };
        let min_len = 1 + id_len + 1; // prefix + ID + DLC

        if bytes.len() < min_len {
            return Err(IoError::protocol(
                "slcan",
                format!(
                    "frame too short: {} bytes, need at least {}",
                    bytes.len(),
                    min_len
                ),
            ));
        }

        let id_str = std::str::from_utf8(&bytes[1..1 + id_len])
            .map_err(|_| IoError::protocol("slcan", "invalid UTF-8 in frame ID"))?;
        let frame_id = u32::from_str_radix(id_str, 16)
            .map_err(|_| IoError::protocol("slcan", format!("invalid hex ID: {}", id_str)))?;

        let dlc_char = bytes[1 + id_len] as char;
        let dlc = dlc_char.to_digit(16).ok_or_else(|| {
            IoError::protocol("slcan", format!("invalid DLC character: '{}'", dlc_char))
        })? as u8;

        if dlc > 8 {
            return Err(IoError::protocol(
                "slcan",
                format!("invalid DLC: {} (max 8)", dlc),
            ));
        }

        let mut data = Vec::with_capacity(dlc as usize);
        if !is_rtr && dlc > 0 {
            let data_start = 1 + id_len + 1;
            let expected_len = data_start + (dlc as usize * 2);

            if bytes.len() < expected_len {
                return Err(IoError::protocol(
                    "slcan",
                    format!(
                        "incomplete data: {} bytes, need {}",
                        bytes.len(),
                        expected_len
                    ),
                ));
            }

            data = hex::decode(&bytes[data_start..expected_len]).map_err(|e| {
                IoError::protocol("slcan", format!("invalid hex data: {}", e))
            })?;
        }

        Ok(FrameMessage {
            timestamp_us: now_us(),
            frame_id,
            dlc,
            bytes: data,
            is_extended,
        })
    }

    /// Encode a CAN frame to slcan ASCII format.
    ///
    /// Returns ASCII bytes including trailing `\r`.
    fn encode(frame: &CanFrame) -> Result<Vec<u8>, IoError> {
        let mut cmd = String::with_capacity(22);
        cmd.push('t');
        cmd.push_str(&format!("{:03X}", frame.id()));
        cmd.push_str(&format!("{:X}", frame.data().len()));
        cmd.push_str(&hex::encode_upper(frame.data()));
        cmd.push('\r');
        Ok(cmd.into_bytes())
    }
}
