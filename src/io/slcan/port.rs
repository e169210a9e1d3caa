// src/io/slcan/port.rs
//
// Blocking slcan transport over a serial port.
//
// The adapter is initialised with the usual Lawicel sequence:
//   C\r (close) -> S<n>\r (bitrate) -> M0\r (normal mode) -> O\r (open)
// Received frames arrive as `\r`-terminated ASCII lines; the adapter also
// echoes `z\r` / `Z\r` for transmit acks and `\x07` (BEL) for errors, which
// are skipped.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use crate::io::codec::FrameCodec;
use crate::io::error::IoError;
use crate::io::traits::CanPort;
use crate::io::CanFrame;

use super::codec::SlcanCodec;

// ============================================================================
// Constants
// ============================================================================

/// slcan bitrate commands (S0-S8)
const SLCAN_BITRATES: [(u32, &str); 9] = [
    (10_000, "S0"),
    (20_000, "S1"),
    (50_000, "S2"),
    (100_000, "S3"),
    (125_000, "S4"),
    (250_000, "S5"),
    (500_000, "S6"),
    (750_000, "S7"),
    (1_000_000, "S8"),
];

/// Upper bound on a single serial read while polling for a frame
const SERIAL_READ_SLICE: Duration = Duration::from_millis(50);

/// BEL, sent by the adapter when it rejects a command
const SLCAN_ERROR: u8 = 0x07;

// ============================================================================
// Utility Functions
// ============================================================================

/// Find the slcan bitrate command for a given bitrate
pub fn find_bitrate_command(bitrate: u32) -> Result<&'static str, IoError> {
    SLCAN_BITRATES
        .iter()
        .find(|(rate, _)| *rate == bitrate)
        .map(|(_, cmd)| *cmd)
        .ok_or_else(|| {
            let valid: Vec<String> = SLCAN_BITRATES.iter().map(|(r, _)| format!("{}", r)).collect();
            IoError::configuration(format!(
                "Invalid CAN bitrate {}. Valid bitrates: {}",
                bitrate,
                valid.join(", ")
            ))
        })
}

/// Pop the first complete line (terminated by `\r` or BEL) out of `buf`.
/// Returns the line without its terminator.
fn take_line(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let pos = buf.iter().position(|&b| b == b'\r' || b == SLCAN_ERROR)?;
    let mut line: Vec<u8> = buf.drain(..=pos).collect();
    line.pop();
    Some(line)
}

// ============================================================================
// Port
// ============================================================================

/// An open slcan adapter.
pub struct SlcanPort {
    device: String,
    port: Box<dyn serialport::SerialPort>,
    rx_buf: Vec<u8>,
}

impl SlcanPort {
    /// Open the serial port and bring the CAN channel up at `bitrate`.
    pub fn open(path: &str, baud_rate: u32, bitrate: u32) -> Result<Self, IoError> {
        let device = format!("slcan({})", path);
        let bitrate_cmd = find_bitrate_command(bitrate)?;

        let mut port = serialport::new(path, baud_rate)
            .timeout(SERIAL_READ_SLICE)
            .open()
            .map_err(|e| IoError::connection(&device, e.to_string()))?;

        tlog!("[slcan] Opened {} at {} baud", path, baud_rate);

        let _ = port.clear(serialport::ClearBuffer::All);

        // Wait for USB device to be ready
        std::thread::sleep(Duration::from_millis(200));

        // Close any existing channel first (in case device is in open state)
        let _ = port.write_all(b"C\r");
        let _ = port.flush();
        std::thread::sleep(Duration::from_millis(50));
        let _ = port.clear(serialport::ClearBuffer::All);

        let init = [format!("{}\r", bitrate_cmd), "M0\r".to_string(), "O\r".to_string()];
        for cmd in &init {
            port.write_all(cmd.as_bytes()).map_err(|e| {
                IoError::protocol(&device, format!("send {}: {}", cmd.trim_end(), e))
            })?;
            let _ = port.flush();
            std::thread::sleep(Duration::from_millis(50));
        }

        tlog!("[slcan] Channel open on {} ({} bit/s)", path, bitrate);

        Ok(Self {
            device,
            port,
            rx_buf: Vec::with_capacity(64),
        })
    }
}

impl CanPort for SlcanPort {
    fn device(&self) -> String {
        self.device.clone()
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), IoError> {
        let encoded = SlcanCodec::encode(frame)?;
        self.port
            .write_all(&encoded)
            .map_err(|e| IoError::write(&self.device, e.to_string()))?;
        self.port
            .flush()
            .map_err(|e| IoError::write(&self.device, e.to_string()))
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<CanFrame>, IoError> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 64];

        loop {
            while let Some(line) = take_line(&mut self.rx_buf) {
                let text = String::from_utf8_lossy(&line);
                // Non-frame lines (transmit acks, status replies) do not decode
                if let Ok(msg) = SlcanCodec::decode(text.trim()) {
                    if let Some(frame) = CanFrame::from_message(&msg) {
                        return Ok(Some(frame));
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let slice = (deadline - now).min(SERIAL_READ_SLICE);
            self.port
                .set_timeout(slice)
                .map_err(|e| IoError::read(&self.device, format!("set timeout: {}", e)))?;

            match self.port.read(&mut buf) {
                Ok(n) => self.rx_buf.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(IoError::read(&self.device, e.to_string())),
            }
        }
    }

    fn close(&mut self) -> Result<(), IoError> {
        self.port
            .write_all(b"C\r")
            .map_err(|e| IoError::write(&self.device, format!("close channel: {}", e)))?;
        let _ = self.port.flush();
        tlog!("[slcan] Channel closed on {}", self.device);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_bitrate_command() {
        assert_eq!(find_bitrate_command(500_000).unwrap(), "S6");
        assert_eq!(find_bitrate_command(1_000_000).unwrap(), "S8");
        assert!(find_bitrate_command(400_000).is_err());
    }

    #[test]
    fn test_take_line_splits_on_cr_and_bell() {
        let mut buf = b"z\rt3E8800\x07rest".to_vec();
        assert_eq!(take_line(&mut buf).unwrap(), b"z".to_vec());
        assert_eq!(take_line(&mut buf).unwrap(), b"t3E8800".to_vec());
        assert!(take_line(&mut buf).is_none());
        assert_eq!(buf, b"rest".to_vec());
    }
}
