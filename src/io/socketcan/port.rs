// src/io/socketcan/port.rs
//
// Blocking SocketCAN transport (classic CAN only; the actuator never uses FD).

use socketcan::{
    CanDataFrame, CanFrame as SocketFrame, CanSocket, EmbeddedFrame, Frame, Id, Socket, StandardId,
};
use std::time::{Duration, Instant};

use crate::io::error::IoError;
use crate::io::traits::CanPort;
use crate::io::{now_us, CanFrame, FrameMessage};

/// Convert a received SocketCAN frame into our FrameMessage format.
/// Remote and error frames carry no payload we can use.
fn convert_frame(frame: SocketFrame) -> Option<FrameMessage> {
    match frame {
        SocketFrame::Data(f) => Some(FrameMessage {
            timestamp_us: now_us(),
            frame_id: f.raw_id() & 0x1FFF_FFFF,
            dlc: f.len() as u8,
            bytes: f.data().to_vec(),
            is_extended: f.is_extended(),
        }),
        SocketFrame::Remote(_) => None,
        SocketFrame::Error(_) => None,
    }
}

/// An open SocketCAN interface.
pub struct SocketCanPort {
    device: String,
    socket: CanSocket,
}

impl SocketCanPort {
    /// Open a SocketCAN interface that the OS has already brought up.
    pub fn open(interface: &str) -> Result<Self, IoError> {
        let device = format!("socketcan({})", interface);
        let socket =
            CanSocket::open(interface).map_err(|e| IoError::connection(&device, e.to_string()))?;

        tlog!("[socketcan] Opened interface {}", interface);

        Ok(Self { device, socket })
    }
}

impl CanPort for SocketCanPort {
    fn device(&self) -> String {
        self.device.clone()
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), IoError> {
        let id = StandardId::new(frame.id())
            .ok_or_else(|| IoError::protocol(&self.device, format!("Invalid standard ID: 0x{:03X}", frame.id())))?;
        let data_frame = CanDataFrame::new(Id::Standard(id), frame.data())
            .ok_or_else(|| IoError::protocol(&self.device, "Failed to create standard frame"))?;

        self.socket
            .write_frame(&data_frame)
            .map_err(|e| IoError::write(&self.device, e.to_string()))
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<CanFrame>, IoError> {
        let deadline = Instant::now() + timeout;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            // A zero SO_RCVTIMEO would block forever
            let remaining = (deadline - now).max(Duration::from_millis(1));
            self.socket
                .set_read_timeout(remaining)
                .map_err(|e| IoError::read(&self.device, format!("set read timeout: {}", e)))?;

            match self.socket.read_frame() {
                Ok(frame) => {
                    if let Some(frame) = convert_frame(frame).as_ref().and_then(CanFrame::from_message) {
                        return Ok(Some(frame));
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(IoError::read(&self.device, e.to_string())),
            }
        }
    }

    fn close(&mut self) -> Result<(), IoError> {
        tlog!("[socketcan] Closing {}", self.device);
        Ok(())
    }
}
