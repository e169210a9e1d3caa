// src/io/codec.rs
//
// Frame codec trait for adapters that carry CAN frames in their own wire
// format (currently the slcan ASCII protocol). SocketCAN hands us structured
// frames through the `socketcan` crate and needs no codec.

use crate::io::error::IoError;
use crate::io::{CanFrame, FrameMessage};

/// Trait for adapter wire-format codecs.
///
/// The associated types define the protocol-specific raw frame formats.
pub trait FrameCodec {
    /// The raw frame type for decoding (e.g., byte slice, ASCII string)
    type RawFrame: ?Sized;

    /// The encoded frame type for transmission
    type EncodedFrame;

    /// Decode a raw frame into a FrameMessage.
    ///
    /// Returns `Err(IoError)` if the frame is malformed or cannot be parsed.
    /// Well-formed frames the actuator cannot use (extended, short) are still
    /// decoded; `CanFrame::from_message` filters them.
    fn decode(raw: &Self::RawFrame) -> Result<FrameMessage, IoError>;

    /// Encode a frame for transmission.
    fn encode(frame: &CanFrame) -> Result<Self::EncodedFrame, IoError>;
}

#[cfg(any(target_os = "windows", target_os = "macos", target_os = "linux"))]
pub use super::slcan::codec::SlcanCodec;
