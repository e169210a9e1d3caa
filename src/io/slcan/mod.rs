// src/io/slcan/mod.rs
//
// slcan (Serial Line CAN) protocol driver for CANable, USBtin and other
// USB-CAN adapters using the Lawicel/slcan ASCII protocol.
//
// Protocol reference: http://www.can232.com/docs/can232_v3.pdf

pub mod codec;
mod port;

// Note: SlcanCodec is also available via io::codec::SlcanCodec
pub use port::{find_bitrate_command, SlcanPort};
