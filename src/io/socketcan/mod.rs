// src/io/socketcan/mod.rs
//
// SocketCAN driver for Linux native CAN interfaces.
// Used with CANable Pro (Candlelight firmware) or native CAN hardware.
//
// Requires the interface to be configured first:
//   sudo ip link set can0 up type can bitrate 500000
//
// This module is only compiled on Linux.

mod port;

pub use port::SocketCanPort;
