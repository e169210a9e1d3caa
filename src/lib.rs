// src/lib.rs
//
// EEPROM programming and telemetry for Hella universal turbo actuators over
// CAN.
//
//   io        transport layer (CanFrame, CanPort, SocketCAN / slcan / simulator)
//   actuator  protocol engine (handshake, memory, position limits, calibration)
//   session   async wrapper serialising access to one connection
//   settings  protocol configuration and the settings file

#[macro_use]
pub mod logging;

pub mod actuator;
pub mod io;
pub mod session;
pub mod settings;

pub use actuator::{
    Connection, ConnectionState, ImageAnalysis, MemoryAddress, MemoryImage, Phase, ProgError,
    TelemetrySample,
};
pub use io::{CanFrame, CanPort, ChannelSpec, IoError};
pub use session::ActuatorSession;
pub use settings::{load_settings, AppSettings, ProtocolConfig};
