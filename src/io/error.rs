// src/io/error.rs
//
// Typed transport errors shared by all CAN channel drivers.
// Every variant carries the device string (e.g. "slcan(/dev/ttyACM0)") so a
// failure can be traced back to the physical channel.

use thiserror::Error;

/// Transport-level error raised by a `CanPort` implementation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum IoError {
    /// The channel could not be opened (bad name, permissions, already in use)
    #[error("{device}: connection failed: {message}")]
    Connection { device: String, message: String },
    /// The device spoke something we could not parse or refused a command
    #[error("{device}: protocol error: {message}")]
    Protocol { device: String, message: String },
    /// Underlying read failed mid-operation
    #[error("{device}: read failed: {message}")]
    Read { device: String, message: String },
    /// Underlying write failed mid-operation
    #[error("{device}: write failed: {message}")]
    Write { device: String, message: String },
    /// A bounded wait on the device expired
    #[error("{device}: timed out during {operation}")]
    Timeout { device: String, operation: String },
    /// Invalid channel or driver configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl IoError {
    pub fn connection(device: &str, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn protocol(device: &str, message: impl Into<String>) -> Self {
        IoError::Protocol {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn read(device: &str, message: impl Into<String>) -> Self {
        IoError::Read {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn write(device: &str, message: impl Into<String>) -> Self {
        IoError::Write {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(device: &str, operation: impl Into<String>) -> Self {
        IoError::Timeout {
            device: device.to_string(),
            operation: operation.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        IoError::Configuration(message.into())
    }

    /// True when the channel itself could not be opened.
    pub fn is_connection(&self) -> bool {
        matches!(self, IoError::Connection { .. })
    }
}

impl From<IoError> for String {
    fn from(e: IoError) -> Self {
        e.to_string()
    }
}
