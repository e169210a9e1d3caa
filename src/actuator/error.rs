// src/actuator/error.rs
//
// Engine-level error taxonomy. Transport failures are wrapped with the
// phase that was in progress, never swallowed.

use std::fmt;

use crate::io::IoError;

/// What the engine was doing when it gave up waiting or the transport failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Disconnect,
    Handshake,
    MemoryRead { address: u8 },
    MemoryWrite { address: u8 },
    /// A fixed frame sequence (set_min / set_max / set_min_max)
    Sequence(&'static str),
    Calibration { step: u8 },
    Telemetry,
    Drain,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Disconnect => write!(f, "disconnect"),
            Phase::Handshake => write!(f, "handshake"),
            Phase::MemoryRead { address } => write!(f, "memory read at 0x{:02X}", address),
            Phase::MemoryWrite { address } => write!(f, "memory write at 0x{:02X}", address),
            Phase::Sequence(name) => write!(f, "{} sequence", name),
            Phase::Calibration { step } => write!(f, "calibration step {}", step),
            Phase::Telemetry => write!(f, "telemetry"),
            Phase::Drain => write!(f, "drain"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProgError {
    /// The channel could not be opened (bad spec, permissions, already in use)
    #[error("connection failed: {0}")]
    Connection(#[source] IoError),

    /// No response arrived in time
    #[error("timed out during {0}")]
    Timeout(Phase),

    /// Rejected before anything was sent
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The transport failed mid-operation
    #[error("transport error during {phase}: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: IoError,
    },

    /// The operation was used on a closed connection
    #[error("not connected")]
    NotConnected,

    /// A blocking worker task panicked or was cancelled
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl ProgError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ProgError::InvalidArgument(msg.into())
    }

    /// Adapter for `map_err` on transport calls
    pub fn transport(phase: Phase) -> impl FnOnce(IoError) -> Self {
        move |source| ProgError::Transport { phase, source }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProgError::Timeout(_))
    }
}

impl From<ProgError> for String {
    fn from(e: ProgError) -> String {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_address() {
        let err = ProgError::Timeout(Phase::MemoryRead { address: 0x2A });
        assert_eq!(err.to_string(), "timed out during memory read at 0x2A");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_transport_wraps_source() {
        let err = ProgError::transport(Phase::MemoryWrite { address: 0x05 })(IoError::write(
            "simulator",
            "bus off",
        ));
        match &err {
            ProgError::Transport { phase, source } => {
                assert_eq!(*phase, Phase::MemoryWrite { address: 0x05 });
                assert_eq!(source, &IoError::write("simulator", "bus off"));
            }
            other => panic!("Expected transport error, got {:?}", other),
        }
        assert!(err.to_string().starts_with("transport error during memory write at 0x05"));
    }
}
