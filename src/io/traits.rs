// src/io/traits.rs
//
// The transport port: one send-a-frame / receive-a-frame-with-timeout
// interface that every channel driver implements, plus channel opening and
// the process-wide "one connection per channel" lease.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use super::error::IoError;
use super::types::ChannelSpec;
use super::CanFrame;

/// Send one frame / receive one frame with a timeout.
///
/// `recv` returns `Ok(None)` when nothing usable arrived before the timeout.
/// Drivers drop frames the actuator protocol cannot use (extended, short)
/// rather than reporting them as errors.
pub trait CanPort: Send {
    /// Human-readable device string, e.g. "socketcan(can0)"
    fn device(&self) -> String;

    fn send(&mut self, frame: &CanFrame) -> Result<(), IoError>;

    fn recv(&mut self, timeout: Duration) -> Result<Option<CanFrame>, IoError>;

    /// Release the underlying channel. Default: nothing to do.
    fn close(&mut self) -> Result<(), IoError> {
        Ok(())
    }
}

impl<P: CanPort + ?Sized> CanPort for Box<P> {
    fn device(&self) -> String {
        (**self).device()
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), IoError> {
        (**self).send(frame)
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<CanFrame>, IoError> {
        (**self).recv(timeout)
    }

    fn close(&mut self) -> Result<(), IoError> {
        (**self).close()
    }
}

// ============================================================================
// Channel Opening
// ============================================================================

/// Open the driver for a channel spec.
pub fn open_channel(spec: &ChannelSpec) -> Result<Box<dyn CanPort>, IoError> {
    match spec {
        #[cfg(target_os = "linux")]
        ChannelSpec::Socketcan { interface } => {
            Ok(Box::new(super::socketcan::SocketCanPort::open(interface)?))
        }
        #[cfg(not(target_os = "linux"))]
        ChannelSpec::Socketcan { .. } => Err(IoError::configuration(
            "SocketCAN is only available on Linux",
        )),
        #[cfg(any(target_os = "windows", target_os = "macos", target_os = "linux"))]
        ChannelSpec::Slcan {
            port,
            baud_rate,
            bitrate,
        } => Ok(Box::new(super::slcan::SlcanPort::open(
            port, *baud_rate, *bitrate,
        )?)),
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        ChannelSpec::Slcan { .. } => Err(IoError::configuration(
            "slcan adapters are not supported on this platform",
        )),
        ChannelSpec::Simulator => Ok(Box::new(super::simulator::SimulatedActuator::new())),
    }
}

// ============================================================================
// Channel Leases
// ============================================================================

/// Channels that currently have an open connection
static OPEN_CHANNELS: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Exclusive claim on a channel key. Released on drop.
#[derive(Debug)]
pub struct ChannelLease {
    key: String,
}

impl ChannelLease {
    /// Claim a channel, failing if another connection already holds it.
    pub fn acquire(key: &str) -> Result<Self, IoError> {
        let mut open = OPEN_CHANNELS
            .lock()
            .map_err(|_| IoError::configuration("channel registry poisoned"))?;
        if !open.insert(key.to_string()) {
            return Err(IoError::connection(key, "channel already in use"));
        }
        Ok(Self {
            key: key.to_string(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        if let Ok(mut open) = OPEN_CHANNELS.lock() {
            open.remove(&self.key);
        }
    }
}
