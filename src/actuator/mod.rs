// src/actuator/mod.rs
//
// Protocol engine for the turbo actuator.
//
// A `Connection` exclusively owns one CAN channel. Every public operation is
// a blocking send/poll cycle: it re-handshakes, sends the frames it needs and
// waits for the matching response under a wall-clock deadline. Nothing read
// from the actuator is cached, and a failed operation leaves no state behind
// that the next call depends on.

pub mod error;
pub mod frames;
pub mod memory;
pub mod sequences;
pub mod telemetry;

pub use error::{Phase, ProgError};
pub use memory::{compare_images, derive_can_id, DumpComparison, ImageAnalysis, MemoryAddress, MemoryImage};
pub use telemetry::TelemetrySample;

use serde::Serialize;
use std::time::{Duration, Instant};

use crate::io::{open_channel, CanFrame, CanPort, ChannelLease, ChannelSpec, FRAME_LEN};
use crate::settings::ProtocolConfig;

use frames::MEMORY_SIZE;
use sequences::{MAX_POSITION_ADDRESSES, MIN_MAX_BURST, MIN_POSITION_ADDRESSES};

/// Lifecycle of a connection. `Disconnected` is terminal.
///
/// A `Connection` only exists once its channel is open, so the connecting
/// step is the `Connection::connect` call itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// An open programming connection to one actuator.
pub struct Connection {
    port: Option<Box<dyn CanPort>>,
    config: ProtocolConfig,
    state: ConnectionState,
    device: String,
    // Held for the lifetime of the connection; released on drop
    _lease: Option<ChannelLease>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("device", &self.device)
            .field("state", &self.state)
            .finish()
    }
}

impl Connection {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open the channel. No handshake is sent here; each operation
    /// handshakes on its own.
    pub fn connect(spec: &ChannelSpec, config: ProtocolConfig) -> Result<Self, ProgError> {
        config.validate().map_err(ProgError::InvalidArgument)?;

        let lease = ChannelLease::acquire(&spec.channel_key()).map_err(ProgError::Connection)?;
        tlog!("[engine] Connecting to {}", spec);

        let port = open_channel(spec).map_err(|e| {
            tlog!("[engine] Failed to open {}: {}", spec, e);
            ProgError::Connection(e)
        })?;

        let mut conn = Self::from_parts(port, config);
        conn._lease = Some(lease);
        Ok(conn)
    }

    /// Wrap an already-open port (simulators, custom transports). No
    /// channel lease is taken.
    pub fn with_port(port: Box<dyn CanPort>, config: ProtocolConfig) -> Result<Self, ProgError> {
        config.validate().map_err(ProgError::InvalidArgument)?;
        Ok(Self::from_parts(port, config))
    }

    fn from_parts(port: Box<dyn CanPort>, config: ProtocolConfig) -> Self {
        let device = port.device();
        tlog!("[engine] Connected to {}", device);
        Self {
            device,
            port: Some(port),
            config,
            state: ConnectionState::Connected,
            _lease: None,
        }
    }

    /// Close the channel. Further operations fail with `NotConnected`.
    pub fn disconnect(&mut self) -> Result<(), ProgError> {
        let result = match self.port.take() {
            Some(mut port) => port.close().map_err(ProgError::transport(Phase::Disconnect)),
            None => Ok(()),
        };
        self.state = ConnectionState::Disconnected;
        self._lease = None;
        tlog!("[engine] Disconnected from {}", self.device);
        result
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    // ========================================================================
    // Wire helpers
    // ========================================================================

    fn port(&mut self) -> Result<&mut Box<dyn CanPort>, ProgError> {
        self.port.as_mut().ok_or(ProgError::NotConnected)
    }

    fn send(&mut self, data: [u8; FRAME_LEN], phase: Phase) -> Result<(), ProgError> {
        let frame = frames::request_frame(&self.config, data)?;
        self.port()?.send(&frame).map_err(ProgError::transport(phase))
    }

    /// Send a rendered sequence with the fixed inter-frame delay.
    fn send_sequence(&mut self, sequence: &[[u8; FRAME_LEN]], phase: Phase) -> Result<(), ProgError> {
        let delay = self.config.frame_delay();
        for data in sequence {
            self.send(*data, phase)?;
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
        Ok(())
    }

    /// Poll until `matcher` accepts a frame or `timeout` elapses.
    /// Frames the matcher rejects are skipped, not treated as errors.
    fn wait_for<T>(
        &mut self,
        timeout: Duration,
        phase: Phase,
        mut matcher: impl FnMut(&ProtocolConfig, &CanFrame) -> Option<T>,
    ) -> Result<T, ProgError> {
        let Self { port, config, .. } = self;
        let config = &*config;
        let port = port.as_mut().ok_or(ProgError::NotConnected)?;
        let deadline = Instant::now() + timeout;
        let poll = config.poll_interval();

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(ProgError::Timeout(phase));
            }
            let slice = poll.min(deadline - now);
            if let Some(frame) = port.recv(slice).map_err(ProgError::transport(phase))? {
                if let Some(found) = matcher(config, &frame) {
                    return Ok(found);
                }
            }
        }
    }

    /// Read until one receive comes back empty or the drain budget runs
    /// out. Each frame read is handed to `on_frame`. Returns how many frames
    /// were discarded.
    fn drain_with(&mut self, mut on_frame: impl FnMut(&ProtocolConfig, &CanFrame)) -> Result<usize, ProgError> {
        let Self { port, config, .. } = self;
        let config = &*config;
        let port = port.as_mut().ok_or(ProgError::NotConnected)?;
        let deadline = Instant::now() + config.drain_budget();
        let timeout = config.drain_timeout();
        let mut count = 0;

        loop {
            let now = Instant::now();
            if now >= deadline {
                tlog!("[engine] Drain budget spent after {} frames; bus still busy", count);
                break;
            }
            let slice = timeout.min(deadline - now);
            match port.recv(slice).map_err(ProgError::transport(Phase::Drain))? {
                Some(frame) => {
                    on_frame(config, &frame);
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    /// Discard residual responses.
    pub fn drain(&mut self) -> Result<usize, ProgError> {
        self.drain_with(|_, _| {})
    }

    /// Drain, logging any telemetry seen on the way.
    fn drain_telemetry(&mut self) -> Result<Vec<TelemetrySample>, ProgError> {
        let mut samples = Vec::new();
        self.drain_with(|config, frame| {
            if frame.id() == config.telemetry_id {
                if let Some(sample) = TelemetrySample::decode(frame.data(), crate::io::now_us()) {
                    tlog!("[engine] Telemetry {}", sample);
                    samples.push(sample);
                }
            }
        })?;
        Ok(samples)
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    /// Send the keepalive request and wait for a valid acknowledgement.
    /// No retry: callers re-invoke if needed.
    pub fn send_request_and_wait(&mut self) -> Result<(), ProgError> {
        self.send(frames::encode_keepalive(), Phase::Handshake)?;
        let timeout = self.config.handshake_timeout();
        self.wait_for(timeout, Phase::Handshake, |config, frame| {
            frames::is_ack(config, frame).then_some(())
        })
        .map_err(|e| {
            if e.is_timeout() {
                tlog!("[engine] No acknowledgment received for request on {}", self.device);
            }
            e
        })
    }

    // ========================================================================
    // Memory reads
    // ========================================================================

    /// Send `select` for one EEPROM address and wait for its byte. Assumes
    /// a fresh handshake.
    fn read_byte(&mut self, address: u8, select: [u8; FRAME_LEN]) -> Result<u8, ProgError> {
        let phase = Phase::MemoryRead { address };
        self.send(select, phase)?;
        let timeout = self.config.response_timeout();
        self.wait_for(timeout, phase, |config, frame| {
            frames::match_memory_response(config, frame, address)
        })
    }

    /// Positional reads select with the address once, unlike the dump.
    fn read_position_byte(&mut self, address: u8) -> Result<u8, ProgError> {
        self.read_byte(address, frames::encode_select(frames::PAGE_EEPROM, address))
    }

    /// Dump all 128 EEPROM bytes. Any address timing out fails the whole
    /// dump; no partial image is returned.
    pub fn read_memory(&mut self) -> Result<MemoryImage, ProgError> {
        tlog!("[engine] Reading memory from {}", self.device);
        self.send_request_and_wait()?;

        let mut bytes = [0u8; MEMORY_SIZE];
        for address in MemoryAddress::all() {
            bytes[address.get() as usize] = self
                .read_byte(address.get(), frames::encode_memory_read(address.get()))
                .map_err(|e| {
                tlog!("[engine] Memory dump aborted at 0x{:02X}: {}", address.get(), e);
                e
            })?;
        }

        tlog!("[engine] Memory dump completed ({} bytes)", MEMORY_SIZE);
        Ok(MemoryImage::new(bytes))
    }

    /// Read two addresses and combine them big-endian.
    pub fn read_position_pair(&mut self, addresses: [u8; 2]) -> Result<u16, ProgError> {
        for address in addresses {
            MemoryAddress::new(u16::from(address))?;
        }
        self.send_request_and_wait()?;
        let high = self.read_position_byte(addresses[0])?;
        let low = self.read_position_byte(addresses[1])?;
        Ok(frames::combine_position(high, low))
    }

    /// Stored minimum position (0x03, 0x04)
    pub fn read_min(&mut self) -> Result<u16, ProgError> {
        tlog!("[engine] Reading minimum position");
        self.read_position_pair(MIN_POSITION_ADDRESSES)
    }

    /// Stored maximum position (0x05, 0x06)
    pub fn read_max(&mut self) -> Result<u16, ProgError> {
        tlog!("[engine] Reading maximum position");
        self.read_position_pair(MAX_POSITION_ADDRESSES)
    }

    /// Burst-read 0x03, 0x04, 0x05, 0x06, 0x22 and return (min, max).
    /// The range byte is read but only logged.
    pub fn read_min_max(&mut self) -> Result<(u16, u16), ProgError> {
        tlog!("[engine] Reading min/max positions");
        self.send_request_and_wait()?;

        let mut values = [0u8; MIN_MAX_BURST.len()];
        for (slot, address) in values.iter_mut().zip(MIN_MAX_BURST) {
            *slot = self.read_position_byte(address)?;
        }

        let min = frames::combine_position(values[0], values[1]);
        let max = frames::combine_position(values[2], values[3]);
        tlog!(
            "[engine] min=0x{:04X} max=0x{:04X} range byte=0x{:02X}",
            min,
            max,
            values[4]
        );
        Ok((min, max))
    }

    // ========================================================================
    // Position limits
    // ========================================================================

    fn run_sequence(&mut self, name: &'static str, sequence: Vec<[u8; FRAME_LEN]>) -> Result<(), ProgError> {
        let phase = Phase::Sequence(name);
        self.send_request_and_wait()?;
        self.send_sequence(&sequence, phase)?;
        let drained = self.drain()?;
        tlog!(
            "[engine] {} sent ({} frames, {} responses drained); not read back",
            name,
            sequence.len(),
            drained
        );
        Ok(())
    }

    pub fn set_max(&mut self, value: u16) -> Result<(), ProgError> {
        let sequence = sequences::set_max_frames(&self.config, value)?;
        tlog!("[engine] Setting max position to 0x{:04X}", value);
        self.run_sequence("set_max", sequence)
    }

    pub fn set_min(&mut self, value: u16) -> Result<(), ProgError> {
        let sequence = sequences::set_min_frames(&self.config, value)?;
        tlog!("[engine] Setting min position to 0x{:04X}", value);
        self.run_sequence("set_min", sequence)
    }

    /// Store `min` and the range byte `(max - min) / 4`.
    pub fn set_min_max(&mut self, min: u16, max: u16) -> Result<(), ProgError> {
        let sequence = sequences::set_min_max_frames(&self.config, min, max)?;
        tlog!("[engine] Setting min/max positions to 0x{:04X}/0x{:04X}", min, max);
        self.run_sequence("set_min_max", sequence)
    }

    // ========================================================================
    // Calibration
    // ========================================================================

    /// Drive the actuator to both end stops and let it learn them, then
    /// return the stored (min, max). There is no abort once started.
    pub fn find_end_positions(&mut self) -> Result<(u16, u16), ProgError> {
        let [enable, sweep, restore] = sequences::calibration_phases()?;
        let settle = self.config.calibration_settle();
        let drive = self.config.calibration_drive();

        tlog!("[engine] Calibration: entering calibration mode");
        self.send(frames::encode_keepalive(), Phase::Calibration { step: 1 })?;
        std::thread::sleep(settle);
        self.send_sequence(&enable, Phase::Calibration { step: 1 })?;
        std::thread::sleep(drive);

        tlog!("[engine] Calibration: sweeping to second end stop");
        self.send(frames::encode_keepalive(), Phase::Calibration { step: 2 })?;
        self.drain_telemetry()?;
        self.send_sequence(&sweep, Phase::Calibration { step: 2 })?;
        std::thread::sleep(drive);

        tlog!("[engine] Calibration: restoring normal mode");
        self.send(frames::encode_keepalive(), Phase::Calibration { step: 3 })?;
        self.drain_telemetry()?;
        self.send_sequence(&restore, Phase::Calibration { step: 3 })?;
        self.send(frames::encode_keepalive(), Phase::Calibration { step: 3 })?;
        std::thread::sleep(settle);
        self.drain()?;

        let (min, max) = self.read_min_max()?;
        tlog!("[engine] Calibrated positions: 0x{:04X}-0x{:04X}", min, max);
        Ok((min, max))
    }

    // ========================================================================
    // Single-byte write
    // ========================================================================

    /// Write one EEPROM byte. Ranges are checked before anything is sent.
    /// Success means the actuator answered something; the value is not read
    /// back.
    pub fn write_memory_byte(&mut self, address: u16, value: u16) -> Result<(), ProgError> {
        let address = MemoryAddress::new(address)?.get();
        let value = u8::try_from(value).map_err(|_| {
            ProgError::invalid_argument(format!("value 0x{:X} outside 0x00-0xFF", value))
        })?;
        let phase = Phase::MemoryWrite { address };

        if frames::is_dangerous_address(address) {
            tlog!("[engine] WARNING: address 0x{:02X} is dangerous to modify!", address);
            tlog!("[engine] WARNING: this could permanently brick the actuator");
        }
        tlog!("[engine] Writing 0x{:02X} to address 0x{:02X}", value, address);

        let sequence = sequences::write_byte_frames(address, value)?;
        self.send_request_and_wait()?;
        self.send_sequence(&sequence, phase)?;

        let timeout = self.config.response_timeout();
        self.wait_for(timeout, phase, |_, _| Some(()))?;
        self.drain()?;

        tlog!("[engine] Wrote 0x{:02X} to address 0x{:02X}", value, address);
        Ok(())
    }

    // ========================================================================
    // Telemetry
    // ========================================================================

    /// Listen for the next telemetry frame. `None` when none arrives within
    /// the response timeout.
    pub fn read_current_position(&mut self) -> Result<Option<TelemetrySample>, ProgError> {
        let timeout = self.config.response_timeout();
        let result = self.wait_for(timeout, Phase::Telemetry, |config, frame| {
            if frame.id() != config.telemetry_id {
                return None;
            }
            TelemetrySample::decode(frame.data(), crate::io::now_us())
        });
        match result {
            Ok(sample) => {
                tlog!("[engine] {}", sample);
                Ok(Some(sample))
            }
            Err(ProgError::Timeout(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(mut port) = self.port.take() {
            let _ = port.close();
        }
    }
}
