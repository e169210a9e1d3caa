// src/io/simulator.rs
//
// In-process simulated actuator implementing `CanPort`.
//
// Behaviour mirrors what the programming protocol expects from hardware:
// - keepalive (0x49 on 0x3F0)        -> ACK on 0x3EB with 0x53 at payload[1]
// - select (0x31, page, address)     -> one byte on 0x3E8: [value, address, ...]
//                                       (page 0x0C addresses the EEPROM)
// - write (0x57, _, _, value)        -> stores value at the last EEPROM select
// Telemetry frames can be queued to appear on 0x3EA, noise frames can be
// interleaved, and individual addresses or the ACK can be withheld to
// exercise timeout paths. Every frame sent to the simulator is recorded.
//
// Clones of the `SimHandle` share state with the port, so a test can keep a
// handle after moving the port into a connection.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::error::IoError;
use super::traits::CanPort;
use super::CanFrame;

/// Size of the simulated EEPROM
pub const SIM_MEMORY_SIZE: usize = 128;

const SIM_REQUEST_ID: u16 = 0x3F0;
const SIM_MEMORY_RESPONSE_ID: u16 = 0x3E8;
const SIM_TELEMETRY_ID: u16 = 0x3EA;
const SIM_ACK_ID: u16 = 0x3EB;

const OP_KEEPALIVE: u8 = 0x49;
const OP_SELECT: u8 = 0x31;
const OP_WRITE: u8 = 0x57;
const EEPROM_PAGE: u8 = 0x0C;

/// Longest a simulated receive will actually sleep when idle
const IDLE_SLICE: Duration = Duration::from_millis(2);

#[derive(Debug)]
struct SimState {
    memory: [u8; SIM_MEMORY_SIZE],
    selected: Option<u8>,
    silent_addresses: HashSet<u8>,
    ack_enabled: bool,
    replies_enabled: bool,
    noise: bool,
    rx_queue: VecDeque<CanFrame>,
    sent: Vec<CanFrame>,
    fail_sends_after: Option<usize>,
}

impl SimState {
    fn push(&mut self, id: u16, data: [u8; 8]) {
        if let Ok(frame) = CanFrame::new(id, data) {
            if self.noise {
                // Unrelated bus traffic ahead of every reply
                if let Ok(noise) = CanFrame::new(0x123, [0xAA; 8]) {
                    self.rx_queue.push_back(noise);
                }
            }
            self.rx_queue.push_back(frame);
        }
    }

    fn handle(&mut self, frame: &CanFrame) {
        if frame.id() != SIM_REQUEST_ID {
            return;
        }
        let d = frame.data();
        match d[0] {
            OP_KEEPALIVE => {
                if self.ack_enabled {
                    self.push(SIM_ACK_ID, [0x00, 0x53, 0, 0, 0, 0, 0, 0]);
                }
            }
            OP_SELECT => {
                let address = d[2];
                if d[1] == EEPROM_PAGE && (address as usize) < SIM_MEMORY_SIZE {
                    self.selected = Some(address);
                    if self.replies_enabled && !self.silent_addresses.contains(&address) {
                        let value = self.memory[address as usize];
                        self.push(SIM_MEMORY_RESPONSE_ID, [value, address, 0, 0, 0, 0, 0, 0]);
                    }
                } else {
                    self.selected = None;
                    if self.replies_enabled {
                        self.push(SIM_MEMORY_RESPONSE_ID, [0x00, address, d[1], 0, 0, 0, 0, 0]);
                    }
                }
            }
            OP_WRITE => {
                if let Some(address) = self.selected {
                    self.memory[address as usize] = d[3];
                }
            }
            _ => {}
        }
    }
}

/// Inspection/control handle onto a simulator's shared state.
#[derive(Clone, Debug)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panic while holding the lock only happens in a failing test
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Every frame sent to the simulator so far, in order
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.lock().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }

    /// Current EEPROM contents
    pub fn memory(&self) -> [u8; SIM_MEMORY_SIZE] {
        self.lock().memory
    }

    pub fn set_byte(&self, address: u8, value: u8) {
        if let Some(slot) = self.lock().memory.get_mut(address as usize) {
            *slot = value;
        }
    }

    /// Never answer reads of this address
    pub fn silence_address(&self, address: u8) {
        self.lock().silent_addresses.insert(address);
    }

    pub fn set_ack_enabled(&self, enabled: bool) {
        self.lock().ack_enabled = enabled;
    }

    /// Turn memory-select replies on or off
    pub fn set_replies_enabled(&self, enabled: bool) {
        self.lock().replies_enabled = enabled;
    }

    /// Interleave an unrelated frame ahead of every reply
    pub fn set_noise(&self, enabled: bool) {
        self.lock().noise = enabled;
    }

    /// Queue a telemetry frame on 0x3EA
    pub fn push_telemetry(&self, payload: [u8; 8]) {
        self.lock().push(SIM_TELEMETRY_ID, payload);
    }

    /// Queue an arbitrary frame for the next receive
    pub fn inject(&self, frame: CanFrame) {
        self.lock().rx_queue.push_back(frame);
    }

    /// Frames waiting to be received
    pub fn pending(&self) -> usize {
        self.lock().rx_queue.len()
    }

    /// Make every send after the first `count` fail with a write error
    pub fn fail_sends_after(&self, count: usize) {
        self.lock().fail_sends_after = Some(count);
    }
}

/// Simulated actuator on a virtual CAN channel.
#[derive(Debug)]
pub struct SimulatedActuator {
    handle: SimHandle,
}

impl SimulatedActuator {
    /// A simulator with an all-zero EEPROM
    pub fn new() -> Self {
        Self::with_memory([0u8; SIM_MEMORY_SIZE])
    }

    pub fn with_memory(memory: [u8; SIM_MEMORY_SIZE]) -> Self {
        let state = SimState {
            memory,
            selected: None,
            silent_addresses: HashSet::new(),
            ack_enabled: true,
            replies_enabled: true,
            noise: false,
            rx_queue: VecDeque::new(),
            sent: Vec::new(),
            fail_sends_after: None,
        };
        Self {
            handle: SimHandle {
                state: Arc::new(Mutex::new(state)),
            },
        }
    }

    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }
}

impl Default for SimulatedActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl CanPort for SimulatedActuator {
    fn device(&self) -> String {
        "simulator".to_string()
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), IoError> {
        let mut state = self.handle.lock();
        if let Some(limit) = state.fail_sends_after {
            if state.sent.len() >= limit {
                return Err(IoError::write("simulator", "bus off"));
            }
        }
        state.sent.push(*frame);
        state.handle(frame);
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<CanFrame>, IoError> {
        if let Some(frame) = self.handle.lock().rx_queue.pop_front() {
            return Ok(Some(frame));
        }
        std::thread::sleep(timeout.min(IDLE_SLICE));
        Ok(None)
    }
}
