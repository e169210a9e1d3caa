// src/actuator/memory.rs
//
// The 128-byte EEPROM image and what is known about its layout.
//
// Known offsets:
//   0x03-0x04  minimum position (big-endian)
//   0x05-0x06  maximum position (big-endian)
//   0x22       range byte, roughly (max - min) / 4
//   0x24-0x25  request CAN ID word
//   0x27-0x28  response CAN ID word
//   0x29       control mode / programming ID selector
//   0x2A       live CAN ID high component
//   0x2C       live CAN ID shift component
//   0x28-0x2F  message format block, mirrored at 0x68-0x6F
//   0x41       interface config flags
//
// Everything here is diagnostic. Nothing in this module is used on a write
// path.

use serde::Serialize;
use std::fmt::Write as _;

use super::error::ProgError;
use super::frames::{combine_position, MAX_ADDRESS, MEMORY_SIZE};

/// Interface config flag: position command taken from CAN instead of PWM
pub const IFACE_PWM_FROM_CAN: u8 = 0x10;
/// Interface config flag: actuator transmits telemetry
pub const IFACE_CAN_TX: u8 = 0x40;
/// Interface config flag: motor turns counter-clockwise
pub const IFACE_MOTOR_CCW: u8 = 0x01;

const ADDR_MIN_POSITION: usize = 0x03;
const ADDR_MAX_POSITION: usize = 0x05;
const ADDR_RANGE: usize = 0x22;
const ADDR_REQUEST_ID: usize = 0x24;
const ADDR_RESPONSE_ID: usize = 0x27;
const ADDR_CONFIG: usize = 0x29;
const ADDR_CAN_ID_HIGH: usize = 0x2A;
const ADDR_CAN_ID_SHIFT: usize = 0x2C;
const ADDR_INTERFACE: usize = 0x41;
const FORMAT_BLOCK: std::ops::Range<usize> = 0x28..0x30;
const FORMAT_BLOCK_MIRROR: std::ops::Range<usize> = 0x68..0x70;

// ============================================================================
// Addresses
// ============================================================================

/// A validated EEPROM address (0x00-0x7F).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MemoryAddress(u8);

impl MemoryAddress {
    pub fn new(address: u16) -> Result<Self, ProgError> {
        if address > u16::from(MAX_ADDRESS) {
            return Err(ProgError::invalid_argument(format!(
                "address 0x{:02X} outside 0x00-0x{:02X}",
                address, MAX_ADDRESS
            )));
        }
        Ok(Self(address as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Every address in ascending order
    pub fn all() -> impl Iterator<Item = MemoryAddress> {
        (0..=MAX_ADDRESS).map(MemoryAddress)
    }
}

impl TryFrom<u16> for MemoryAddress {
    type Error = ProgError;

    fn try_from(address: u16) -> Result<Self, Self::Error> {
        Self::new(address)
    }
}

/// Live bus identifier derived from the two CAN-ID configuration bytes.
pub fn derive_can_id(high: u8, shift: u8) -> u16 {
    (u16::from(high) << 8) | (u16::from(shift) << 2)
}

// ============================================================================
// Image
// ============================================================================

/// A complete EEPROM image. Only ever built from all 128 bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct MemoryImage {
    bytes: [u8; MEMORY_SIZE],
}

impl std::fmt::Debug for MemoryImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImage")
            .field("bytes", &hex::encode_upper(self.bytes))
            .finish()
    }
}

impl MemoryImage {
    pub fn new(bytes: [u8; MEMORY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Accept a persisted dump. Anything but exactly 128 bytes is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProgError> {
        let bytes: [u8; MEMORY_SIZE] = bytes.try_into().map_err(|_| {
            ProgError::invalid_argument(format!(
                "memory image must be {} bytes, got {}",
                MEMORY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; MEMORY_SIZE] {
        &self.bytes
    }

    pub fn get(&self, address: MemoryAddress) -> u8 {
        self.bytes[address.get() as usize]
    }

    fn word(&self, at: usize) -> u16 {
        combine_position(self.bytes[at], self.bytes[at + 1])
    }

    pub fn min_position(&self) -> u16 {
        self.word(ADDR_MIN_POSITION)
    }

    pub fn max_position(&self) -> u16 {
        self.word(ADDR_MAX_POSITION)
    }

    pub fn range_byte(&self) -> u8 {
        self.bytes[ADDR_RANGE]
    }

    /// `(max - min) / 4`, or `None` when max does not exceed min.
    pub fn expected_range(&self) -> Option<u16> {
        let (min, max) = (self.min_position(), self.max_position());
        (max > min).then(|| (max - min) / 4)
    }

    /// Range byte within one of the expected value.
    pub fn range_consistent(&self) -> Option<bool> {
        self.expected_range()
            .map(|expected| (i32::from(self.range_byte()) - i32::from(expected)).abs() <= 1)
    }

    pub fn config_byte(&self) -> u8 {
        self.bytes[ADDR_CONFIG]
    }

    pub fn interface_config(&self) -> InterfaceConfig {
        InterfaceConfig::from_byte(self.bytes[ADDR_INTERFACE])
    }

    pub fn request_id_word(&self) -> u16 {
        self.word(ADDR_REQUEST_ID)
    }

    pub fn response_id_word(&self) -> u16 {
        self.word(ADDR_RESPONSE_ID)
    }

    pub fn format_block(&self) -> &[u8] {
        &self.bytes[FORMAT_BLOCK]
    }

    pub fn format_block_mirror(&self) -> &[u8] {
        &self.bytes[FORMAT_BLOCK_MIRROR]
    }

    /// The 0x28 block and its 0x68 mirror agree.
    pub fn mirror_consistent(&self) -> bool {
        self.format_block() == self.format_block_mirror()
    }

    /// Identifier the actuator should be transmitting telemetry on.
    pub fn expected_can_id(&self) -> u16 {
        derive_can_id(self.bytes[ADDR_CAN_ID_HIGH], self.bytes[ADDR_CAN_ID_SHIFT])
    }

    pub fn analyze(&self, observed_can_id: Option<u16>) -> ImageAnalysis {
        let expected_can_id = self.expected_can_id();
        ImageAnalysis {
            min_position: self.min_position(),
            max_position: self.max_position(),
            range_byte: self.range_byte(),
            expected_range: self.expected_range(),
            range_consistent: self.range_consistent(),
            config_byte: self.config_byte(),
            interface: self.interface_config(),
            request_id_word: self.request_id_word(),
            response_id_word: self.response_id_word(),
            mirror_consistent: self.mirror_consistent(),
            expected_can_id,
            observed_can_id,
            can_id_matches: observed_can_id.map(|id| id == expected_can_id),
        }
    }

    /// 16 bytes per row with an ASCII gutter:
    /// `00: 08 62 A0 ...  |.b..............|`
    pub fn hex_dump(&self) -> String {
        let mut out = String::with_capacity(MEMORY_SIZE * 5);
        for (row, chunk) in self.bytes.chunks(16).enumerate() {
            let _ = write!(out, "{:02X}:", row * 16);
            for b in chunk {
                let _ = write!(out, " {:02X}", b);
            }
            out.push_str("  |");
            out.extend(chunk.iter().map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                }
            }));
            out.push_str("|\n");
        }
        out
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// How the actuator takes its position command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ControlMode {
    /// Position commanded over CAN
    Can,
    /// Position commanded by the PWM input
    Pwm,
}

/// Decoded interface config byte (0x41).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct InterfaceConfig {
    pub raw: u8,
    pub pwm_from_can: bool,
    pub can_tx: bool,
    pub motor_ccw: bool,
    pub control_mode: ControlMode,
}

impl InterfaceConfig {
    pub fn from_byte(raw: u8) -> Self {
        let pwm_from_can = raw & IFACE_PWM_FROM_CAN != 0;
        Self {
            raw,
            pwm_from_can,
            can_tx: raw & IFACE_CAN_TX != 0,
            motor_ccw: raw & IFACE_MOTOR_CCW != 0,
            control_mode: if pwm_from_can {
                ControlMode::Can
            } else {
                ControlMode::Pwm
            },
        }
    }
}

/// Summary of everything known about an image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageAnalysis {
    pub min_position: u16,
    pub max_position: u16,
    pub range_byte: u8,
    pub expected_range: Option<u16>,
    pub range_consistent: Option<bool>,
    pub config_byte: u8,
    pub interface: InterfaceConfig,
    pub request_id_word: u16,
    pub response_id_word: u16,
    pub mirror_consistent: bool,
    pub expected_can_id: u16,
    pub observed_can_id: Option<u16>,
    pub can_id_matches: Option<bool>,
}

impl std::fmt::Display for ImageAnalysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Min position (0x03-04): 0x{:04X} ({})", self.min_position, self.min_position)?;
        writeln!(f, "Max position (0x05-06): 0x{:04X} ({})", self.max_position, self.max_position)?;
        write!(f, "Range byte (0x22):      0x{:02X}", self.range_byte)?;
        match (self.expected_range, self.range_consistent) {
            (Some(expected), Some(true)) => writeln!(f, " (expected {}, ok)", expected)?,
            (Some(expected), _) => writeln!(f, " (expected {}, differs)", expected)?,
            (None, _) => writeln!(f, " (max does not exceed min)")?,
        }
        writeln!(f, "Config byte (0x29):     0x{:02X}", self.config_byte)?;
        writeln!(
            f,
            "Interface (0x41):       0x{:02X} PWM from CAN: {}, CAN TX: {}, Motor: {}, Mode: {:?}",
            self.interface.raw,
            yes_no(self.interface.pwm_from_can),
            yes_no(self.interface.can_tx),
            if self.interface.motor_ccw { "CCW" } else { "CW" },
            self.interface.control_mode
        )?;
        writeln!(f, "Request ID word (0x24): 0x{:04X}", self.request_id_word)?;
        writeln!(f, "Response ID word (0x27): 0x{:04X}", self.response_id_word)?;
        writeln!(
            f,
            "Block 0x28 mirror:      {}",
            if self.mirror_consistent { "identical" } else { "DIFFERS" }
        )?;
        write!(f, "Derived CAN ID:         0x{:03X}", self.expected_can_id)?;
        match (self.observed_can_id, self.can_id_matches) {
            (Some(observed), Some(true)) => write!(f, " (matches observed 0x{:03X})", observed),
            (Some(observed), _) => write!(f, " (observed 0x{:03X}, MISMATCH)", observed),
            _ => Ok(()),
        }
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Yes"
    } else {
        "No"
    }
}

// ============================================================================
// Comparison
// ============================================================================

/// Byte-by-byte comparison of several images.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DumpComparison {
    /// Addresses holding the same value in every image
    pub common: Vec<(u8, u8)>,
    /// Addresses that differ, with each image's value in input order
    pub varying: Vec<(u8, Vec<u8>)>,
}

pub fn compare_images(images: &[MemoryImage]) -> DumpComparison {
    let mut comparison = DumpComparison::default();
    let Some(first) = images.first() else {
        return comparison;
    };

    for address in MemoryAddress::all() {
        let reference = first.get(address);
        if images.iter().all(|img| img.get(address) == reference) {
            comparison.common.push((address.get(), reference));
        } else {
            let values = images.iter().map(|img| img.get(address)).collect();
            comparison.varying.push((address.get(), values));
        }
    }
    comparison
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An image with consistent limits, mirror block and CAN ID bytes
    fn sample_image() -> MemoryImage {
        let mut bytes = [0u8; MEMORY_SIZE];
        bytes[0x03] = 0x01;
        bytes[0x04] = 0x13;
        bytes[0x05] = 0x02;
        bytes[0x06] = 0x20;
        bytes[0x22] = 0x43;
        bytes[0x24] = 0x3F;
        bytes[0x25] = 0x00;
        bytes[0x27] = 0x3E;
        let block = [0x08, 0x62, 0x06, 0xA0, 0x96, 0x02, 0x1D, 0x09];
        bytes[0x28..0x30].copy_from_slice(&block);
        bytes[0x68..0x70].copy_from_slice(&block);
        bytes[0x41] = 0x51;
        MemoryImage::new(bytes)
    }

    #[test]
    fn test_derive_can_id() {
        assert_eq!(derive_can_id(0x06, 0x96), 0x658);
        let mut bytes = [0u8; MEMORY_SIZE];
        bytes[0x2A] = 0x06;
        bytes[0x2C] = 0x96;
        assert_eq!(MemoryImage::new(bytes).expected_can_id(), 0x658);
    }

    #[test]
    fn test_address_range() {
        assert_eq!(MemoryAddress::new(0x7F).unwrap().get(), 0x7F);
        assert!(matches!(MemoryAddress::new(0x80), Err(ProgError::InvalidArgument(_))));
        assert!(MemoryAddress::try_from(0x100u16).is_err());
        assert_eq!(MemoryAddress::all().count(), 128);
    }

    #[test]
    fn test_from_bytes_requires_full_image() {
        assert!(MemoryImage::from_bytes(&[0u8; 128]).is_ok());
        assert!(MemoryImage::from_bytes(&[0u8; 127]).is_err());
        assert!(MemoryImage::from_bytes(&[0u8; 129]).is_err());
    }

    #[test]
    fn test_analysis_of_sample_image() {
        let analysis = sample_image().analyze(Some(0x658));
        assert_eq!(analysis.min_position, 0x0113);
        assert_eq!(analysis.max_position, 0x0220);
        assert_eq!(analysis.expected_range, Some(67));
        assert_eq!(analysis.range_consistent, Some(true));
        assert_eq!(analysis.request_id_word, 0x3F00);
        assert_eq!(analysis.response_id_word, 0x3E08);
        assert!(analysis.mirror_consistent);
        assert_eq!(analysis.expected_can_id, 0x658);
        assert_eq!(analysis.can_id_matches, Some(true));

        assert!(analysis.interface.pwm_from_can);
        assert!(analysis.interface.can_tx);
        assert!(analysis.interface.motor_ccw);
        assert_eq!(analysis.interface.control_mode, ControlMode::Can);

        assert!(analysis.to_string().contains("Derived CAN ID:         0x658 (matches observed 0x658)"));
    }

    #[test]
    fn test_analysis_flags_inconsistencies() {
        let mut bytes = *sample_image().as_bytes();
        bytes[0x22] = 0x50;
        bytes[0x6B] = 0x00;
        let analysis = MemoryImage::new(bytes).analyze(Some(0x65A));
        assert_eq!(analysis.range_consistent, Some(false));
        assert!(!analysis.mirror_consistent);
        assert_eq!(analysis.can_id_matches, Some(false));
    }

    #[test]
    fn test_hex_dump_layout() {
        let dump = sample_image().hex_dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 8);
        assert!(lines[0].starts_with("00: 00 00 00 01 13 02 20"));
        assert!(lines[2].starts_with("20: 00 00 43 00 3F 00 00 3E 08 62 06 A0 96 02 1D 09"));
        assert!(lines[2].ends_with("|..C.?..>.b......|"));
    }

    #[test]
    fn test_compare_images() {
        let a = sample_image();
        let mut bytes = *a.as_bytes();
        bytes[0x2A] = 0x07;
        let b = MemoryImage::new(bytes);

        let comparison = compare_images(&[a, b]);
        assert_eq!(comparison.varying, vec![(0x2A, vec![0x06, 0x07])]);
        assert_eq!(comparison.common.len(), 127);
        assert!(compare_images(&[]).common.is_empty());
    }
}
