// src/actuator/sequences.rs
//
// Programming sequences as data.
//
// Each sequence is a captured list of request-frame payloads replayed in
// order. Most frames are fixed; the few that carry caller data name the
// slot they take their byte from. Rendering a template with a set of slot
// values yields the exact payload list sent on the wire, which keeps the
// sequences auditable and snapshot-testable without a transport.

use crate::io::FRAME_LEN;
use crate::settings::ProtocolConfig;

use super::error::ProgError;
use super::frames::{self, OP_END, OP_SELECT, OP_WRITE, PAGE_EEPROM};

/// Range byte written by set_min / set_max, as captured
pub const DEFAULT_RANGE_BYTE: u8 = 99;

/// EEPROM addresses of the stored minimum position (high, low)
pub const MIN_POSITION_ADDRESSES: [u8; 2] = [0x03, 0x04];
/// EEPROM addresses of the stored maximum position (high, low)
pub const MAX_POSITION_ADDRESSES: [u8; 2] = [0x05, 0x06];
/// EEPROM address of the range byte
pub const RANGE_ADDRESS: u8 = 0x22;
/// Burst read used by read_min_max: min pair, max pair, range byte
pub const MIN_MAX_BURST: [u8; 5] = [0x03, 0x04, 0x05, 0x06, 0x22];

// ============================================================================
// Templates
// ============================================================================

/// Named byte a template frame takes from the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// EEPROM address receiving the position high byte
    HighAddress,
    /// EEPROM address receiving the position low byte
    LowAddress,
    /// Position high byte
    High,
    /// Position low byte
    Low,
    /// Range byte stored at 0x22
    Range,
    /// Target address of a single-byte write
    Address,
    /// Value of a single-byte write
    Value,
}

/// One frame of a programming sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateFrame {
    Fixed([u8; FRAME_LEN]),
    /// `31 0C <slot>`
    SelectEeprom(Slot),
    /// `57 00 00 <slot>`
    Write(Slot),
}

/// Values for the slots a template references.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotValues {
    pub high_address: Option<u8>,
    pub low_address: Option<u8>,
    pub high: Option<u8>,
    pub low: Option<u8>,
    pub range: Option<u8>,
    pub address: Option<u8>,
    pub value: Option<u8>,
}

impl SlotValues {
    fn get(&self, slot: Slot) -> Option<u8> {
        match slot {
            Slot::HighAddress => self.high_address,
            Slot::LowAddress => self.low_address,
            Slot::High => self.high,
            Slot::Low => self.low,
            Slot::Range => self.range,
            Slot::Address => self.address,
            Slot::Value => self.value,
        }
    }
}

const fn sel(page: u8, register: u8) -> TemplateFrame {
    TemplateFrame::Fixed([OP_SELECT, page, register, 0, 0, 0, 0, 0])
}

const fn wr(value: u8) -> TemplateFrame {
    TemplateFrame::Fixed([OP_WRITE, 0, 0, value, 0, 0, 0, 0])
}

const END: TemplateFrame = TemplateFrame::Fixed([OP_END, 0, 0, 0, 0, 0, 0, 0]);

/// Session/status register selected between almost every step
const STATUS: TemplateFrame = sel(0x00, 0x94);
/// Programming mode register
const MODE: TemplateFrame = sel(0x01, 0x5D);

/// Stores a position pair and the range byte (set_min / set_max / set_min_max).
pub const POSITION_LIMIT: [TemplateFrame; 34] = [
    STATUS,
    MODE,
    wr(0x05),
    STATUS,
    STATUS,
    wr(0x2D),
    TemplateFrame::SelectEeprom(Slot::HighAddress),
    TemplateFrame::Write(Slot::High),
    TemplateFrame::SelectEeprom(Slot::LowAddress),
    TemplateFrame::Write(Slot::Low),
    STATUS,
    wr(0x00),
    STATUS,
    wr(0x2D),
    sel(PAGE_EEPROM, 0x05),
    sel(PAGE_EEPROM, 0x06),
    STATUS,
    wr(0x00),
    STATUS,
    wr(0x8D),
    sel(PAGE_EEPROM, RANGE_ADDRESS),
    TemplateFrame::Write(Slot::Range),
    STATUS,
    wr(0x00),
    STATUS,
    wr(0x8D),
    sel(PAGE_EEPROM, 0x23),
    STATUS,
    wr(0x00),
    STATUS,
    MODE,
    wr(0x02),
    STATUS,
    END,
];

/// Stores one EEPROM byte.
pub const WRITE_BYTE: [TemplateFrame; 16] = [
    STATUS,
    MODE,
    wr(0x05),
    STATUS,
    STATUS,
    wr(0x2D),
    TemplateFrame::SelectEeprom(Slot::Address),
    TemplateFrame::Write(Slot::Value),
    STATUS,
    wr(0x00),
    STATUS,
    wr(0x8D),
    MODE,
    wr(0x02),
    STATUS,
    END,
];

/// Calibration phase 1: enter calibration and drive to the first end stop.
pub const CALIBRATION_ENABLE: [TemplateFrame; 17] = [
    STATUS,
    MODE,
    wr(0x05),
    STATUS,
    STATUS,
    sel(0x01, 0x63),
    wr(0x28),
    STATUS,
    STATUS,
    sel(0x00, 0x80),
    wr(0x01),
    STATUS,
    STATUS,
    sel(0x01, 0x61),
    wr(0x01),
    STATUS,
    END,
];

/// Calibration phase 2: drive to the second end stop.
pub const CALIBRATION_SWEEP: [TemplateFrame; 12] = [
    sel(0x01, 0x61),
    wr(0x00),
    STATUS,
    STATUS,
    sel(0x00, 0x80),
    wr(0x00),
    STATUS,
    STATUS,
    sel(0x01, 0x61),
    wr(0x01),
    STATUS,
    END,
];

/// Calibration phase 3: leave calibration and restore normal mode.
pub const CALIBRATION_RESTORE: [TemplateFrame; 9] = [
    STATUS,
    sel(0x01, 0x61),
    wr(0x00),
    STATUS,
    STATUS,
    MODE,
    wr(0x02),
    STATUS,
    END,
];

// ============================================================================
// Rendering
// ============================================================================

/// Fill a template's slots. Fails if a referenced slot has no value.
pub fn render(
    template: &[TemplateFrame],
    values: &SlotValues,
) -> Result<Vec<[u8; FRAME_LEN]>, ProgError> {
    template
        .iter()
        .map(|frame| match *frame {
            TemplateFrame::Fixed(data) => Ok(data),
            TemplateFrame::SelectEeprom(slot) => values
                .get(slot)
                .map(|register| frames::encode_select(PAGE_EEPROM, register))
                .ok_or_else(|| missing(slot)),
            TemplateFrame::Write(slot) => values
                .get(slot)
                .map(frames::encode_write)
                .ok_or_else(|| missing(slot)),
        })
        .collect()
}

fn missing(slot: Slot) -> ProgError {
    ProgError::invalid_argument(format!("template slot {:?} has no value", slot))
}

fn position_values(config: &ProtocolConfig, addresses: [u8; 2], value: u16, range: u8) -> SlotValues {
    let (high, low) = frames::split_position(config, value);
    SlotValues {
        high_address: Some(addresses[0]),
        low_address: Some(addresses[1]),
        high: Some(high),
        low: Some(low),
        range: Some(range),
        ..SlotValues::default()
    }
}

/// Frames storing `value` as the maximum position.
pub fn set_max_frames(config: &ProtocolConfig, value: u16) -> Result<Vec<[u8; FRAME_LEN]>, ProgError> {
    render(
        &POSITION_LIMIT,
        &position_values(config, MAX_POSITION_ADDRESSES, value, DEFAULT_RANGE_BYTE),
    )
}

/// Frames storing `value` as the minimum position.
pub fn set_min_frames(config: &ProtocolConfig, value: u16) -> Result<Vec<[u8; FRAME_LEN]>, ProgError> {
    render(
        &POSITION_LIMIT,
        &position_values(config, MIN_POSITION_ADDRESSES, value, DEFAULT_RANGE_BYTE),
    )
}

/// Frames storing `min` as the minimum position and a range byte derived
/// from the span. The maximum itself is implied by the range byte.
pub fn set_min_max_frames(
    config: &ProtocolConfig,
    min: u16,
    max: u16,
) -> Result<Vec<[u8; FRAME_LEN]>, ProgError> {
    let range = frames::range_byte(min, max).ok_or_else(|| {
        ProgError::invalid_argument(format!(
            "range (0x{:04X} - 0x{:04X}) / 4 does not fit in one byte",
            max, min
        ))
    })?;
    render(
        &POSITION_LIMIT,
        &position_values(config, MIN_POSITION_ADDRESSES, min, range),
    )
}

/// Frames storing one EEPROM byte.
pub fn write_byte_frames(address: u8, value: u8) -> Result<Vec<[u8; FRAME_LEN]>, ProgError> {
    render(
        &WRITE_BYTE,
        &SlotValues {
            address: Some(address),
            value: Some(value),
            ..SlotValues::default()
        },
    )
}

/// The three calibration phases, in order.
pub fn calibration_phases() -> Result<[Vec<[u8; FRAME_LEN]>; 3], ProgError> {
    let none = SlotValues::default();
    Ok([
        render(&CALIBRATION_ENABLE, &none)?,
        render(&CALIBRATION_SWEEP, &none)?,
        render(&CALIBRATION_RESTORE, &none)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::frames::OP_KEEPALIVE;

    /// Keepalives are sent by the engine, never from a template
    fn no_keepalive(template: &[TemplateFrame]) -> bool {
        template
            .iter()
            .all(|f| !matches!(f, TemplateFrame::Fixed(d) if d[0] == OP_KEEPALIVE))
    }

    fn f(bytes: &[u8]) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..bytes.len()].copy_from_slice(bytes);
        out
    }

    fn position_snapshot(high_addr: u8, low_addr: u8, x: u8, y: u8, z: u8) -> Vec<[u8; 8]> {
        vec![
            f(&[0x31, 0x00, 0x94]),
            f(&[0x31, 0x01, 0x5D]),
            f(&[0x57, 0x00, 0x00, 0x05]),
            f(&[0x31, 0x00, 0x94]),
            f(&[0x31, 0x00, 0x94]),
            f(&[0x57, 0x00, 0x00, 0x2D]),
            f(&[0x31, 0x0C, high_addr]),
            f(&[0x57, 0x00, 0x00, x]),
            f(&[0x31, 0x0C, low_addr]),
            f(&[0x57, 0x00, 0x00, y]),
            f(&[0x31, 0x00, 0x94]),
            f(&[0x57, 0x00, 0x00, 0x00]),
            f(&[0x31, 0x00, 0x94]),
            f(&[0x57, 0x00, 0x00, 0x2D]),
            f(&[0x31, 0x0C, 0x05]),
            f(&[0x31, 0x0C, 0x06]),
            f(&[0x31, 0x00, 0x94]),
            f(&[0x57, 0x00, 0x00, 0x00]),
            f(&[0x31, 0x00, 0x94]),
            f(&[0x57, 0x00, 0x00, 0x8D]),
            f(&[0x31, 0x0C, 0x22]),
            f(&[0x57, 0x00, 0x00, z]),
            f(&[0x31, 0x00, 0x94]),
            f(&[0x57, 0x00, 0x00, 0x00]),
            f(&[0x31, 0x00, 0x94]),
            f(&[0x57, 0x00, 0x00, 0x8D]),
            f(&[0x31, 0x0C, 0x23]),
            f(&[0x31, 0x00, 0x94]),
            f(&[0x57, 0x00, 0x00, 0x00]),
            f(&[0x31, 0x00, 0x94]),
            f(&[0x31, 0x01, 0x5D]),
            f(&[0x57, 0x00, 0x00, 0x02]),
            f(&[0x31, 0x00, 0x94]),
            f(&[0x44]),
        ]
    }

    #[test]
    fn test_set_max_snapshot() {
        let cfg = ProtocolConfig::default();
        let frames = set_max_frames(&cfg, 0x0220).unwrap();
        assert_eq!(frames, position_snapshot(0x05, 0x06, 0x01, 0x20, 99));
    }

    #[test]
    fn test_set_min_snapshot() {
        let cfg = ProtocolConfig::default();
        let frames = set_min_frames(&cfg, 0x0113).unwrap();
        assert_eq!(frames, position_snapshot(0x03, 0x04, 0x00, 0x13, 99));
    }

    #[test]
    fn test_set_min_max_snapshot() {
        let cfg = ProtocolConfig::default();
        let frames = set_min_max_frames(&cfg, 0x0113, 0x0220).unwrap();
        assert_eq!(frames, position_snapshot(0x03, 0x04, 0x00, 0x13, 0x43));
    }

    #[test]
    fn test_set_min_max_rejects_unencodable_range() {
        let cfg = ProtocolConfig::default();
        assert!(matches!(
            set_min_max_frames(&cfg, 0x0220, 0x0113),
            Err(ProgError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let cfg = ProtocolConfig::default();
        assert_eq!(set_max_frames(&cfg, 0x01F4).unwrap(), set_max_frames(&cfg, 0x01F4).unwrap());
        assert_ne!(set_max_frames(&cfg, 0x01F4).unwrap(), set_max_frames(&cfg, 0x01F5).unwrap());
    }

    #[test]
    fn test_write_byte_snapshot() {
        let frames = write_byte_frames(0x10, 0xAB).unwrap();
        assert_eq!(
            frames,
            vec![
                f(&[0x31, 0x00, 0x94]),
                f(&[0x31, 0x01, 0x5D]),
                f(&[0x57, 0x00, 0x00, 0x05]),
                f(&[0x31, 0x00, 0x94]),
                f(&[0x31, 0x00, 0x94]),
                f(&[0x57, 0x00, 0x00, 0x2D]),
                f(&[0x31, 0x0C, 0x10]),
                f(&[0x57, 0x00, 0x00, 0xAB]),
                f(&[0x31, 0x00, 0x94]),
                f(&[0x57, 0x00, 0x00, 0x00]),
                f(&[0x31, 0x00, 0x94]),
                f(&[0x57, 0x00, 0x00, 0x8D]),
                f(&[0x31, 0x01, 0x5D]),
                f(&[0x57, 0x00, 0x00, 0x02]),
                f(&[0x31, 0x00, 0x94]),
                f(&[0x44]),
            ]
        );
    }

    #[test]
    fn test_calibration_snapshot() {
        let [enable, sweep, restore] = calibration_phases().unwrap();
        assert_eq!(
            enable,
            vec![
                f(&[49, 0, 148]),
                f(&[49, 1, 93]),
                f(&[87, 0, 0, 5]),
                f(&[49, 0, 148]),
                f(&[49, 0, 148]),
                f(&[49, 1, 99]),
                f(&[87, 0, 0, 40]),
                f(&[49, 0, 148]),
                f(&[49, 0, 148]),
                f(&[49, 0, 128]),
                f(&[87, 0, 0, 1]),
                f(&[49, 0, 148]),
                f(&[49, 0, 148]),
                f(&[49, 1, 97]),
                f(&[87, 0, 0, 1]),
                f(&[49, 0, 148]),
                f(&[68]),
            ]
        );
        assert_eq!(
            sweep,
            vec![
                f(&[49, 1, 97]),
                f(&[87, 0, 0, 0]),
                f(&[49, 0, 148]),
                f(&[49, 0, 148]),
                f(&[49, 0, 128]),
                f(&[87, 0, 0, 0]),
                f(&[49, 0, 148]),
                f(&[49, 0, 148]),
                f(&[49, 1, 97]),
                f(&[87, 0, 0, 1]),
                f(&[49, 0, 148]),
                f(&[68]),
            ]
        );
        assert_eq!(
            restore,
            vec![
                f(&[49, 0, 148]),
                f(&[49, 1, 97]),
                f(&[87, 0, 0, 0]),
                f(&[49, 0, 148]),
                f(&[49, 0, 148]),
                f(&[49, 1, 93]),
                f(&[87, 0, 0, 2]),
                f(&[49, 0, 148]),
                f(&[68]),
            ]
        );
    }

    #[test]
    fn test_missing_slot_is_rejected() {
        assert!(render(&WRITE_BYTE, &SlotValues::default()).is_err());
    }

    #[test]
    fn test_templates_never_embed_keepalive() {
        assert!(no_keepalive(&POSITION_LIMIT));
        assert!(no_keepalive(&WRITE_BYTE));
        assert!(no_keepalive(&CALIBRATION_ENABLE));
        assert!(no_keepalive(&CALIBRATION_SWEEP));
        assert!(no_keepalive(&CALIBRATION_RESTORE));
    }
}
