// src/settings.rs
//
// Protocol timing/identifier configuration and the on-disk settings file.
//
// Every protocol constant the engine uses lives in `ProtocolConfig`, which is
// passed to a `Connection` at construction and never mutated afterwards.
// Durations are stored as milliseconds so the TOML file stays readable.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::io::ChannelSpec;

// ============================================================================
// Protocol Configuration
// ============================================================================

/// Identifiers, markers and timing for the actuator programming protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Engine -> actuator request / keepalive / opcode carrier
    #[serde(default = "default_request_id")]
    pub request_id: u16,
    /// Actuator -> engine memory byte response
    #[serde(default = "default_memory_response_id")]
    pub memory_response_id: u16,
    /// Actuator -> engine telemetry (status, position, temperature, load)
    #[serde(default = "default_telemetry_id")]
    pub telemetry_id: u16,
    /// Actuator -> engine handshake acknowledgement
    #[serde(default = "default_ack_id")]
    pub ack_id: u16,
    #[serde(default = "default_ack_marker")]
    pub ack_marker: u8,
    /// Payload index that must hold `ack_marker`
    #[serde(default = "default_ack_marker_index")]
    pub ack_marker_index: usize,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Wait for a single memory response or write confirmation
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Receive timeout used for each poll while waiting
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Fixed delay after every templated frame
    #[serde(default = "default_frame_delay_ms")]
    pub frame_delay_ms: u64,
    /// Receive timeout for each drain read
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Upper bound on a whole drain, for buses that never go quiet
    #[serde(default = "default_drain_budget_ms")]
    pub drain_budget_ms: u64,
    /// Short settle delay between calibration phases
    #[serde(default = "default_calibration_settle_ms")]
    pub calibration_settle_ms: u64,
    /// Long settle delay while the actuator drives to an end stop
    #[serde(default = "default_calibration_drive_ms")]
    pub calibration_drive_ms: u64,

    /// Right shift applied to a position value to get its high byte
    #[serde(default = "default_position_high_shift")]
    pub position_high_shift: u32,
}

fn default_request_id() -> u16 {
    0x3F0
}
fn default_memory_response_id() -> u16 {
    0x3E8
}
fn default_telemetry_id() -> u16 {
    0x3EA
}
fn default_ack_id() -> u16 {
    0x3EB
}
fn default_ack_marker() -> u8 {
    0x53
}
fn default_ack_marker_index() -> usize {
    1
}
fn default_handshake_timeout_ms() -> u64 {
    1000
}
fn default_response_timeout_ms() -> u64 {
    1000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_frame_delay_ms() -> u64 {
    10
}
fn default_drain_timeout_ms() -> u64 {
    100
}
fn default_drain_budget_ms() -> u64 {
    1000
}
fn default_calibration_settle_ms() -> u64 {
    1000
}
fn default_calibration_drive_ms() -> u64 {
    2000
}
fn default_position_high_shift() -> u32 {
    9
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            request_id: default_request_id(),
            memory_response_id: default_memory_response_id(),
            telemetry_id: default_telemetry_id(),
            ack_id: default_ack_id(),
            ack_marker: default_ack_marker(),
            ack_marker_index: default_ack_marker_index(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            frame_delay_ms: default_frame_delay_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            drain_budget_ms: default_drain_budget_ms(),
            calibration_settle_ms: default_calibration_settle_ms(),
            calibration_drive_ms: default_calibration_drive_ms(),
            position_high_shift: default_position_high_shift(),
        }
    }
}

impl ProtocolConfig {
    /// Short timeouts and no delays, for driving the simulator in tests.
    pub fn fast() -> Self {
        Self {
            handshake_timeout_ms: 50,
            response_timeout_ms: 50,
            poll_interval_ms: 5,
            frame_delay_ms: 0,
            drain_timeout_ms: 1,
            drain_budget_ms: 50,
            calibration_settle_ms: 0,
            calibration_drive_ms: 0,
            ..Self::default()
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        let ids = [
            ("request_id", self.request_id),
            ("memory_response_id", self.memory_response_id),
            ("telemetry_id", self.telemetry_id),
            ("ack_id", self.ack_id),
        ];
        for (name, id) in ids {
            if id > 0x7FF {
                return Err(format!("{} 0x{:X} exceeds 11-bit range", name, id));
            }
        }
        if self.ack_marker_index >= crate::io::FRAME_LEN {
            return Err(format!(
                "ack_marker_index {} is outside the 8-byte payload",
                self.ack_marker_index
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than zero".to_string());
        }
        if self.position_high_shift > 15 {
            return Err(format!(
                "position_high_shift {} leaves no bits of a 16-bit position",
                self.position_high_shift
            ));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn frame_delay(&self) -> Duration {
        Duration::from_millis(self.frame_delay_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn drain_budget(&self) -> Duration {
        Duration::from_millis(self.drain_budget_ms)
    }

    pub fn calibration_settle(&self) -> Duration {
        Duration::from_millis(self.calibration_settle_ms)
    }

    pub fn calibration_drive(&self) -> Duration {
        Duration::from_millis(self.calibration_drive_ms)
    }
}

// ============================================================================
// Settings File
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct AppSettings {
    /// Channel used when the command line does not name one
    #[serde(default)]
    pub channel: ChannelSpec,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Directory for session log files (no file logging when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

/// Load settings from a TOML file. A missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<AppSettings, String> {
    if !path.exists() {
        tlog!("[settings] {} not found, using defaults", path.display());
        return Ok(AppSettings::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read settings: {}", e))?;
    let settings: AppSettings =
        toml::from_str(&content).map_err(|e| format!("Failed to parse settings: {}", e))?;

    settings
        .protocol
        .validate()
        .map_err(|e| format!("Invalid protocol settings: {}", e))?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_protocol_values() {
        let cfg = ProtocolConfig::default();
        assert_eq!(cfg.request_id, 0x3F0);
        assert_eq!(cfg.memory_response_id, 0x3E8);
        assert_eq!(cfg.telemetry_id, 0x3EA);
        assert_eq!(cfg.ack_id, 0x3EB);
        assert_eq!(cfg.ack_marker, 0x53);
        assert_eq!(cfg.ack_marker_index, 1);
        assert_eq!(cfg.handshake_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.poll_interval(), Duration::from_millis(100));
        assert_eq!(cfg.frame_delay(), Duration::from_millis(10));
        assert_eq!(cfg.drain_budget(), Duration::from_secs(1));
        assert_eq!(cfg.position_high_shift, 9);
        assert!(cfg.validate().is_ok());
        assert!(ProtocolConfig::fast().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cfg = ProtocolConfig {
            telemetry_id: 0x800,
            ..ProtocolConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = ProtocolConfig {
            ack_marker_index: 8,
            ..ProtocolConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = ProtocolConfig {
            poll_interval_ms: 0,
            ..ProtocolConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let settings: AppSettings = toml::from_str(
            r#"
log_dir = "/tmp/turboprog-logs"

[channel]
kind = "slcan"
port = "/dev/ttyACM0"

[protocol]
telemetry_id = 0x658
frame_delay_ms = 20
"#,
        )
        .unwrap();

        assert_eq!(settings.protocol.telemetry_id, 0x658);
        assert_eq!(settings.protocol.frame_delay_ms, 20);
        assert_eq!(settings.protocol.request_id, 0x3F0);
        assert_eq!(settings.log_dir, Some(PathBuf::from("/tmp/turboprog-logs")));
        assert_eq!(settings.channel.channel_key(), "slcan:/dev/ttyACM0");
    }

    #[test]
    fn test_load_settings_missing_file_is_default() {
        let path = std::env::temp_dir().join("turboprog-test-no-such-settings.toml");
        let _ = std::fs::remove_file(&path);
        assert_eq!(load_settings(&path).unwrap(), AppSettings::default());
    }

    #[test]
    fn test_load_settings_rejects_invalid_protocol() {
        let path = std::env::temp_dir().join(format!(
            "turboprog-test-invalid-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[protocol]\nack_marker_index = 12\n").unwrap();
        let result = load_settings(&path);
        let _ = std::fs::remove_file(&path);
        assert!(result.is_err());
    }
}
