// src/io/types.rs
//
// Channel selection types shared by the drivers, the settings file and the CLI.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::IoError;

/// Default serial line rate for slcan adapters
pub const DEFAULT_SLCAN_BAUD_RATE: u32 = 128_000;
/// Default CAN bus bitrate used by the actuator
pub const DEFAULT_CAN_BITRATE: u32 = 500_000;

fn default_baud_rate() -> u32 {
    DEFAULT_SLCAN_BAUD_RATE
}
fn default_bitrate() -> u32 {
    DEFAULT_CAN_BITRATE
}

/// Which physical (or simulated) CAN channel to open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelSpec {
    /// Linux SocketCAN interface, already brought up by the OS (e.g. "can0")
    Socketcan { interface: String },
    /// Serial Line CAN adapter (CANable, USBtin, ...)
    Slcan {
        /// Serial port path (e.g., "/dev/ttyACM0", "COM3")
        port: String,
        /// Serial baud rate
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// CAN bus bitrate in bits/second
        #[serde(default = "default_bitrate")]
        bitrate: u32,
    },
    /// In-process simulated actuator (dry runs)
    Simulator,
}

impl ChannelSpec {
    /// Stable key identifying the physical channel, used to enforce
    /// one open connection per channel.
    pub fn channel_key(&self) -> String {
        match self {
            ChannelSpec::Socketcan { interface } => format!("socketcan:{}", interface),
            ChannelSpec::Slcan { port, .. } => format!("slcan:{}", port),
            ChannelSpec::Simulator => "sim".to_string(),
        }
    }
}

impl Default for ChannelSpec {
    fn default() -> Self {
        ChannelSpec::Socketcan {
            interface: "can0".to_string(),
        }
    }
}

impl fmt::Display for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelSpec::Socketcan { interface } => write!(f, "socketcan:{}", interface),
            ChannelSpec::Slcan {
                port, baud_rate, ..
            } => write!(f, "slcan:{}@{}", port, baud_rate),
            ChannelSpec::Simulator => write!(f, "sim"),
        }
    }
}

/// Parse `socketcan:can0`, `slcan:/dev/ttyACM0[@baud]` or `sim`.
impl FromStr for ChannelSpec {
    type Err = IoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "sim" || s == "simulator" {
            return Ok(ChannelSpec::Simulator);
        }

        let (kind, rest) = s.split_once(':').ok_or_else(|| {
            IoError::configuration(format!(
                "Invalid channel '{}'. Expected socketcan:<iface>, slcan:<port>[@baud] or sim",
                s
            ))
        })?;

        if rest.is_empty() {
            return Err(IoError::configuration(format!("Missing device in channel '{}'", s)));
        }

        match kind {
            "socketcan" => Ok(ChannelSpec::Socketcan {
                interface: rest.to_string(),
            }),
            "slcan" => {
                let (port, baud_rate) = match rest.rsplit_once('@') {
                    Some((port, baud)) => {
                        let baud = baud.parse::<u32>().map_err(|_| {
                            IoError::configuration(format!("Invalid baud rate '{}'", baud))
                        })?;
                        (port.to_string(), baud)
                    }
                    None => (rest.to_string(), DEFAULT_SLCAN_BAUD_RATE),
                };
                Ok(ChannelSpec::Slcan {
                    port,
                    baud_rate,
                    bitrate: DEFAULT_CAN_BITRATE,
                })
            }
            other => Err(IoError::configuration(format!(
                "Unknown channel kind '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_socketcan() {
        let spec: ChannelSpec = "socketcan:can0".parse().unwrap();
        assert_eq!(
            spec,
            ChannelSpec::Socketcan {
                interface: "can0".to_string()
            }
        );
        assert_eq!(spec.channel_key(), "socketcan:can0");
    }

    #[test]
    fn test_parse_slcan_with_and_without_baud() {
        let spec: ChannelSpec = "slcan:/dev/ttyACM0".parse().unwrap();
        assert_eq!(
            spec,
            ChannelSpec::Slcan {
                port: "/dev/ttyACM0".to_string(),
                baud_rate: DEFAULT_SLCAN_BAUD_RATE,
                bitrate: DEFAULT_CAN_BITRATE,
            }
        );

        let spec: ChannelSpec = "slcan:COM3@115200".parse().unwrap();
        match spec {
            ChannelSpec::Slcan { port, baud_rate, .. } => {
                assert_eq!(port, "COM3");
                assert_eq!(baud_rate, 115_200);
            }
            other => panic!("Expected slcan, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("can0".parse::<ChannelSpec>().is_err());
        assert!("socketcan:".parse::<ChannelSpec>().is_err());
        assert!("pcan:usb1".parse::<ChannelSpec>().is_err());
        assert!("slcan:/dev/ttyACM0@fast".parse::<ChannelSpec>().is_err());
    }

    #[test]
    fn test_parse_simulator() {
        assert_eq!("sim".parse::<ChannelSpec>().unwrap(), ChannelSpec::Simulator);
    }

    #[test]
    fn test_deserialize_tagged_with_defaults() {
        let spec: ChannelSpec =
            serde_json::from_str(r#"{"kind":"slcan","port":"/dev/ttyUSB0"}"#).unwrap();
        assert_eq!(
            spec,
            ChannelSpec::Slcan {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: DEFAULT_SLCAN_BAUD_RATE,
                bitrate: DEFAULT_CAN_BITRATE,
            }
        );
    }
}
