// tools/turboprog_cli/main.rs
//
// Command-line front end for the actuator engine.
//
// Usage:
//   turboprog_cli --channel slcan:/dev/ttyACM0 dump --analyze
//   turboprog_cli --channel socketcan:can0 set-min-max 0x113 0x220
//   turboprog_cli --channel sim calibrate --yes

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use turboprog_lib::actuator::frames::is_dangerous_address;
use turboprog_lib::logging::{init_file_logging, stop_file_logging};
use turboprog_lib::tlog;
use turboprog_lib::{load_settings, ActuatorSession, ChannelSpec};

#[derive(Parser, Debug)]
#[command(author, version, about = "Hella universal turbo actuator programmer", long_about = None)]
struct Args {
    /// CAN channel: `socketcan:can0`, `slcan:/dev/ttyACM0[@baud]` or `sim`
    #[arg(short, long)]
    channel: Option<ChannelSpec>,

    /// Settings file (TOML)
    #[arg(long, default_value = "turboprog.toml")]
    config: PathBuf,

    /// Write a session log into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read and print all 128 bytes of actuator memory
    Dump {
        /// Decode the known fields after the hex dump
        #[arg(long)]
        analyze: bool,
        /// CAN ID seen on the bus, checked against the derived one
        #[arg(long, value_parser = parse_u16)]
        observed: Option<u16>,
        /// Print the analysis as JSON instead of text
        #[arg(long, requires = "analyze")]
        json: bool,
    },
    /// Read both position limits
    ReadMinMax,
    /// Read the minimum position limit
    ReadMin,
    /// Read the maximum position limit
    ReadMax,
    /// Program the minimum position limit
    SetMin {
        #[arg(value_parser = parse_u16)]
        value: u16,
    },
    /// Program the maximum position limit
    SetMax {
        #[arg(value_parser = parse_u16)]
        value: u16,
    },
    /// Program both limits and the matching range byte
    SetMinMax {
        #[arg(value_parser = parse_u16)]
        min: u16,
        #[arg(value_parser = parse_u16)]
        max: u16,
    },
    /// Write one memory byte
    WriteByte {
        #[arg(value_parser = parse_u16)]
        address: u16,
        #[arg(value_parser = parse_u16)]
        value: u16,
        /// Required for addresses that hold identity or interface settings
        #[arg(long)]
        force: bool,
    },
    /// Sweep the actuator to find its mechanical end stops
    Calibrate {
        /// Confirm the actuator is free to move
        #[arg(long)]
        yes: bool,
    },
    /// Print one telemetry sample
    Position,
    /// Print the CAN ID derived from memory
    CanId,
}

/// Decimal or `0x`-prefixed hex.
fn parse_u16(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid value '{}': {}", s, e))
}

async fn run(args: Args) -> Result<(), String> {
    let settings = load_settings(&args.config)?;

    if let Some(dir) = args.log_dir.as_ref().or(settings.log_dir.as_ref()) {
        init_file_logging(dir)?;
    }

    // Refuse before opening the channel
    match &args.command {
        Command::WriteByte { address, force, .. } => {
            if let Ok(addr) = u8::try_from(*address) {
                if is_dangerous_address(addr) && !force {
                    return Err(format!(
                        "Address 0x{:02X} holds identity or interface settings; pass --force to write it",
                        addr
                    ));
                }
            }
        }
        Command::Calibrate { yes: false } => {
            return Err("Calibration moves the actuator through its full travel; pass --yes to proceed".to_string());
        }
        _ => {}
    }

    let channel = args.channel.unwrap_or(settings.channel);
    tlog!("[cli] Connecting to {}", channel);
    let session = ActuatorSession::connect(channel, settings.protocol).await?;

    match args.command {
        Command::Dump {
            analyze,
            observed,
            json,
        } => {
            let image = session.read_memory().await?;
            let analysis = image.analyze(observed);
            if json {
                let text = serde_json::to_string_pretty(&analysis)
                    .map_err(|e| format!("Failed to serialize analysis: {}", e))?;
                println!("{}", text);
            } else {
                println!("{}", image.hex_dump());
                if analyze {
                    println!();
                    println!("{}", analysis);
                }
            }
        }
        Command::ReadMinMax => {
            let (min, max) = session.read_min_max().await?;
            println!("Min: 0x{:04X} ({})", min, min);
            println!("Max: 0x{:04X} ({})", max, max);
        }
        Command::ReadMin => {
            let min = session.read_min().await?;
            println!("Min: 0x{:04X} ({})", min, min);
        }
        Command::ReadMax => {
            let max = session.read_max().await?;
            println!("Max: 0x{:04X} ({})", max, max);
        }
        Command::SetMin { value } => {
            session.set_min(value).await?;
            println!("Min set to 0x{:04X}", value);
        }
        Command::SetMax { value } => {
            session.set_max(value).await?;
            println!("Max set to 0x{:04X}", value);
        }
        Command::SetMinMax { min, max } => {
            session.set_min_max(min, max).await?;
            println!("Min/max set to 0x{:04X}/0x{:04X}", min, max);
        }
        Command::WriteByte { address, value, .. } => {
            session.write_memory_byte(address, value).await?;
            println!("Wrote 0x{:02X} to 0x{:02X}", value, address);
        }
        Command::Calibrate { .. } => {
            let (min, max) = session.find_end_positions().await?;
            println!("End positions: min 0x{:04X} max 0x{:04X}", min, max);
        }
        Command::Position => match session.read_current_position().await? {
            Some(sample) => println!("{}", sample),
            None => println!("No telemetry received"),
        },
        Command::CanId => {
            let image = session.read_memory().await?;
            println!("0x{:03X}", image.expected_can_id());
        }
    }

    session.disconnect().await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    let result = run(args).await;
    stop_file_logging();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
