use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use kilolink_rs::distance::DistanceEstimator;
use kilolink_rs::phy::crc::calculate_crc16;
use kilolink_rs::phy::frame::parse_hex_bytes;
use kilolink_rs::phy::{DistanceMeasurement, Message, PulseEncoder};
use kilolink_rs::robot::CalibrationProfile;
use kilolink_rs::sim::{SimConfig, Swarm};
use kilolink_rs::ui::progress::{ProgressManager, templates};
use kilolink_rs::ui::{print_banner, update_progress};
use kilolink_rs::utils::consts::*;
use kilolink_rs::utils::logging::init_logging;
use kilolink_rs::{KiloError, Result};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// More output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a swarm of robots beaconing to each other
    Simulate {
        #[arg(short, long, default_value_t = 4)]
        robots: usize,
        #[arg(long, default_value_t = DEFAULT_SPACING_MM)]
        spacing: f64,
        #[arg(short, long, default_value_t = DEFAULT_SIM_SECONDS)]
        seconds: u64,
        #[arg(long, default_value_t = 1)]
        seed: u64,
        /// Calibration profile (JSON) flashed into every robot
        #[arg(short, long)]
        profile: Option<PathBuf>,
        /// Write a JSON report here
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Estimate distance from raw high/low gain readings
    Distance {
        #[arg(long)]
        high: i16,
        #[arg(long)]
        low: i16,
        #[arg(short, long)]
        profile: Option<PathBuf>,
    },
    /// Check the CRC of a frame given as hex
    Crc { hex: String },
    /// Build a frame and print its wire bytes
    Encode {
        /// Message type, decimal or 0x-prefixed hex
        #[arg(short = 't', long = "type", value_parser = parse_type)]
        msg_type: u8,
        /// Up to 9 payload bytes as hex
        #[arg(short, long, default_value = "")]
        data: String,
        /// Also print the pulse offsets in CPU cycles
        #[arg(long)]
        pulses: bool,
    },
}

fn parse_type(s: &str) -> std::result::Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid message type '{}': {}", s, e))
}

fn load_profile(path: Option<PathBuf>) -> Result<CalibrationProfile> {
    match path {
        Some(path) => CalibrationProfile::from_json_file(path),
        None => Ok(CalibrationProfile::default()),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn simulate(
    robots: usize,
    spacing: f64,
    seconds: u64,
    seed: u64,
    profile: Option<PathBuf>,
    report: Option<PathBuf>,
) -> Result<()> {
    print_banner();
    let config = SimConfig {
        robots,
        spacing_mm: spacing,
        seed,
        profile: load_profile(profile)?,
        ..Default::default()
    };
    let mut swarm = Swarm::new(config);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    let progress_manager = ProgressManager::new();
    if let Err(e) = progress_manager.create_bar(
        "simulation",
        seconds * 1000,
        templates::SIMULATION,
        &format!("{} robots", swarm.len()),
    ) {
        warn!("No progress bar: {}", e);
    }

    let step = CPU_HZ * PROGRESS_UPDATE_INTERVAL_MS / 1000;
    let end = seconds * CPU_HZ;
    while swarm.now() < end {
        if !running.load(Ordering::SeqCst) {
            info!("Interrupted at {:.2} s", swarm.seconds());
            break;
        }
        swarm.run_until((swarm.now() + step).min(end));
        update_progress(&swarm, &progress_manager);
    }
    progress_manager.finish_all();

    let summary = swarm.report();
    info!(
        "{:.2} s simulated: {} frames sent, {} received, {} collisions",
        summary.seconds,
        summary.frames_sent(),
        summary.frames_received(),
        summary.collisions()
    );
    match summary.mean_distance_error_mm() {
        Some(error) => info!("Mean distance error: {:.1} mm", error),
        None => info!("No robot heard a neighbour"),
    }
    for robot in &summary.robots {
        println!(
            "robot {:>3} at ({:>6.1}, {:>6.1}) mm: sent {:>4}, received {:>4}, neighbours {}",
            robot.uid,
            robot.x_mm,
            robot.y_mm,
            robot.sent,
            robot.rx.frames,
            robot.neighbors.len()
        );
    }

    if let Some(path) = report {
        summary.write(&path)?;
        info!("Report written to {}", path.display());
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Simulate {
            robots,
            spacing,
            seconds,
            seed,
            profile,
            report,
        } => simulate(robots, spacing, seconds, seed, profile, report)?,
        Commands::Distance {
            high,
            low,
            profile,
        } => {
            let estimator = DistanceEstimator::new(load_profile(profile)?.table());
            let measurement = DistanceMeasurement::new(high, low);
            println!("{} mm", estimator.estimate(&measurement));
        }
        Commands::Crc { hex: input } => {
            let bytes = parse_hex_bytes(&input)?;
            if bytes.len() < MSG_CRC_SPAN {
                return Err(KiloError::FrameLength {
                    expected: MSG_BYTES,
                    actual: bytes.len(),
                });
            }
            let computed = calculate_crc16(&bytes[..MSG_CRC_SPAN]);
            println!("crc: {:#06x}", computed);
            if bytes.len() == MSG_BYTES {
                let msg = Message::parse_hex(&input)?;
                println!(
                    "stored: {:#06x} ({})",
                    msg.crc,
                    if msg.is_valid() { "valid" } else { "INVALID" }
                );
            }
        }
        Commands::Encode {
            msg_type,
            data,
            pulses,
        } => {
            let bytes = parse_hex_bytes(&data)?;
            if bytes.len() > MSG_DATA_BYTES {
                return Err(KiloError::FrameLength {
                    expected: MSG_DATA_BYTES,
                    actual: bytes.len(),
                });
            }
            let mut payload = [0u8; MSG_DATA_BYTES];
            payload[..bytes.len()].copy_from_slice(&bytes);
            let msg = Message::new(msg_type, payload);
            println!("{}", hex(&msg.to_bytes()));
            if pulses {
                let offsets = PulseEncoder::default().encode(&msg);
                println!(
                    "{}",
                    offsets
                        .iter()
                        .map(|t| t.to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                );
            }
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}
