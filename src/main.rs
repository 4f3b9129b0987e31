//! passthru - command-line front-end for J2534 PassThru diagnostics

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use passthru_diag::j2534::dll::DllLoader;
use passthru_diag::j2534::registry::{DeviceInfo, DeviceRegistry, PassThruRegistry, StaticRegistry};
use passthru_diag::protocol::{parse_hex, to_hex};
use passthru_diag::uds::services;
use passthru_diag::uds::LogEntry;
use passthru_diag::{auto_connect, scan_profiles, ChannelSession, ProfileTable, TransactionEngine};

#[derive(Parser)]
#[command(name = "passthru")]
#[command(author, version, about = "J2534 PassThru diagnostics")]
struct Cli {
    /// Use this vendor library instead of the installed-device registry
    #[arg(long, env = "PASSTHRU_DLL")]
    dll: Option<PathBuf>,

    /// JSON connection profiles merged over the built-in table
    #[arg(long, env = "PASSTHRU_PROFILES")]
    profiles_file: Option<PathBuf>,

    /// Print every frame sent and received to stderr
    #[arg(short, long)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed PassThru interfaces
    Devices,

    /// List connection profiles
    Profiles,

    /// Send one request and print the response
    Send {
        #[arg(short, long, default_value = "0")]
        device: usize,

        #[arg(short, long, default_value = "chrys1")]
        profile: String,

        /// Request bytes as hex, e.g. "22 F1 90"
        request: String,

        /// Reads allowed beyond the base three
        #[arg(long, default_value = "0")]
        extra_reads: u32,

        /// Per-read timeout in ms (defaults to the profile's)
        #[arg(long)]
        timeout: Option<u32>,
    },

    /// Find a device and the first answering auto-connect profile
    Auto,

    /// Try every profile on a device and list those that answer
    Scan {
        #[arg(short, long, default_value = "0")]
        device: usize,
    },

    /// Read the VIN (0x22 F190)
    Vin {
        #[arg(short, long, default_value = "0")]
        device: usize,

        #[arg(short, long, default_value = "chrys7")]
        profile: String,
    },

    /// Read stored DTCs (0x19 02)
    Dtcs {
        #[arg(short, long, default_value = "0")]
        device: usize,

        #[arg(short, long, default_value = "chrys1")]
        profile: String,

        #[arg(long, default_value = "FF", value_parser = parse_mask)]
        mask: u8,
    },
}

#[derive(Serialize)]
struct SendOutput {
    device: String,
    profile: String,
    request: String,
    response: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let devices = match &cli.dll {
        Some(path) => StaticRegistry(vec![DeviceInfo::new("custom", path.clone())]),
        None => StaticRegistry(PassThruRegistry.list_devices()),
    };

    let mut profiles = ProfileTable::builtin();
    if let Some(path) = &cli.profiles_file {
        let extra = ProfileTable::from_path(path)
            .with_context(|| format!("Failed to load profiles from {}", path.display()))?;
        profiles.extend(extra);
    }

    match &cli.command {
        Commands::Devices => print_json(&devices.list_devices()),

        Commands::Profiles => {
            let rows: Vec<_> = profiles
                .iter()
                .map(|(key, p)| serde_json::json!({ "key": key, "profile": p }))
                .collect();
            print_json(&rows)
        }

        Commands::Send {
            device,
            profile,
            request,
            extra_reads,
            timeout,
        } => {
            let request = parse_hex(request).context("Invalid request")?;
            let mut session = ChannelSession::from_registry(&devices, Box::new(DllLoader));
            connect(&mut session, &profiles, *device, profile)?;
            let engine = traced_engine(&session, cli.trace);
            let response = match timeout {
                Some(ms) => engine.execute_with_timeout(&request, *extra_reads, *ms),
                None => engine.execute(&request, *extra_reads),
            }?;
            print_json(&SendOutput {
                device: device_name(&session),
                profile: profile.clone(),
                request: to_hex(&request),
                response: to_hex(&response),
            })
        }

        Commands::Auto => {
            let mut session = ChannelSession::from_registry(&devices, Box::new(DllLoader));
            let Some(found) = auto_connect(&mut session, &profiles.auto_connect_candidates()) else {
                bail!("No responding ECU found");
            };
            let version = session.read_version().context("Failed to read versions")?;
            print_json(&serde_json::json!({ "match": found, "version": version }))
        }

        Commands::Scan { device } => {
            let mut session = ChannelSession::from_registry(&devices, Box::new(DllLoader));
            let all: Vec<_> = profiles.iter().collect();
            let hits = scan_profiles(&mut session, *device, &all)
                .with_context(|| format!("Failed to open device {}", device))?;
            print_json(&hits)
        }

        Commands::Vin { device, profile } => {
            let mut session = ChannelSession::from_registry(&devices, Box::new(DllLoader));
            connect(&mut session, &profiles, *device, profile)?;
            let vin = services::read_vin(&traced_engine(&session, cli.trace))?;
            print_json(&serde_json::json!({ "vin": vin }))
        }

        Commands::Dtcs {
            device,
            profile,
            mask,
        } => {
            let mut session = ChannelSession::from_registry(&devices, Box::new(DllLoader));
            connect(&mut session, &profiles, *device, profile)?;
            let dtcs = services::read_dtcs(&traced_engine(&session, cli.trace), *mask)?;
            let rows: Vec<_> = dtcs
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "code": d.display_code(),
                        "status": format!("{:02X}", d.status),
                    })
                })
                .collect();
            print_json(&rows)
        }
    }
}

fn connect(
    session: &mut ChannelSession,
    profiles: &ProfileTable,
    device: usize,
    key: &str,
) -> Result<()> {
    let profile = profiles.get(key)?;
    session
        .open(device)
        .with_context(|| format!("Failed to open device {}", device))?;
    session
        .connect(profile)
        .with_context(|| format!("Failed to connect '{}'", key))?;
    session.install_filter().context("Failed to install filter")?;
    Ok(())
}

fn traced_engine(session: &ChannelSession, trace: bool) -> TransactionEngine<'_> {
    let mut engine = TransactionEngine::new(session);
    if trace {
        engine.set_log_callback(Box::new(|e: LogEntry| {
            eprintln!("{} {} {} {}", e.timestamp, e.direction, e.data_hex, e.description);
        }));
    }
    engine
}

fn device_name(session: &ChannelSession) -> String {
    session
        .device()
        .map(|(_, info)| info.name.clone())
        .unwrap_or_default()
}

fn parse_mask(s: &str) -> Result<u8, String> {
    let s = s.trim_start_matches("0x");
    u8::from_str_radix(s, 16).map_err(|e| e.to_string())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
