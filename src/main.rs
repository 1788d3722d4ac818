// src/main.rs
//! GPS Lap Timer - track-day lap timing from a GPS receiver

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use gps_laptimer::{
    archive::{JsonFileArchive, SessionArchive},
    catalog,
    clock::MonotonicClock,
    config::{LapTimerConfig, SourceType},
    coordinator::{Command, Coordinator},
    display::terminal::{self, TerminalDisplay},
    geo::{self, SpeedUnit},
    geofence::DetectorSettings,
    monitor::{self, FixSource, LapMonitor},
    projector::TrackProjector,
};
use log::{info, warn};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gps-laptimer", version, about = "GPS lap timer for track days")]
struct Cli {
    /// Alternate configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Time laps from a live receiver or a recorded file
    Run(RunArgs),
    /// List the built-in circuits
    Tracks,
    /// Inspect archived sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// List available serial ports
    Ports,
}

#[derive(Subcommand)]
enum SessionAction {
    List,
    Show { id: String },
    Delete { id: String },
}

#[derive(Args)]
struct RunArgs {
    /// gpsd, serial or replay
    #[arg(long)]
    source: Option<String>,
    /// Serial device, e.g. /dev/ttyUSB0
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    gpsd_port: Option<u16>,
    /// Recorded fixes, one JSON object per line
    #[arg(long)]
    replay: Option<PathBuf>,
    #[arg(long)]
    speedup: Option<f64>,
    /// Use a built-in circuit's start/finish line as the gate
    #[arg(long)]
    track: Option<String>,
    /// Continue an archived session: its laps, path and gate
    #[arg(long)]
    restore: Option<String>,
    /// Trigger radius in meters (5-100)
    #[arg(long)]
    radius: Option<f64>,
    /// Minimum lap time in seconds (5-180)
    #[arg(long)]
    min_lap: Option<u32>,
    /// Start and stop recording from speed
    #[arg(long)]
    auto: bool,
    /// kph or mph
    #[arg(long)]
    unit: Option<String>,
    #[arg(long)]
    archive: Option<PathBuf>,
    /// Also write every fix to this file in replay format
    #[arg(long)]
    record: Option<PathBuf>,
    /// Log laps instead of drawing the dashboard; stop with Ctrl+C
    #[arg(long)]
    headless: bool,
    /// Arm immediately (headless runs have no keyboard)
    #[arg(long)]
    arm: bool,
    /// Archive the session on exit if it has laps
    #[arg(long)]
    archive_on_exit: bool,
    /// Persist the effective settings
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let headless = matches!(&cli.command, Commands::Run(args) if args.headless);
    let default_level = match &cli.command {
        // Log lines would tear through the dashboard
        Commands::Run(_) if !headless => log::LevelFilter::Warn,
        _ => log::LevelFilter::Info,
    };
    env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .init();

    let mut config = match &cli.config {
        Some(path) => LapTimerConfig::load_from(path),
        None => LapTimerConfig::load(),
    }
    .context("Failed to load configuration")?;

    match cli.command {
        Commands::Run(args) => {
            apply_overrides(&mut config, &args)?;
            if args.save_config {
                match &cli.config {
                    Some(path) => config.save_to(path),
                    None => config.save(),
                }
                .context("Failed to save configuration")?;
                info!("Configuration saved");
            }
            run(config, args).await
        }
        Commands::Tracks => {
            println!("{:<16} {:<32} {:<12} Start/finish", "ID", "Name", "Location");
            for track in catalog::TRACKS {
                println!(
                    "{:<16} {:<32} {:<12} {:.6}, {:.6}",
                    track.id, track.name, track.location, track.start_finish.0, track.start_finish.1
                );
            }
            Ok(())
        }
        Commands::Sessions { action } => sessions(&config, action),
        Commands::Ports => {
            monitor::list_serial_ports().await?;
            Ok(())
        }
    }
}

fn apply_overrides(config: &mut LapTimerConfig, args: &RunArgs) -> anyhow::Result<()> {
    if let Some(source) = &args.source {
        config.source_type = source.parse()?;
    }
    if let Some(port) = &args.port {
        let baud = args.baud.or(config.serial_baudrate).unwrap_or(9600);
        config.update_serial(port.clone(), baud);
    } else if let Some(baud) = args.baud {
        config.serial_baudrate = Some(baud);
    }
    if args.host.is_some() || args.gpsd_port.is_some() {
        let host = args
            .host
            .clone()
            .or_else(|| config.gpsd_host.clone())
            .unwrap_or_else(|| "localhost".to_string());
        let port = args.gpsd_port.or(config.gpsd_port).unwrap_or(2947);
        config.update_gpsd(host, port);
    }
    if let Some(path) = &args.replay {
        let speedup = args.speedup.unwrap_or(config.replay_speedup);
        config.update_replay(path.clone(), speedup);
    } else if let Some(speedup) = args.speedup {
        config.replay_speedup = speedup;
    }

    if args.radius.is_some() || args.min_lap.is_some() {
        config.detector = DetectorSettings::new(
            args.radius.unwrap_or(config.detector.radius_m),
            args.min_lap.unwrap_or(config.detector.min_lap_time_s),
        )?;
    }
    if args.auto {
        config.auto_mode.enabled = true;
    }
    if let Some(unit) = &args.unit {
        config.speed_unit = match unit.to_ascii_lowercase().as_str() {
            "kph" | "kmh" => SpeedUnit::Kph,
            "mph" => SpeedUnit::Mph,
            other => bail!("Unknown speed unit '{}' (expected kph or mph)", other),
        };
    }
    if let Some(path) = &args.archive {
        config.archive_path = Some(path.clone());
    }

    config.validate().context("Invalid settings")?;
    Ok(())
}

fn open_archive(config: &LapTimerConfig) -> anyhow::Result<JsonFileArchive> {
    let path = match &config.archive_path {
        Some(path) => path.clone(),
        None => JsonFileArchive::default_path()?,
    };
    Ok(JsonFileArchive::new(path))
}

fn fix_source(config: &LapTimerConfig) -> anyhow::Result<FixSource> {
    Ok(match config.source_type {
        SourceType::Serial => FixSource::Serial {
            port: config
                .serial_port
                .clone()
                .context("Serial source needs --port")?,
            baudrate: config.serial_baudrate.unwrap_or(9600),
        },
        SourceType::Gpsd => FixSource::Gpsd {
            host: config
                .gpsd_host
                .clone()
                .unwrap_or_else(|| "localhost".to_string()),
            port: config.gpsd_port.unwrap_or(2947),
        },
        SourceType::Replay => FixSource::Replay {
            path: config
                .replay_path
                .clone()
                .context("Replay source needs --replay")?,
            speedup: config.replay_speedup,
        },
    })
}

async fn run(config: LapTimerConfig, args: RunArgs) -> anyhow::Result<()> {
    let archive = open_archive(&config)?;
    info!("Archive at {}", archive.path().display());

    let source = fix_source(&config)?;
    // A fast replay runs the whole timer on its accelerated timeline
    let clock = match &source {
        FixSource::Replay { speedup, .. } => MonotonicClock::scaled(*speedup),
        _ => MonotonicClock::new(),
    };

    let coordinator = Coordinator::new(config.detector, config.auto_mode, archive)?;
    let (monitor, _handle) = LapMonitor::spawn(coordinator, clock);

    if let Some(id) = &args.restore {
        monitor
            .command(Command::Restore(id.clone()))
            .await
            .with_context(|| format!("Cannot restore session {}", id))?;
    }

    if let Some(id) = &args.track {
        monitor
            .command(Command::SetGateFromCatalog(id.clone()))
            .await
            .with_context(|| format!("Cannot use track '{}'", id))?;
    }

    monitor
        .start(source, args.record.clone())
        .await
        .context("Failed to start position source")?;

    if args.arm {
        monitor.command(Command::Arm).await?;
    }

    if args.headless {
        info!("Running headless, press Ctrl+C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to wait for Ctrl+C")?;
    } else {
        TerminalDisplay::new(config.speed_unit).run(&monitor).await?;
    }
    monitor.stop();

    let snapshot = monitor.snapshot();
    if args.archive_on_exit && !snapshot.laps.is_empty() {
        if let Err(e) = monitor.command(Command::Archive).await {
            warn!("Session not archived: {}", e);
        }
    }

    println!("\n{} lap(s) recorded", snapshot.laps.len());
    if let Some(best) = snapshot.best_lap() {
        println!("Best lap: {} (lap {})", best.formatted_time(), best.number);
    }
    Ok(())
}

fn sessions(config: &LapTimerConfig, action: SessionAction) -> anyhow::Result<()> {
    let mut archive = open_archive(config)?;

    match action {
        SessionAction::List => {
            let sessions = archive.list()?;
            if sessions.is_empty() {
                println!("No archived sessions.");
            }
            for session in sessions {
                println!(
                    "{}  {}  {} lap(s)  best {}",
                    session.id,
                    session
                        .created_at
                        .with_timezone(&chrono::Local)
                        .format("%Y-%m-%d %H:%M"),
                    session.lap_count(),
                    session
                        .best_lap()
                        .map(|l| l.formatted_time())
                        .unwrap_or_else(|| "--".to_string())
                );
            }
        }
        SessionAction::Show { id } => {
            let session = archive.get(&id)?;
            let best = session.best_lap().map(|l| l.number);
            println!("Session {}", session.id);
            println!(
                "Recorded {}",
                session.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
            );
            if let Some(gate) = session.gate {
                println!("Gate {:.6}, {:.6}", gate.latitude, gate.longitude);
            }
            println!("{} fix(es) on the path", session.point_count());
            for lap in &session.laps {
                println!(
                    "  Lap {:>3}  {}  max {} {}{}",
                    lap.number,
                    lap.formatted_time(),
                    geo::format_speed(Some(lap.max_speed), config.speed_unit),
                    config.speed_unit.label(),
                    if Some(lap.number) == best { "  best" } else { "" }
                );
            }
            if let Some(projection) =
                TrackProjector::default().project(&session.path, session.gate.as_ref(), None)
            {
                println!();
                let rows =
                    terminal::render_grid(&projection, terminal::MAP_WIDTH, terminal::MAP_HEIGHT);
                for row in rows {
                    println!("  |{}|", row);
                }
            }
        }
        SessionAction::Delete { id } => {
            if !archive.delete(&id)? {
                bail!("Session {} not found", id);
            }
            println!("Deleted {}", id);
        }
    }
    Ok(())
}
