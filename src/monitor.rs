// src/monitor.rs
//! Wires position sources, operator commands and the coordinator together
//!
//! Each source runs as its own task and pushes fixes into a channel. One
//! coordinator task drains that channel together with the command channel,
//! so timing state is only ever touched from one place. Commands win when
//! both are ready.

use crate::{
    archive::SessionArchive,
    clock::MonotonicClock,
    coordinator::{Command, Coordinator, LiveSnapshot, TimerEvent},
    error::{LapError, Result},
    gps::{data::Fix, gpsd, nmea::NmeaAssembler, replay},
};
use log::{debug, error, info, warn};
use std::{
    fs::File,
    io::BufWriter,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_serial::SerialPortBuilderExt;

const FIX_QUEUE: usize = 256;
const COMMAND_QUEUE: usize = 32;

/// Position source configuration
#[derive(Debug, Clone)]
pub enum FixSource {
    Serial { port: String, baudrate: u32 },
    Gpsd { host: String, port: u16 },
    Replay { path: PathBuf, speedup: f64 },
}

struct CommandRequest {
    command: Command,
    reply: oneshot::Sender<Result<Vec<TimerEvent>>>,
}

/// Handle to a running lap timer
pub struct LapMonitor {
    snapshot: Arc<RwLock<LiveSnapshot>>,
    running: Arc<AtomicBool>,
    clock: MonotonicClock,
    fixes: mpsc::Sender<Fix>,
    commands: mpsc::Sender<CommandRequest>,
}

impl LapMonitor {
    /// Start the coordinator task around `coordinator`
    pub fn spawn<A>(coordinator: Coordinator<A>, clock: MonotonicClock) -> (Self, JoinHandle<()>)
    where
        A: SessionArchive + Send + 'static,
    {
        let (fix_tx, fix_rx) = mpsc::channel(FIX_QUEUE);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let snapshot = Arc::new(RwLock::new(coordinator.snapshot()));
        let running = Arc::new(AtomicBool::new(true));

        let handle = tokio::spawn(run_coordinator(
            coordinator,
            fix_rx,
            command_rx,
            Arc::clone(&snapshot),
            clock,
        ));

        let monitor = Self {
            snapshot,
            running,
            clock,
            fixes: fix_tx,
            commands: command_tx,
        };
        (monitor, handle)
    }

    pub fn clock(&self) -> MonotonicClock {
        self.clock
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn shared_snapshot(&self) -> Arc<RwLock<LiveSnapshot>> {
        Arc::clone(&self.snapshot)
    }

    /// Latest published state
    pub fn snapshot(&self) -> LiveSnapshot {
        read_snapshot(&self.snapshot)
    }

    /// Send a command and wait for its outcome
    pub async fn command(&self, command: Command) -> Result<Vec<TimerEvent>> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(CommandRequest { command, reply })
            .await
            .map_err(|_| LapError::Other("lap timer has shut down".to_string()))?;
        response
            .await
            .map_err(|_| LapError::Other("lap timer dropped the command".to_string()))?
    }

    /// Queue a fix as if it came from a receiver
    pub async fn submit_fix(&self, fix: Fix) -> Result<()> {
        self.fixes
            .send(fix)
            .await
            .map_err(|_| LapError::Other("lap timer has shut down".to_string()))
    }

    /// Start reading fixes from `source`. With `record`, every fix is also
    /// written to that file in replay format.
    pub async fn start(&self, source: FixSource, record: Option<PathBuf>) -> Result<()> {
        let fixes = match record {
            Some(path) => self.recording_tap(path)?,
            None => self.fixes.clone(),
        };

        match source {
            FixSource::Serial { port, baudrate } => {
                self.connect_serial(&port, baudrate, fixes).await
            }
            FixSource::Gpsd { host, port } => self.connect_gpsd(&host, port, fixes).await,
            FixSource::Replay { path, speedup } => self.start_replay(path, speedup, fixes),
        }
    }

    /// Stop the sources and the display
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Connect to a GPS device via serial port
    async fn connect_serial(&self, port: &str, baudrate: u32, fixes: mpsc::Sender<Fix>) -> Result<()> {
        info!("Connecting to GPS on {} at {} baud...", port, baudrate);

        let serial = tokio_serial::new(port, baudrate)
            .timeout(Duration::from_millis(1000))
            .open_native_async()
            .map_err(|e| LapError::Connection(format!("Failed to open serial port {}: {}", port, e)))?;

        info!("Connected to {}", port);

        let running = Arc::clone(&self.running);
        let clock = self.clock;

        tokio::spawn(async move {
            let mut reader = BufReader::new(serial);
            let mut line = String::new();
            let mut nmea = NmeaAssembler::new();

            while running.load(Ordering::Relaxed) {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        if let Some(fix) = nmea.feed(&line, clock.now_ms()) {
                            if fixes.send(fix).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Error reading from serial port: {}", e);
                        break;
                    }
                }
            }
            info!("Serial reader stopped");
        });

        Ok(())
    }

    /// Connect to gpsd daemon
    async fn connect_gpsd(&self, host: &str, port: u16, fixes: mpsc::Sender<Fix>) -> Result<()> {
        info!("Connecting to gpsd at {}:{}...", host, port);

        let mut reader = gpsd::connect_gpsd(host, port).await?;
        info!("Connected to gpsd");

        let running = Arc::clone(&self.running);
        let clock = self.clock;

        tokio::spawn(async move {
            let mut line = String::new();

            while running.load(Ordering::Relaxed) {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match gpsd::parse_gpsd_json(line, clock.now_ms()) {
                            Ok(Some(fix)) => {
                                if fixes.send(fix).await.is_err() {
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => warn!("Error parsing gpsd JSON: {}", e),
                        }
                    }
                    Err(e) => {
                        error!("Error reading from gpsd: {}", e);
                        break;
                    }
                }
            }
            info!("gpsd reader stopped");
        });

        Ok(())
    }

    /// Feed a recorded file at its recorded pace divided by `speedup`.
    /// Timestamps follow the recorded timeline, so lap times and the
    /// debounce see recorded time whatever the speed-up.
    fn start_replay(&self, path: PathBuf, speedup: f64, fixes: mpsc::Sender<Fix>) -> Result<()> {
        let recorded = replay::read_replay(&path)?;
        info!(
            "Replaying {} fix(es) from {} at {}x",
            recorded.len(),
            path.display(),
            speedup
        );
        if (self.clock.rate() - speedup).abs() > f64::EPSILON {
            warn!(
                "Replay at {}x on a {}x clock; the running lap time will not keep pace",
                speedup,
                self.clock.rate()
            );
        }

        let running = Arc::clone(&self.running);
        let clock = self.clock;

        tokio::spawn(async move {
            let Some(first) = recorded.first().map(|f| f.timestamp) else {
                info!("Replay file is empty");
                return;
            };
            let base = clock.now_ms();
            let started = tokio::time::Instant::now();

            for fix in recorded {
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                // Measured from the start so sleep overshoot doesn't build up
                tokio::time::sleep_until(started + replay::pacing(first, fix.timestamp, speedup))
                    .await;

                if fixes.send(replay::restamp(&fix, first, base)).await.is_err() {
                    break;
                }
            }
            info!("Replay finished");
        });

        Ok(())
    }

    /// Forwarding channel that also appends every fix to a replay file
    fn recording_tap(&self, path: PathBuf) -> Result<mpsc::Sender<Fix>> {
        let file = File::create(&path).map_err(|e| {
            LapError::Other(format!("Failed to create {}: {}", path.display(), e))
        })?;
        info!("Recording fixes to {}", path.display());

        let (tap_tx, mut tap_rx) = mpsc::channel::<Fix>(FIX_QUEUE);
        let fixes = self.fixes.clone();

        tokio::spawn(async move {
            let mut writer = BufWriter::new(file);
            while let Some(fix) = tap_rx.recv().await {
                if let Err(e) = replay::write_replay_line(&mut writer, &fix) {
                    error!("Failed to record fix: {}", e);
                }
                if fixes.send(fix).await.is_err() {
                    break;
                }
            }
            if let Err(e) = std::io::Write::flush(&mut writer) {
                error!("Failed to flush {}: {}", path.display(), e);
            }
        });

        Ok(tap_tx)
    }
}

async fn run_coordinator<A: SessionArchive>(
    mut coordinator: Coordinator<A>,
    mut fixes: mpsc::Receiver<Fix>,
    mut commands: mpsc::Receiver<CommandRequest>,
    snapshot: Arc<RwLock<LiveSnapshot>>,
    clock: MonotonicClock,
) {
    let mut status: Option<String> = None;

    loop {
        tokio::select! {
            biased;

            Some(request) = commands.recv() => {
                let result = coordinator.on_command(request.command, clock.now_ms());
                match &result {
                    Ok(events) => {
                        if let Some(message) = describe(events) {
                            status = Some(message);
                        }
                    }
                    Err(e) => {
                        warn!("Command refused: {}", e);
                        status = Some(e.to_string());
                    }
                }
                // The caller may have given up waiting
                let _ = request.reply.send(result);
            }
            Some(fix) = fixes.recv() => {
                match coordinator.on_fix(fix) {
                    Ok(events) => {
                        if let Some(message) = describe(&events) {
                            status = Some(message);
                        }
                    }
                    Err(e) if e.is_refusal() => debug!("Fix refused: {}", e),
                    Err(e) => {
                        error!("Fix processing failed: {}", e);
                        status = Some(e.to_string());
                    }
                }
            }
            else => break,
        }

        let mut published = coordinator.snapshot();
        published.status = status.clone();
        *snapshot.write().unwrap_or_else(|e| e.into_inner()) = published;
    }

    info!("Coordinator stopped");
}

/// Short operator message for the most significant event
fn describe(events: &[TimerEvent]) -> Option<String> {
    events.iter().rev().find_map(|event| match event {
        TimerEvent::LapCompleted(lap) => Some(format!(
            "Lap {}  {}",
            lap.number,
            lap.formatted_time()
        )),
        TimerEvent::RecordingStarted { auto: true } => Some("Auto start".to_string()),
        TimerEvent::RecordingStopped { auto: true } => Some("Auto stop".to_string()),
        TimerEvent::RecordingStarted { auto: false } => Some("Armed".to_string()),
        TimerEvent::RecordingStopped { auto: false } => Some("Stopped".to_string()),
        TimerEvent::GateSet(gate) => Some(format!(
            "Gate {:.6}, {:.6}",
            gate.latitude, gate.longitude
        )),
        TimerEvent::Archived { id } => Some(format!("Archived {}", id)),
        TimerEvent::Restored { id } => Some(format!("Restored {}", id)),
        TimerEvent::Deleted { id } => Some(format!("Deleted {}", id)),
        TimerEvent::SessionReset => Some("Session cleared".to_string()),
        TimerEvent::Configured => Some("Settings updated".to_string()),
        TimerEvent::LapStarted { .. } => None,
    })
}

fn read_snapshot(snapshot: &RwLock<LiveSnapshot>) -> LiveSnapshot {
    snapshot.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// List available serial ports
pub async fn list_serial_ports() -> Result<()> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| LapError::Other(format!("Failed to list serial ports: {}", e)))?;

    if ports.is_empty() {
        println!("No serial ports found.");
    } else {
        println!("Available serial ports:");
        for port in ports {
            println!("  {} - {:?}", port.port_name, port.port_type);
        }
    }

    Ok(())
}
