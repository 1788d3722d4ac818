// src/display/terminal.rs
//! Terminal dashboard with single-key controls

use super::RenderFrame;
use crate::{
    clock::TimingClock,
    coordinator::{Command, LiveSnapshot},
    error::Result,
    geo::SpeedUnit,
    monitor::LapMonitor,
    projector::{Projection, TrackProjector, CANVAS_SIZE},
};
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute, queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use log::warn;
use std::{
    io::{self, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::mpsc, time::sleep};

const FRAME_INTERVAL: Duration = Duration::from_millis(50);
const KEY_POLL: Duration = Duration::from_millis(100);
pub const MAP_WIDTH: usize = 48;
pub const MAP_HEIGHT: usize = 16;
const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Operator key bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    ToggleRecording,
    GateHere,
    Archive,
    Reset,
    ToggleAuto,
    Quit,
}

impl KeyAction {
    pub fn from_key(key: &KeyEvent) -> Option<Self> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Some(KeyAction::Quit);
        }
        match key.code {
            KeyCode::Char(' ') => Some(KeyAction::ToggleRecording),
            KeyCode::Char('g') => Some(KeyAction::GateHere),
            KeyCode::Char('a') => Some(KeyAction::Archive),
            KeyCode::Char('r') => Some(KeyAction::Reset),
            KeyCode::Char('m') => Some(KeyAction::ToggleAuto),
            KeyCode::Char('q') | KeyCode::Esc => Some(KeyAction::Quit),
            _ => None,
        }
    }

    /// Command for this key given the current state; `None` for quit
    pub fn to_command(self, snapshot: &LiveSnapshot) -> Option<Command> {
        match self {
            KeyAction::ToggleRecording if snapshot.recording => Some(Command::Disarm),
            KeyAction::ToggleRecording => Some(Command::Arm),
            KeyAction::GateHere => Some(Command::SetGateHere),
            KeyAction::Archive => Some(Command::Archive),
            KeyAction::Reset => Some(Command::Reset),
            KeyAction::ToggleAuto => {
                let mut settings = snapshot.auto_mode;
                settings.enabled = !settings.enabled;
                Some(Command::ConfigureAutoMode(settings))
            }
            KeyAction::Quit => None,
        }
    }
}

/// Puts the terminal back however the display loop exits
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, Hide, DisableLineWrap)?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = execute!(stdout, Show, EnableLineWrap, LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

pub struct TerminalDisplay {
    projector: TrackProjector,
    unit: SpeedUnit,
}

impl TerminalDisplay {
    pub fn new(unit: SpeedUnit) -> Self {
        Self {
            projector: TrackProjector::default(),
            unit,
        }
    }

    /// Run the dashboard until the operator quits or `running` clears
    pub async fn run(&self, monitor: &LapMonitor) -> Result<()> {
        let running = monitor.running();
        let _guard = TerminalGuard::enter()?;
        let mut stdout = io::stdout();

        // Ctrl+C outside raw mode, e.g. while the terminal is being restored
        let running_clone = Arc::clone(&running);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                running_clone.store(false, Ordering::Relaxed);
            }
        });

        let mut keys = spawn_key_reader(Arc::clone(&running));
        let mut clock = TimingClock::new();

        while running.load(Ordering::Relaxed) {
            while let Ok(action) = keys.try_recv() {
                if action == KeyAction::Quit {
                    running.store(false, Ordering::Relaxed);
                    break;
                }
                if let Some(command) = action.to_command(&monitor.snapshot()) {
                    if let Err(e) = monitor.command(command).await {
                        warn!("{}", e);
                    }
                }
            }

            let snapshot = monitor.snapshot();
            let frame = RenderFrame::build(
                &snapshot,
                &mut clock,
                monitor.clock().now_ms(),
                &self.projector,
                self.unit,
            );
            self.render_display(&mut stdout, &snapshot, &frame)?;
            stdout.flush()?;

            sleep(FRAME_INTERVAL).await;
        }

        Ok(())
    }

    /// Draw one frame
    fn render_display(
        &self,
        stdout: &mut impl Write,
        snapshot: &LiveSnapshot,
        frame: &RenderFrame,
    ) -> Result<()> {
        let mut lines: Vec<(Color, String)> = Vec::new();

        lines.push((Color::Green, "=".repeat(60)));
        lines.push((Color::Green, "GPS Lap Timer".to_string()));
        lines.push((Color::Green, "=".repeat(60)));

        self.timer_section(&mut lines, snapshot, frame);
        self.speed_section(&mut lines, frame);
        self.gate_section(&mut lines, snapshot, frame);
        self.track_section(&mut lines, frame);
        self.laps_section(&mut lines, snapshot);

        lines.push((Color::Green, "=".repeat(60)));
        lines.push((
            Color::Green,
            "space arm/stop  g gate here  a archive  r reset  m auto  q quit".to_string(),
        ));
        if let Some(status) = &snapshot.status {
            lines.push((Color::White, format!("> {}", status)));
        }

        for (row, (color, text)) in lines.iter().enumerate() {
            queue!(
                stdout,
                MoveTo(0, row as u16),
                SetForegroundColor(*color),
                Print(text),
                ResetColor,
                Clear(ClearType::UntilNewLine)
            )?;
        }
        queue!(stdout, Clear(ClearType::FromCursorDown))?;

        Ok(())
    }

    fn timer_section(&self, lines: &mut Vec<(Color, String)>, snapshot: &LiveSnapshot, frame: &RenderFrame) {
        let mode = if snapshot.auto_mode.enabled { "AUTO" } else { "MANUAL" };
        lines.push((Color::Yellow, format!("TIMER:  {}  [{}]", frame.lap_label, mode)));
        lines.push((Color::White, format!("  {}", frame.elapsed)));
        lines.push((
            Color::White,
            format!(
                "  Last: {:>9}   Best: {:>9}",
                frame.last_lap.as_deref().unwrap_or("--:--.--"),
                frame.best_lap.as_deref().unwrap_or("--:--.--")
            ),
        ));
    }

    fn speed_section(&self, lines: &mut Vec<(Color, String)>, frame: &RenderFrame) {
        lines.push((Color::Cyan, "SPEED:".to_string()));
        lines.push((
            Color::White,
            format!("  {:>4} {}  {}", frame.speed, frame.unit, sparkline(&frame.speed_history)),
        ));
    }

    fn gate_section(&self, lines: &mut Vec<(Color, String)>, snapshot: &LiveSnapshot, frame: &RenderFrame) {
        lines.push((Color::Magenta, "GATE:".to_string()));
        let text = match (&snapshot.gate, &frame.gate_distance) {
            (Some(gate), Some(distance)) => format!(
                "  {:.6}, {:.6}  {} away (radius {:.0}m)",
                gate.latitude, gate.longitude, distance, snapshot.detector.radius_m
            ),
            (Some(gate), None) => format!("  {:.6}, {:.6}", gate.latitude, gate.longitude),
            (None, _) => "  Not set (first fix after arming becomes the gate)".to_string(),
        };
        lines.push((Color::White, text));
    }

    fn track_section(&self, lines: &mut Vec<(Color, String)>, frame: &RenderFrame) {
        lines.push((Color::Blue, "TRACK:".to_string()));
        match &frame.projection {
            Some(projection) => {
                for row in render_grid(projection, MAP_WIDTH, MAP_HEIGHT) {
                    lines.push((Color::White, format!("  {}", row)));
                }
            }
            None => lines.push((Color::White, "  Waiting for position...".to_string())),
        }
    }

    fn laps_section(&self, lines: &mut Vec<(Color, String)>, snapshot: &LiveSnapshot) {
        lines.push((Color::Yellow, format!("LAPS: {}", snapshot.laps.len())));
        let best = snapshot.best_lap().map(|l| l.number);
        for lap in snapshot.laps.iter().rev().take(5) {
            let marker = if Some(lap.number) == best { " *" } else { "" };
            lines.push((
                Color::White,
                format!(
                    "  {:>3}  {}  max {} {}{}",
                    lap.number,
                    lap.formatted_time(),
                    crate::geo::format_speed(Some(lap.max_speed), self.unit),
                    self.unit.label(),
                    marker
                ),
            ));
        }
    }
}

/// Read keys on a blocking thread and forward the ones we know
fn spawn_key_reader(running: Arc<AtomicBool>) -> mpsc::UnboundedReceiver<KeyAction> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::task::spawn_blocking(move || {
        while running.load(Ordering::Relaxed) {
            match event::poll(KEY_POLL) {
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                        if let Some(action) = KeyAction::from_key(&key) {
                            if tx.send(action).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Keyboard read failed: {}", e);
                        break;
                    }
                },
                Ok(false) => {}
                Err(e) => {
                    warn!("Keyboard poll failed: {}", e);
                    break;
                }
            }
        }
    });

    rx
}

/// Block-character trace scaled to the largest value
pub fn sparkline(values: &[f64]) -> String {
    let max = values.iter().cloned().fold(0.0_f64, f64::max);
    values
        .iter()
        .map(|v| {
            if max <= 0.0 || !v.is_finite() {
                return SPARK_LEVELS[0];
            }
            let level = (v / max * (SPARK_LEVELS.len() - 1) as f64).round() as usize;
            SPARK_LEVELS[level.min(SPARK_LEVELS.len() - 1)]
        })
        .collect()
}

/// Rasterise a projection into character rows: `.` path, `G` gate, arrow or
/// `o` for the live position
pub fn render_grid(projection: &Projection, width: usize, height: usize) -> Vec<String> {
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let mut grid = vec![vec![' '; width]; height];
    let cell = |x: f64, y: f64| -> (usize, usize) {
        let col = (x / CANVAS_SIZE * (width - 1) as f64).round().clamp(0.0, (width - 1) as f64);
        let row = (y / CANVAS_SIZE * (height - 1) as f64).round().clamp(0.0, (height - 1) as f64);
        (col as usize, row as usize)
    };

    for point in &projection.path {
        let (col, row) = cell(point.x, point.y);
        grid[row][col] = '.';
    }
    if let Some(gate) = projection.gate {
        let (col, row) = cell(gate.x, gate.y);
        grid[row][col] = 'G';
    }
    if let Some(live) = projection.live {
        let (col, row) = cell(live.point.x, live.point.y);
        grid[row][col] = if live.is_moving {
            heading_arrow(live.heading)
        } else {
            'o'
        };
    }

    grid.into_iter().map(|row| row.into_iter().collect()).collect()
}

fn heading_arrow(heading: f64) -> char {
    const ARROWS: [char; 8] = ['↑', '↗', '→', '↘', '↓', '↙', '←', '↖'];
    let sector = ((heading.rem_euclid(360.0) + 22.5) / 45.0) as usize % 8;
    ARROWS[sector]
}
