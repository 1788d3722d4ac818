// src/display/mod.rs
//! Rendering of the live timing state

pub mod terminal;

use crate::{
    clock::TimingClock,
    coordinator::LiveSnapshot,
    geo::{self, SpeedUnit},
    projector::{Projection, TrackProjector},
};

/// Number of recent fixes shown in the speed trace
pub const SPEED_HISTORY_LEN: usize = 30;

/// Everything a surface needs to draw one frame
#[derive(Debug, Clone, PartialEq)]
pub struct RenderFrame {
    pub elapsed: String,
    pub speed: String,
    pub unit: &'static str,
    pub lap_label: String,
    pub last_lap: Option<String>,
    pub best_lap: Option<String>,
    pub gate_distance: Option<String>,
    pub speed_history: Vec<f64>,
    pub projection: Option<Projection>,
}

impl RenderFrame {
    /// Build a frame at `now_ms`. The timing clock follows the snapshot's
    /// lap in progress and is reset when recording stops.
    pub fn build(
        snapshot: &LiveSnapshot,
        clock: &mut TimingClock,
        now_ms: i64,
        projector: &TrackProjector,
        unit: SpeedUnit,
    ) -> Self {
        if snapshot.recording {
            clock.follow(snapshot.lap_start);
        } else {
            clock.stop();
        }

        let lap_label = match (snapshot.recording, snapshot.current_lap_number()) {
            (true, Some(n)) => format!("LAP {}", n),
            (true, None) if snapshot.gate.is_some() => "WAITING FOR GATE".to_string(),
            (true, None) => "WAITING FOR FIX".to_string(),
            (false, _) => "STOPPED".to_string(),
        };

        Self {
            elapsed: geo::format_elapsed(clock.sample(now_ms)),
            speed: geo::format_speed(snapshot.last_fix.and_then(|f| f.speed), unit),
            unit: unit.label(),
            lap_label,
            last_lap: snapshot.last_lap().map(|l| l.formatted_time()),
            best_lap: snapshot.best_lap().map(|l| l.formatted_time()),
            gate_distance: snapshot.distance_to_gate.map(geo::format_distance),
            speed_history: snapshot.speed_history(SPEED_HISTORY_LEN, unit),
            projection: projector.project(
                &snapshot.path,
                snapshot.gate.as_ref(),
                snapshot.last_fix.as_ref(),
            ),
        }
    }
}
