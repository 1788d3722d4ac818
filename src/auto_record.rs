// src/auto_record.rs
//! Speed-based automatic start/stop
//!
//! Recording starts once speed stays at or above `start_speed_kph` for
//! `start_sustain_s`, and stops once it stays at or below `stop_speed_kph`
//! for `stop_sustain_s`. A single sample on the wrong side of the threshold
//! restarts the sustain window.

use crate::{
    error::{LapError, Result},
    geo,
    gps::data::Fix,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoModeSettings {
    pub enabled: bool,
    pub start_speed_kph: f64,
    pub start_sustain_s: f64,
    pub stop_speed_kph: f64,
    pub stop_sustain_s: f64,
}

impl Default for AutoModeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            start_speed_kph: 30.0,
            start_sustain_s: 3.0,
            stop_speed_kph: 10.0,
            stop_sustain_s: 10.0,
        }
    }
}

impl AutoModeSettings {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("start speed", self.start_speed_kph),
            ("start sustain", self.start_sustain_s),
            ("stop speed", self.stop_speed_kph),
            ("stop sustain", self.stop_sustain_s),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(LapError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    fn start_sustain_ms(&self) -> i64 {
        (self.start_sustain_s * 1000.0).round() as i64
    }

    fn stop_sustain_ms(&self) -> i64 {
        (self.stop_sustain_s * 1000.0).round() as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoState {
    /// Waiting for enough speed to start
    Armed,
    Recording,
}

/// Transition requested by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoAction {
    Start,
    Stop,
}

#[derive(Debug, Clone)]
pub struct AutoRecordController {
    settings: AutoModeSettings,
    state: AutoState,
    start_candidate_since: Option<i64>,
    stop_candidate_since: Option<i64>,
    suspended: bool,
}

impl AutoRecordController {
    pub fn new(settings: AutoModeSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            state: AutoState::Armed,
            start_candidate_since: None,
            stop_candidate_since: None,
            suspended: false,
        })
    }

    pub fn state(&self) -> AutoState {
        self.state
    }

    pub fn settings(&self) -> AutoModeSettings {
        self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Replace thresholds; on error the previous settings stay active
    pub fn configure(&mut self, settings: AutoModeSettings) -> Result<()> {
        settings.validate()?;
        if settings.enabled != self.settings.enabled {
            info!(
                "Auto mode {}",
                if settings.enabled { "enabled" } else { "disabled" }
            );
        }
        self.settings = settings;
        self.clear_candidates();
        Ok(())
    }

    /// Manual start/stop: take the given state and skip evaluation for one fix
    pub fn force(&mut self, state: AutoState) {
        self.state = state;
        self.clear_candidates();
        self.suspended = true;
    }

    pub fn on_fix(&mut self, fix: &Fix) -> Option<AutoAction> {
        if !self.settings.enabled {
            return None;
        }
        if self.suspended {
            self.suspended = false;
            return None;
        }

        let kph = geo::to_kph(fix.speed_or_zero());
        match self.state {
            AutoState::Armed => {
                let above = kph >= self.settings.start_speed_kph;
                if sustained(
                    &mut self.start_candidate_since,
                    above,
                    fix.timestamp,
                    self.settings.start_sustain_ms(),
                ) {
                    self.state = AutoState::Recording;
                    self.clear_candidates();
                    info!("Auto start at {:.0} km/h", kph);
                    return Some(AutoAction::Start);
                }
            }
            AutoState::Recording => {
                let below = kph <= self.settings.stop_speed_kph;
                if sustained(
                    &mut self.stop_candidate_since,
                    below,
                    fix.timestamp,
                    self.settings.stop_sustain_ms(),
                ) {
                    self.state = AutoState::Armed;
                    self.clear_candidates();
                    info!("Auto stop at {:.0} km/h", kph);
                    return Some(AutoAction::Stop);
                }
            }
        }
        None
    }

    fn clear_candidates(&mut self) {
        self.start_candidate_since = None;
        self.stop_candidate_since = None;
    }
}

/// Track a candidate window. True once the condition has held for `sustain_ms`.
fn sustained(since: &mut Option<i64>, condition: bool, now_ms: i64, sustain_ms: i64) -> bool {
    if !condition {
        if since.is_some() {
            debug!("Auto candidate reset at {} ms", now_ms);
        }
        *since = None;
        return false;
    }

    let start = *since.get_or_insert(now_ms);
    now_ms - start >= sustain_ms
}
