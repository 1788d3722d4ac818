// src/session.rs
//! Laps, sessions and the in-progress session recorder

use crate::{
    error::{LapError, Result},
    geo,
    gps::data::{Fix, Gate},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A completed lap. Created once by the geofence detector and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    pub number: u32,
    pub time: u64,       // ms
    pub start_time: i64, // ms, same clock as Fix::timestamp
    pub end_time: i64,
    pub max_speed: f64, // m/s
}

impl Lap {
    /// Build a lap between two crossings; `time` is derived so `end - start == time` always holds
    pub fn between(number: u32, start_time: i64, end_time: i64, max_speed: f64) -> Result<Self> {
        if end_time <= start_time {
            return Err(LapError::Refused(format!(
                "lap {} would have non-positive duration ({} -> {})",
                number, start_time, end_time
            )));
        }

        Ok(Self {
            number,
            time: (end_time - start_time) as u64,
            start_time,
            end_time,
            max_speed,
        })
    }

    pub fn formatted_time(&self) -> String {
        geo::format_elapsed(self.time)
    }
}

/// Archived session snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub laps: Vec<Lap>,
    pub path: Vec<Fix>,
    pub gate: Option<Gate>,
}

impl Session {
    pub fn best_lap(&self) -> Option<&Lap> {
        best_of(&self.laps)
    }

    pub fn lap_count(&self) -> usize {
        self.laps.len()
    }

    pub fn point_count(&self) -> usize {
        self.path.len()
    }

    /// Re-check the lap and path invariants, e.g. on a session read back from disk
    pub fn check_invariants(&self) -> Result<()> {
        check_laps(&self.laps)?;
        check_path(&self.path)
    }

    /// Latest timestamp held by the session, path or laps
    pub fn last_timestamp(&self) -> Option<i64> {
        let path = self.path.last().map(|f| f.timestamp);
        let laps = self.laps.last().map(|l| l.end_time);
        path.max(laps)
    }

    /// Copy with every timestamp moved by `offset_ms`. Lap times are unchanged.
    pub fn shifted(&self, offset_ms: i64) -> Session {
        let mut session = self.clone();
        for lap in &mut session.laps {
            lap.start_time += offset_ms;
            lap.end_time += offset_ms;
        }
        for fix in &mut session.path {
            fix.timestamp += offset_ms;
        }
        session
    }
}

/// Collects laps and fixes while the timer is armed
#[derive(Debug, Clone, Default)]
pub struct SessionRecorder {
    laps: Vec<Lap>,
    path: Vec<Fix>,
    gate: Option<Gate>,
}

impl SessionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn laps(&self) -> &[Lap] {
        &self.laps
    }

    pub fn path(&self) -> &[Fix] {
        &self.path
    }

    pub fn gate(&self) -> Option<Gate> {
        self.gate
    }

    pub fn last_lap(&self) -> Option<&Lap> {
        self.laps.last()
    }

    pub fn best_lap(&self) -> Option<&Lap> {
        best_of(&self.laps)
    }

    pub fn next_lap_number(&self) -> u32 {
        self.laps.len() as u32 + 1
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.path.last().map(|f| f.timestamp)
    }

    pub fn is_empty(&self) -> bool {
        self.laps.is_empty() && self.path.is_empty()
    }

    /// Gate is locked once the first fix of the session is recorded
    pub fn is_gate_locked(&self) -> bool {
        !self.path.is_empty()
    }

    pub fn check_gate(&self, gate: Option<Gate>) -> Result<()> {
        if self.is_gate_locked() && gate != self.gate {
            return Err(LapError::GateLocked);
        }
        Ok(())
    }

    pub fn set_gate(&mut self, gate: Option<Gate>) -> Result<()> {
        self.check_gate(gate)?;
        self.gate = gate;
        Ok(())
    }

    pub fn check_fix(&self, fix: &Fix) -> Result<()> {
        if let Some(last) = self.last_timestamp() {
            if fix.timestamp < last {
                return Err(LapError::OutOfOrder {
                    last,
                    received: fix.timestamp,
                });
            }
        }
        Ok(())
    }

    pub fn append_fix(&mut self, fix: Fix) -> Result<()> {
        self.check_fix(&fix)?;
        self.path.push(fix);
        Ok(())
    }

    /// Would `lap` be accepted as the next lap
    pub fn check_lap(&self, lap: &Lap) -> Result<()> {
        let expected = self.next_lap_number();
        if lap.number != expected {
            return Err(LapError::LapSequence {
                expected,
                received: lap.number,
            });
        }
        if let Some(prev) = self.laps.last() {
            if lap.start_time < prev.end_time {
                return Err(LapError::OutOfOrder {
                    last: prev.end_time,
                    received: lap.start_time,
                });
            }
        }
        Ok(())
    }

    pub fn append_lap(&mut self, lap: Lap) -> Result<()> {
        self.check_lap(&lap)?;
        self.laps.push(lap);
        Ok(())
    }

    /// Speeds of the most recent fixes in the requested unit, oldest first
    pub fn speed_history(&self, count: usize, unit: geo::SpeedUnit) -> Vec<f64> {
        speed_history(&self.path, count, unit)
    }

    /// Take an immutable snapshot for the archive. The recorder keeps its data.
    pub fn freeze(&self) -> Result<Session> {
        if self.laps.is_empty() {
            return Err(LapError::NothingToArchive);
        }

        Ok(Session {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            laps: self.laps.clone(),
            path: self.path.clone(),
            gate: self.gate,
        })
    }

    /// Load an archived session back for continued timing
    pub fn restore(&mut self, session: &Session) -> Result<()> {
        session.check_invariants()?;
        self.laps = session.laps.clone();
        self.path = session.path.clone();
        self.gate = session.gate;
        Ok(())
    }

    /// Drop laps and path; the gate stays as the next session's default
    pub fn reset(&mut self) {
        self.laps.clear();
        self.path.clear();
    }
}

/// Speeds of the last `count` fixes of a path, oldest first
pub fn speed_history(path: &[Fix], count: usize, unit: geo::SpeedUnit) -> Vec<f64> {
    let skip = path.len().saturating_sub(count);
    path[skip..]
        .iter()
        .map(|f| unit.convert(f.speed_or_zero()))
        .collect()
}

fn best_of(laps: &[Lap]) -> Option<&Lap> {
    laps.iter().min_by_key(|lap| lap.time)
}

fn check_laps(laps: &[Lap]) -> Result<()> {
    for (i, lap) in laps.iter().enumerate() {
        let expected = i as u32 + 1;
        if lap.number != expected {
            return Err(LapError::LapSequence {
                expected,
                received: lap.number,
            });
        }
        if lap.end_time - lap.start_time != lap.time as i64 || lap.time == 0 {
            return Err(LapError::Parse(format!(
                "lap {} duration does not match its timestamps",
                lap.number
            )));
        }
    }

    for pair in laps.windows(2) {
        if pair[0].end_time > pair[1].start_time {
            return Err(LapError::OutOfOrder {
                last: pair[0].end_time,
                received: pair[1].start_time,
            });
        }
    }

    Ok(())
}

fn check_path(path: &[Fix]) -> Result<()> {
    for pair in path.windows(2) {
        if pair[1].timestamp < pair[0].timestamp {
            return Err(LapError::OutOfOrder {
                last: pair[0].timestamp,
                received: pair[1].timestamp,
            });
        }
    }
    Ok(())
}
