// src/geofence.rs
//! Start/finish gate crossing detection
//!
//! A crossing is recognised when a fix lands inside the trigger radius around
//! the gate and more than `min_lap_time` has passed since the previous
//! crossing. The time guard stops a car parked near the line from
//! retriggering on every fix.
//!
//! ```text
//!   Idle --arm--> AwaitingFirstCross --cross--> InLap --cross--> InLap (+Lap)
//!    ^                    |                       |
//!    +------disarm--------+-----------------------+
//! ```

use crate::{
    error::{LapError, Result},
    geo,
    gps::data::{Fix, Gate},
    session::Lap,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

pub const DEFAULT_RADIUS_M: f64 = 25.0;
pub const DEFAULT_MIN_LAP_TIME_S: u32 = 20;
pub const RADIUS_RANGE_M: RangeInclusive<f64> = 5.0..=100.0;
pub const MIN_LAP_TIME_RANGE_S: RangeInclusive<u32> = 5..=180;

/// Extra slack when priming the debounce on arm, so starting on the line counts immediately
const ARM_HEADROOM_MS: i64 = 1000;

/// Operator-tunable detection parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorSettings {
    pub radius_m: f64,
    pub min_lap_time_s: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            radius_m: DEFAULT_RADIUS_M,
            min_lap_time_s: DEFAULT_MIN_LAP_TIME_S,
        }
    }
}

impl DetectorSettings {
    pub fn new(radius_m: f64, min_lap_time_s: u32) -> Result<Self> {
        let settings = Self {
            radius_m,
            min_lap_time_s,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !RADIUS_RANGE_M.contains(&self.radius_m) {
            return Err(LapError::InvalidConfig(format!(
                "radius {} m outside {}..={} m",
                self.radius_m,
                RADIUS_RANGE_M.start(),
                RADIUS_RANGE_M.end()
            )));
        }
        if !MIN_LAP_TIME_RANGE_S.contains(&self.min_lap_time_s) {
            return Err(LapError::InvalidConfig(format!(
                "minimum lap time {} s outside {}..={} s",
                self.min_lap_time_s,
                MIN_LAP_TIME_RANGE_S.start(),
                MIN_LAP_TIME_RANGE_S.end()
            )));
        }
        Ok(())
    }

    pub fn min_lap_time_ms(&self) -> i64 {
        self.min_lap_time_s as i64 * 1000
    }
}

/// Detector state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorState {
    /// Not armed
    Idle,
    /// Armed, waiting for the crossing that opens the first lap
    AwaitingFirstCross,
    /// Lap in progress
    InLap,
}

/// What a fix did to the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crossing {
    /// Armed without a gate: this fix became the gate and opened a lap
    GateBootstrapped { gate: Gate, lap_start: i64 },
    /// First crossing after arming; the lap clock starts here
    LapOpened { start: i64 },
    /// A full lap closed and the next one opened at the same instant
    LapCompleted { lap: Lap },
}

#[derive(Debug, Clone)]
pub struct GeofenceDetector {
    settings: DetectorSettings,
    state: DetectorState,
    gate: Option<Gate>,
    last_cross_ms: i64,
    lap_start_ms: Option<i64>,
    lap_max_speed: f64,
    completed_laps: u32,
    last_fix_ms: Option<i64>,
}

impl GeofenceDetector {
    pub fn new(settings: DetectorSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            state: DetectorState::Idle,
            gate: None,
            last_cross_ms: 0,
            lap_start_ms: None,
            lap_max_speed: 0.0,
            completed_laps: 0,
            last_fix_ms: None,
        })
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn settings(&self) -> DetectorSettings {
        self.settings
    }

    pub fn gate(&self) -> Option<Gate> {
        self.gate
    }

    pub fn is_armed(&self) -> bool {
        self.state != DetectorState::Idle
    }

    /// Start of the lap in progress, if any
    pub fn lap_start(&self) -> Option<i64> {
        self.lap_start_ms
    }

    pub fn distance_to_gate(&self, fix: &Fix) -> Option<f64> {
        self.gate.map(|gate| geo::distance(fix, &gate))
    }

    /// Swap detection parameters; invalid settings leave the current ones in place
    pub fn configure(&mut self, settings: DetectorSettings) -> Result<()> {
        settings.validate()?;
        self.settings = settings;
        debug!(
            "Detector configured: radius {} m, min lap {} s",
            settings.radius_m, settings.min_lap_time_s
        );
        Ok(())
    }

    /// Gate can only change while idle
    pub fn set_gate(&mut self, gate: Option<Gate>) -> Result<()> {
        if self.is_armed() {
            return Err(LapError::GateLocked);
        }
        self.gate = gate;
        Ok(())
    }

    /// Arm for recording. `completed_laps` keeps numbering continuous across re-arms.
    pub fn arm(&mut self, now_ms: i64, completed_laps: u32) -> Result<()> {
        if self.is_armed() {
            return Err(LapError::Refused("detector already armed".to_string()));
        }

        self.state = DetectorState::AwaitingFirstCross;
        self.completed_laps = completed_laps;
        self.lap_start_ms = None;
        self.lap_max_speed = 0.0;
        self.last_cross_ms = now_ms - self.settings.min_lap_time_ms() - ARM_HEADROOM_MS;

        info!(
            "Detector armed ({})",
            if self.gate.is_some() { "gate set" } else { "gate from first fix" }
        );
        Ok(())
    }

    /// Back to idle; an unfinished lap is dropped
    pub fn disarm(&mut self) {
        if self.is_armed() {
            info!("Detector disarmed");
        }
        self.state = DetectorState::Idle;
        self.lap_start_ms = None;
        self.lap_max_speed = 0.0;
    }

    /// Feed one fix. Fixes must arrive in timestamp order.
    pub fn on_fix(&mut self, fix: &Fix) -> Result<Option<Crossing>> {
        if !self.is_armed() {
            return Ok(None);
        }

        if let Some(last) = self.last_fix_ms {
            if fix.timestamp < last {
                return Err(LapError::OutOfOrder {
                    last,
                    received: fix.timestamp,
                });
            }
        }
        self.last_fix_ms = Some(fix.timestamp);

        let speed = fix.speed_or_zero();

        let Some(gate) = self.gate else {
            return Ok(Some(self.bootstrap_gate(fix, speed)));
        };

        let d = geo::distance(fix, &gate);
        let since_cross = fix.timestamp - self.last_cross_ms;
        let crossed = d < self.settings.radius_m && since_cross > self.settings.min_lap_time_ms();

        if !crossed {
            if self.state == DetectorState::InLap {
                self.lap_max_speed = self.lap_max_speed.max(speed);
            }
            return Ok(None);
        }

        match self.state {
            DetectorState::Idle => Ok(None),
            DetectorState::AwaitingFirstCross => {
                self.open_lap(fix.timestamp, speed);
                debug!("First crossing at {} ms ({:.1} m from gate)", fix.timestamp, d);
                Ok(Some(Crossing::LapOpened {
                    start: fix.timestamp,
                }))
            }
            DetectorState::InLap => {
                let start = self.lap_start_ms.unwrap_or(self.last_cross_ms);
                let max_speed = self.lap_max_speed.max(speed);
                let lap = Lap::between(self.completed_laps + 1, start, fix.timestamp, max_speed)?;

                self.completed_laps += 1;
                self.open_lap(fix.timestamp, speed);
                info!("Lap {} completed: {}", lap.number, lap.formatted_time());
                Ok(Some(Crossing::LapCompleted { lap }))
            }
        }
    }

    fn bootstrap_gate(&mut self, fix: &Fix, speed: f64) -> Crossing {
        let gate = Gate::from_fix(fix);
        self.gate = Some(gate);
        self.open_lap(fix.timestamp, speed);
        info!(
            "Gate set from first fix at {:.6}, {:.6}",
            gate.latitude, gate.longitude
        );
        Crossing::GateBootstrapped {
            gate,
            lap_start: fix.timestamp,
        }
    }

    fn open_lap(&mut self, at_ms: i64, speed: f64) {
        self.state = DetectorState::InLap;
        self.last_cross_ms = at_ms;
        self.lap_start_ms = Some(at_ms);
        self.lap_max_speed = speed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn detector(radius: f64, min_lap: u32) -> GeofenceDetector {
        GeofenceDetector::new(DetectorSettings::new(radius, min_lap).unwrap()).unwrap()
    }

    fn gated(radius: f64, min_lap: u32) -> GeofenceDetector {
        let mut d = detector(radius, min_lap);
        d.set_gate(Some(Gate::new(0.0, 0.0))).unwrap();
        d
    }

    fn at_gate(ts: i64) -> Fix {
        Fix::new(0.0, 0.0, ts)
    }

    // ~1.1 km north of the gate
    fn away(ts: i64) -> Fix {
        Fix::new(0.01, 0.0, ts)
    }

    fn completed(c: Option<Crossing>) -> Lap {
        match c {
            Some(Crossing::LapCompleted { lap }) => lap,
            other => panic!("expected completed lap, got {:?}", other),
        }
    }

    #[test]
    fn test_settings_validation() {
        assert!(DetectorSettings::new(25.0, 20).is_ok());
        assert!(DetectorSettings::new(4.9, 20).is_err());
        assert!(DetectorSettings::new(100.1, 20).is_err());
        assert!(DetectorSettings::new(25.0, 4).is_err());
        assert!(DetectorSettings::new(25.0, 181).is_err());
        assert!(DetectorSettings::new(f64::NAN, 20).is_err());
    }

    #[test]
    fn test_invalid_configure_keeps_previous() {
        let mut d = detector(30.0, 40);
        let bad = DetectorSettings {
            radius_m: 500.0,
            min_lap_time_s: 40,
        };
        assert!(d.configure(bad).is_err());
        assert_eq!(d.settings().radius_m, 30.0);
    }

    #[test]
    fn test_three_crossings_make_two_laps() {
        let mut d = gated(25.0, 20);
        d.arm(0, 0).unwrap();

        let first = d.on_fix(&at_gate(0)).unwrap();
        assert_eq!(first, Some(Crossing::LapOpened { start: 0 }));
        assert_eq!(d.state(), DetectorState::InLap);

        let lap1 = completed(d.on_fix(&at_gate(25_000)).unwrap());
        assert_eq!(lap1.number, 1);
        assert_eq!(lap1.time, 25_000);

        let lap2 = completed(d.on_fix(&at_gate(50_000)).unwrap());
        assert_eq!(lap2.number, 2);
        assert_eq!(lap2.time, 25_000);
        assert_eq!(lap2.start_time, lap1.end_time);
    }

    #[test]
    fn test_debounce_holds_inside_min_lap_time() {
        let mut d = gated(25.0, 20);
        d.arm(0, 0).unwrap();

        assert!(d.on_fix(&at_gate(0)).unwrap().is_some());
        assert_eq!(d.on_fix(&at_gate(5_000)).unwrap(), None);
        // Exactly min_lap_time is still inside the guard
        assert_eq!(d.on_fix(&at_gate(20_000)).unwrap(), None);
        assert!(d.on_fix(&at_gate(20_001)).unwrap().is_some());
    }

    #[test]
    fn test_outside_radius_never_crosses() {
        let mut d = gated(25.0, 20);
        d.arm(0, 0).unwrap();
        assert_eq!(d.on_fix(&away(0)).unwrap(), None);
        assert_eq!(d.on_fix(&away(60_000)).unwrap(), None);
        assert_eq!(d.state(), DetectorState::AwaitingFirstCross);
    }

    #[test]
    fn test_arming_near_the_line_counts_immediately() {
        let mut d = gated(25.0, 20);
        d.arm(100_000, 0).unwrap();
        assert_eq!(
            d.on_fix(&at_gate(100_000)).unwrap(),
            Some(Crossing::LapOpened { start: 100_000 })
        );
    }

    #[test]
    fn test_bootstrap_gate_from_first_fix() {
        let mut d = detector(25.0, 20);
        d.arm(0, 0).unwrap();

        let fix = Fix::new(43.99616, 11.371457, 3_000);
        match d.on_fix(&fix).unwrap() {
            Some(Crossing::GateBootstrapped { gate, lap_start }) => {
                assert_eq!(gate, Gate::new(43.99616, 11.371457));
                assert_eq!(lap_start, 3_000);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(d.state(), DetectorState::InLap);

        // Debounce runs from the bootstrap fix
        assert_eq!(d.on_fix(&Fix::new(43.99616, 11.371457, 10_000)).unwrap(), None);
        let lap = completed(d.on_fix(&Fix::new(43.99616, 11.371457, 33_000)).unwrap());
        assert_eq!(lap.time, 30_000);
    }

    #[test]
    fn test_disarm_discards_open_lap() {
        let mut d = gated(25.0, 20);
        d.arm(0, 0).unwrap();
        d.on_fix(&at_gate(0)).unwrap();
        d.disarm();

        assert_eq!(d.state(), DetectorState::Idle);
        assert_eq!(d.lap_start(), None);
        assert_eq!(d.on_fix(&at_gate(30_000)).unwrap(), None);
    }

    #[test]
    fn test_numbering_continues_after_rearm() {
        let mut d = gated(25.0, 20);
        d.arm(0, 3).unwrap();
        d.on_fix(&at_gate(0)).unwrap();
        let lap = completed(d.on_fix(&at_gate(40_000)).unwrap());
        assert_eq!(lap.number, 4);
    }

    #[test]
    fn test_max_speed_covers_whole_lap() {
        let mut d = gated(25.0, 20);
        d.arm(0, 0).unwrap();
        d.on_fix(&at_gate(0).with_speed(5.0)).unwrap();
        d.on_fix(&away(10_000).with_speed(42.0)).unwrap();
        d.on_fix(&away(20_000)).unwrap();
        let lap1 = completed(d.on_fix(&at_gate(30_000).with_speed(12.0)).unwrap());
        assert_eq!(lap1.max_speed, 42.0);

        d.on_fix(&away(40_000).with_speed(8.0)).unwrap();
        let lap2 = completed(d.on_fix(&at_gate(60_000)).unwrap());
        // Crossing fix belongs to both laps
        assert_eq!(lap2.max_speed, 12.0);
    }

    #[test]
    fn test_max_speed_defaults_to_zero() {
        let mut d = gated(25.0, 20);
        d.arm(0, 0).unwrap();
        d.on_fix(&at_gate(0)).unwrap();
        let lap = completed(d.on_fix(&at_gate(21_000)).unwrap());
        assert_eq!(lap.max_speed, 0.0);
    }

    #[test]
    fn test_out_of_order_fix_refused_without_effect() {
        let mut d = gated(25.0, 20);
        d.arm(0, 0).unwrap();
        d.on_fix(&at_gate(0)).unwrap();
        d.on_fix(&away(30_000)).unwrap();

        assert!(matches!(
            d.on_fix(&at_gate(25_000)),
            Err(LapError::OutOfOrder { .. })
        ));
        assert_eq!(d.lap_start(), Some(0));
    }

    #[test]
    fn test_repeated_timestamp_tolerated() {
        let mut d = gated(25.0, 20);
        d.arm(0, 0).unwrap();
        d.on_fix(&at_gate(0)).unwrap();
        assert_eq!(d.on_fix(&at_gate(0)).unwrap(), None);
        assert_eq!(d.on_fix(&away(0)).unwrap(), None);
    }

    #[test]
    fn test_gate_change_refused_while_armed() {
        let mut d = gated(25.0, 20);
        d.arm(0, 0).unwrap();
        assert!(matches!(
            d.set_gate(Some(Gate::new(1.0, 1.0))),
            Err(LapError::GateLocked)
        ));
        assert_eq!(d.gate(), Some(Gate::new(0.0, 0.0)));
    }

    #[test]
    fn test_double_arm_refused() {
        let mut d = gated(25.0, 20);
        d.arm(0, 0).unwrap();
        assert!(d.arm(1_000, 0).is_err());
    }

    proptest! {
        #[test]
        fn prop_laps_contiguous_and_debounced(
            steps in proptest::collection::vec((1i64..15_000, any::<bool>()), 1..200),
            min_lap in 5u32..60,
        ) {
            let mut d = gated(25.0, min_lap);
            d.arm(0, 0).unwrap();

            let mut ts = 0;
            let mut laps: Vec<Lap> = Vec::new();
            let mut crossings: Vec<i64> = Vec::new();
            for (dt, near) in steps {
                ts += dt;
                let fix = if near { at_gate(ts) } else { away(ts) };
                match d.on_fix(&fix).unwrap() {
                    Some(Crossing::LapOpened { start }) => crossings.push(start),
                    Some(Crossing::LapCompleted { lap }) => {
                        crossings.push(lap.end_time);
                        laps.push(lap);
                    }
                    _ => {}
                }
            }

            for (i, lap) in laps.iter().enumerate() {
                prop_assert_eq!(lap.number as usize, i + 1);
                prop_assert_eq!(lap.end_time - lap.start_time, lap.time as i64);
            }
            for pair in laps.windows(2) {
                prop_assert_eq!(pair[1].start_time, pair[0].end_time);
            }
            for pair in crossings.windows(2) {
                prop_assert!(pair[1] - pair[0] >= min_lap as i64 * 1000);
            }
        }
    }
}
