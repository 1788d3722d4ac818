// src/coordinator.rs
//! Single owner of the timing state
//!
//! Every fix and every operator command goes through one `Coordinator`, one
//! at a time. A fix is checked before anything is touched, so it either
//! updates controller, detector and session together or is refused without
//! effect.

use crate::{
    archive::SessionArchive,
    auto_record::{AutoAction, AutoModeSettings, AutoRecordController, AutoState},
    catalog,
    error::{LapError, Result},
    geo::SpeedUnit,
    geofence::{Crossing, DetectorSettings, DetectorState, GeofenceDetector},
    gps::data::{Fix, Gate},
    session::{self, Lap, SessionRecorder},
};
use log::{debug, info};

/// Operator controls
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Arm,
    Disarm,
    SetGate(Gate),
    /// Use the most recent fix as the gate
    SetGateHere,
    SetGateFromCatalog(String),
    ConfigureDetector(DetectorSettings),
    ConfigureAutoMode(AutoModeSettings),
    Archive,
    Reset,
    Restore(String),
    Delete(String),
}

/// Observable outcome of a fix or command
#[derive(Debug, Clone, PartialEq)]
pub enum TimerEvent {
    RecordingStarted { auto: bool },
    RecordingStopped { auto: bool },
    GateSet(Gate),
    LapStarted { at: i64 },
    LapCompleted(Lap),
    Configured,
    Archived { id: String },
    Restored { id: String },
    Deleted { id: String },
    SessionReset,
}

/// Immutable copy of the timing state for readers
#[derive(Debug, Clone, Default)]
pub struct LiveSnapshot {
    pub recording: bool,
    pub auto_mode: AutoModeSettings,
    pub detector_state: Option<DetectorState>,
    pub gate: Option<Gate>,
    pub lap_start: Option<i64>,
    pub laps: Vec<Lap>,
    pub path: Vec<Fix>,
    pub last_fix: Option<Fix>,
    pub distance_to_gate: Option<f64>,
    pub detector: DetectorSettings,
    /// Latest operator-facing message, filled in by the monitor
    pub status: Option<String>,
}

impl LiveSnapshot {
    pub fn last_lap(&self) -> Option<&Lap> {
        self.laps.last()
    }

    pub fn best_lap(&self) -> Option<&Lap> {
        self.laps.iter().min_by_key(|lap| lap.time)
    }

    pub fn current_lap_number(&self) -> Option<u32> {
        self.lap_start.map(|_| self.laps.len() as u32 + 1)
    }

    pub fn speed_history(&self, count: usize, unit: SpeedUnit) -> Vec<f64> {
        session::speed_history(&self.path, count, unit)
    }
}

pub struct Coordinator<A: SessionArchive> {
    detector: GeofenceDetector,
    auto: AutoRecordController,
    recorder: SessionRecorder,
    archive: A,
    last_fix: Option<Fix>,
    recording: bool,
}

impl<A: SessionArchive> Coordinator<A> {
    pub fn new(detector: DetectorSettings, auto: AutoModeSettings, archive: A) -> Result<Self> {
        Ok(Self {
            detector: GeofenceDetector::new(detector)?,
            auto: AutoRecordController::new(auto)?,
            recorder: SessionRecorder::new(),
            archive,
            last_fix: None,
            recording: false,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn recorder(&self) -> &SessionRecorder {
        &self.recorder
    }

    pub fn detector(&self) -> &GeofenceDetector {
        &self.detector
    }

    pub fn auto_state(&self) -> AutoState {
        self.auto.state()
    }

    pub fn archive(&self) -> &A {
        &self.archive
    }

    pub fn last_fix(&self) -> Option<&Fix> {
        self.last_fix.as_ref()
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        let gate = self.recorder.gate();
        LiveSnapshot {
            recording: self.recording,
            auto_mode: self.auto.settings(),
            detector_state: Some(self.detector.state()),
            gate,
            lap_start: self.detector.lap_start(),
            laps: self.recorder.laps().to_vec(),
            path: self.recorder.path().to_vec(),
            last_fix: self.last_fix,
            distance_to_gate: self
                .last_fix
                .as_ref()
                .zip(gate)
                .map(|(fix, gate)| crate::geo::distance(fix, &gate)),
            detector: self.detector.settings(),
            status: None,
        }
    }

    /// Process one fix. Controller and detector run on copies, so a fix the
    /// session can't take leaves every part of the state as it was.
    pub fn on_fix(&mut self, fix: Fix) -> Result<Vec<TimerEvent>> {
        if !fix.is_valid() {
            return Err(LapError::Refused(format!(
                "unusable coordinates {}, {}",
                fix.latitude, fix.longitude
            )));
        }
        if let Some(last) = self.latest_timestamp() {
            if fix.timestamp < last {
                return Err(LapError::OutOfOrder {
                    last,
                    received: fix.timestamp,
                });
            }
        }

        let mut auto = self.auto.clone();
        let mut detector = self.detector.clone();
        let mut recording = self.recording;
        let mut events = Vec::new();

        match auto.on_fix(&fix) {
            Some(AutoAction::Start) if !recording => {
                self.prime(&mut detector, fix.timestamp)?;
                recording = true;
                events.push(TimerEvent::RecordingStarted { auto: true });
            }
            Some(AutoAction::Stop) if recording => {
                detector.disarm();
                recording = false;
                events.push(TimerEvent::RecordingStopped { auto: true });
            }
            _ => {}
        }

        let mut new_gate = None;
        let mut new_lap = None;
        if recording {
            match detector.on_fix(&fix)? {
                Some(Crossing::GateBootstrapped { gate, lap_start }) => {
                    self.recorder.check_gate(Some(gate))?;
                    new_gate = Some(gate);
                    events.push(TimerEvent::GateSet(gate));
                    events.push(TimerEvent::LapStarted { at: lap_start });
                }
                Some(Crossing::LapOpened { start }) => {
                    events.push(TimerEvent::LapStarted { at: start });
                }
                Some(Crossing::LapCompleted { lap }) => {
                    self.recorder.check_lap(&lap)?;
                    new_lap = Some(lap);
                    events.push(TimerEvent::LapCompleted(lap));
                    events.push(TimerEvent::LapStarted { at: lap.end_time });
                }
                None => {}
            }
            self.recorder.check_fix(&fix)?;
        }

        // Everything checked; commit
        if let Some(gate) = new_gate {
            self.recorder.set_gate(Some(gate))?;
        }
        if let Some(lap) = new_lap {
            self.recorder.append_lap(lap)?;
        }
        if recording {
            self.recorder.append_fix(fix)?;
        }
        self.auto = auto;
        self.detector = detector;
        self.recording = recording;
        self.last_fix = Some(fix);

        Ok(events)
    }

    /// Apply an operator command. `now_ms` is on the same clock as fix timestamps.
    pub fn on_command(&mut self, command: Command, now_ms: i64) -> Result<Vec<TimerEvent>> {
        debug!("Command: {:?}", command);

        match command {
            Command::Arm => {
                self.start_recording(now_ms)?;
                self.auto.force(AutoState::Recording);
                Ok(vec![TimerEvent::RecordingStarted { auto: false }])
            }
            Command::Disarm => {
                let was_recording = self.recording;
                self.stop_recording();
                self.auto.force(AutoState::Armed);
                if was_recording {
                    Ok(vec![TimerEvent::RecordingStopped { auto: false }])
                } else {
                    Ok(Vec::new())
                }
            }
            Command::SetGate(gate) => self.set_gate(gate),
            Command::SetGateHere => {
                let fix = self
                    .last_fix
                    .ok_or_else(|| LapError::Refused("no position fix yet".to_string()))?;
                self.set_gate(Gate::from_fix(&fix))
            }
            Command::SetGateFromCatalog(id) => {
                let track = catalog::find(&id)?;
                info!("Loading gate for {}", track.name);
                self.set_gate(track.gate())
            }
            Command::ConfigureDetector(settings) => {
                self.detector.configure(settings)?;
                Ok(vec![TimerEvent::Configured])
            }
            Command::ConfigureAutoMode(settings) => {
                self.auto.configure(settings)?;
                // Keep the controller in step with the actual recording state
                let state = if self.recording {
                    AutoState::Recording
                } else {
                    AutoState::Armed
                };
                self.auto.force(state);
                Ok(vec![TimerEvent::Configured])
            }
            Command::Archive => {
                let session = self.recorder.freeze()?;
                let id = session.id.clone();
                self.archive.append(session)?;
                info!("Session {} archived", id);
                Ok(vec![TimerEvent::Archived { id }])
            }
            Command::Reset => {
                self.refuse_while_recording("reset the session")?;
                self.recorder.reset();
                Ok(vec![TimerEvent::SessionReset])
            }
            Command::Restore(id) => {
                self.refuse_while_recording("restore a session")?;
                let mut session = self.archive.get(&id)?;
                // Sessions from an earlier run sit on another clock; move them
                // back so live fixes keep arriving after them
                if let Some(last) = session.last_timestamp() {
                    if last > now_ms {
                        debug!("Rebasing session {} by {} ms", id, now_ms - last);
                        session = session.shifted(now_ms - last);
                    }
                }
                session.check_invariants()?;
                self.detector.set_gate(session.gate)?;
                self.recorder.restore(&session)?;
                info!("Session {} restored ({} laps)", id, session.lap_count());
                Ok(vec![TimerEvent::Restored { id }])
            }
            Command::Delete(id) => {
                if !self.archive.delete(&id)? {
                    return Err(LapError::SessionNotFound(id));
                }
                info!("Session {} deleted", id);
                Ok(vec![TimerEvent::Deleted { id }])
            }
        }
    }

    fn start_recording(&mut self, now_ms: i64) -> Result<()> {
        if self.recording {
            return Err(LapError::Refused("already recording".to_string()));
        }
        let mut detector = self.detector.clone();
        self.prime(&mut detector, now_ms)?;
        self.detector = detector;
        self.recording = true;
        info!("Recording started");
        Ok(())
    }

    /// Arm `detector` for the current session. Only the detector passed in changes.
    fn prime(&self, detector: &mut GeofenceDetector, now_ms: i64) -> Result<()> {
        let gate = self.recorder.gate();
        // A gateless session that already has fixes can't take a bootstrapped gate
        if gate.is_none() && self.recorder.is_gate_locked() {
            return Err(LapError::GateLocked);
        }
        // Never arm before a fix that has already been seen
        let at = self.latest_timestamp().map_or(now_ms, |last| now_ms.max(last));

        detector.set_gate(gate)?;
        detector.arm(at, self.recorder.laps().len() as u32)
    }

    /// Newest timestamp seen live or held by the session
    fn latest_timestamp(&self) -> Option<i64> {
        let live = self.last_fix.map(|f| f.timestamp);
        live.max(self.recorder.last_timestamp())
    }

    fn stop_recording(&mut self) {
        self.detector.disarm();
        if self.recording {
            info!(
                "Recording stopped after {} lap(s)",
                self.recorder.laps().len()
            );
        }
        self.recording = false;
    }

    fn set_gate(&mut self, gate: Gate) -> Result<Vec<TimerEvent>> {
        if self.recording {
            return Err(LapError::GateLocked);
        }
        self.recorder.set_gate(Some(gate))?;
        self.detector.set_gate(Some(gate))?;
        info!("Gate set to {:.6}, {:.6}", gate.latitude, gate.longitude);
        Ok(vec![TimerEvent::GateSet(gate)])
    }

    fn refuse_while_recording(&self, what: &str) -> Result<()> {
        if self.recording {
            return Err(LapError::Refused(format!("stop recording to {}", what)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use crate::session::Session;

    fn coordinator() -> Coordinator<MemoryArchive> {
        Coordinator::new(
            DetectorSettings::new(25.0, 20).unwrap(),
            AutoModeSettings::default(),
            MemoryArchive::new(),
        )
        .unwrap()
    }

    fn at_gate(ts: i64) -> Fix {
        Fix::new(0.0, 0.0, ts)
    }

    fn away(ts: i64) -> Fix {
        Fix::new(0.01, 0.0, ts)
    }

    fn completed_laps(events: &[TimerEvent]) -> Vec<Lap> {
        events
            .iter()
            .filter_map(|e| match e {
                TimerEvent::LapCompleted(lap) => Some(*lap),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_end_to_end_two_laps() {
        let mut c = coordinator();
        c.on_command(Command::SetGate(Gate::new(0.0, 0.0)), 0).unwrap();
        c.on_command(Command::Arm, 0).unwrap();

        let events = c.on_fix(at_gate(0)).unwrap();
        assert_eq!(events, vec![TimerEvent::LapStarted { at: 0 }]);

        let lap1 = completed_laps(&c.on_fix(at_gate(25_000)).unwrap());
        assert_eq!(lap1.len(), 1);
        assert_eq!((lap1[0].number, lap1[0].time), (1, 25_000));

        let lap2 = completed_laps(&c.on_fix(at_gate(50_000)).unwrap());
        assert_eq!((lap2[0].number, lap2[0].time), (2, 25_000));

        assert_eq!(c.recorder().laps().len(), 2);
        assert_eq!(c.recorder().path().len(), 3);
    }

    #[test]
    fn test_debounce_through_coordinator() {
        let mut c = coordinator();
        c.on_command(Command::SetGate(Gate::new(0.0, 0.0)), 0).unwrap();
        c.on_command(Command::Arm, 0).unwrap();
        c.on_fix(at_gate(0)).unwrap();
        let events = c.on_fix(at_gate(5_000)).unwrap();
        assert!(completed_laps(&events).is_empty());
    }

    #[test]
    fn test_fixes_ignored_while_not_recording() {
        let mut c = coordinator();
        c.on_command(Command::SetGate(Gate::new(0.0, 0.0)), 0).unwrap();
        assert!(c.on_fix(at_gate(0)).unwrap().is_empty());
        assert!(c.recorder().path().is_empty());
        assert_eq!(c.last_fix(), Some(&at_gate(0)));
    }

    #[test]
    fn test_stop_discards_open_lap_and_is_immediate() {
        let mut c = coordinator();
        c.on_command(Command::SetGate(Gate::new(0.0, 0.0)), 0).unwrap();
        c.on_command(Command::Arm, 0).unwrap();
        c.on_fix(at_gate(0)).unwrap();
        c.on_fix(away(10_000)).unwrap();

        let events = c.on_command(Command::Disarm, 12_000).unwrap();
        assert_eq!(events, vec![TimerEvent::RecordingStopped { auto: false }]);

        // Would have closed lap 1 had we still been armed
        assert!(c.on_fix(at_gate(30_000)).unwrap().is_empty());
        assert!(c.recorder().laps().is_empty());
        assert_eq!(c.detector().state(), DetectorState::Idle);
    }

    #[test]
    fn test_rearm_continues_numbering() {
        let mut c = coordinator();
        c.on_command(Command::SetGate(Gate::new(0.0, 0.0)), 0).unwrap();
        c.on_command(Command::Arm, 0).unwrap();
        c.on_fix(at_gate(0)).unwrap();
        c.on_fix(at_gate(30_000)).unwrap();
        c.on_command(Command::Disarm, 40_000).unwrap();

        c.on_command(Command::Arm, 100_000).unwrap();
        c.on_fix(at_gate(100_000)).unwrap();
        let laps = completed_laps(&c.on_fix(at_gate(140_000)).unwrap());
        assert_eq!(laps[0].number, 2);
        assert_eq!(laps[0].start_time, 100_000);
    }

    #[test]
    fn test_bootstrap_gate_without_gate() {
        let mut c = coordinator();
        c.on_command(Command::Arm, 0).unwrap();
        let events = c.on_fix(Fix::new(36.706173, -6.029671, 1_000)).unwrap();

        assert_eq!(
            events,
            vec![
                TimerEvent::GateSet(Gate::new(36.706173, -6.029671)),
                TimerEvent::LapStarted { at: 1_000 },
            ]
        );
        assert_eq!(c.recorder().gate(), Some(Gate::new(36.706173, -6.029671)));
    }

    #[test]
    fn test_gate_change_refused_while_recording() {
        let mut c = coordinator();
        c.on_command(Command::SetGate(Gate::new(0.0, 0.0)), 0).unwrap();
        c.on_command(Command::Arm, 0).unwrap();

        let err = c
            .on_command(Command::SetGateFromCatalog("mugello".to_string()), 1_000)
            .unwrap_err();
        assert!(matches!(err, LapError::GateLocked));
        assert_eq!(c.recorder().gate(), Some(Gate::new(0.0, 0.0)));
    }

    #[test]
    fn test_gate_locked_after_session_has_fixes() {
        let mut c = coordinator();
        c.on_command(Command::SetGate(Gate::new(0.0, 0.0)), 0).unwrap();
        c.on_command(Command::Arm, 0).unwrap();
        c.on_fix(at_gate(0)).unwrap();
        c.on_command(Command::Disarm, 1_000).unwrap();

        assert!(c.on_command(Command::SetGate(Gate::new(1.0, 1.0)), 2_000).is_err());

        c.on_command(Command::Reset, 3_000).unwrap();
        c.on_command(Command::SetGate(Gate::new(1.0, 1.0)), 4_000).unwrap();
    }

    #[test]
    fn test_set_gate_here_uses_last_fix() {
        let mut c = coordinator();
        assert!(c.on_command(Command::SetGateHere, 0).is_err());

        c.on_fix(Fix::new(52.956793, 6.52445, 500)).unwrap();
        c.on_command(Command::SetGateHere, 600).unwrap();
        assert_eq!(c.recorder().gate(), Some(Gate::new(52.956793, 6.52445)));
    }

    #[test]
    fn test_out_of_order_fix_refused_without_mutation() {
        let mut c = coordinator();
        c.on_command(Command::SetGate(Gate::new(0.0, 0.0)), 0).unwrap();
        c.on_command(Command::Arm, 0).unwrap();
        c.on_fix(at_gate(0)).unwrap();
        c.on_fix(away(10_000)).unwrap();

        assert!(matches!(
            c.on_fix(at_gate(5_000)),
            Err(LapError::OutOfOrder { .. })
        ));
        assert_eq!(c.recorder().path().len(), 2);
        assert_eq!(c.last_fix().map(|f| f.timestamp), Some(10_000));
    }

    #[test]
    fn test_invalid_detector_config_keeps_previous() {
        let mut c = coordinator();
        let bad = DetectorSettings {
            radius_m: 1.0,
            min_lap_time_s: 20,
        };
        assert!(c.on_command(Command::ConfigureDetector(bad), 0).is_err());
        assert_eq!(c.detector().settings().radius_m, 25.0);
    }

    #[test]
    fn test_auto_mode_starts_and_stops_recording() {
        let mut c = coordinator();
        c.on_command(Command::SetGate(Gate::new(0.0, 0.0)), 0).unwrap();
        c.on_command(
            Command::ConfigureAutoMode(AutoModeSettings {
                enabled: true,
                start_speed_kph: 36.0,
                start_sustain_s: 2.0,
                stop_speed_kph: 10.0,
                stop_sustain_s: 4.0,
            }),
            0,
        )
        .unwrap();

        // First fix after configuring is skipped by the controller
        c.on_fix(away(0).with_speed(20.0)).unwrap();
        c.on_fix(away(1_000).with_speed(20.0)).unwrap();
        assert!(!c.is_recording());
        let events = c.on_fix(away(3_000).with_speed(20.0)).unwrap();
        assert_eq!(events, vec![TimerEvent::RecordingStarted { auto: true }]);
        assert!(c.is_recording());
        assert_eq!(c.recorder().path().len(), 1);

        c.on_fix(away(10_000).with_speed(1.0)).unwrap();
        let events = c.on_fix(away(14_000)).unwrap();
        assert_eq!(events, vec![TimerEvent::RecordingStopped { auto: true }]);
        assert!(!c.is_recording());
        assert_eq!(c.detector().state(), DetectorState::Idle);
    }

    #[test]
    fn test_archive_restore_delete() {
        let mut c = coordinator();
        assert!(matches!(
            c.on_command(Command::Archive, 0),
            Err(LapError::NothingToArchive)
        ));

        c.on_command(Command::SetGate(Gate::new(0.0, 0.0)), 0).unwrap();
        c.on_command(Command::Arm, 0).unwrap();
        c.on_fix(at_gate(0)).unwrap();
        c.on_fix(at_gate(30_000)).unwrap();

        let id = match c.on_command(Command::Archive, 31_000).unwrap().as_slice() {
            [TimerEvent::Archived { id }] => id.clone(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(c.archive().list().unwrap().len(), 1);

        // Restore is refused mid-run
        assert!(c.on_command(Command::Restore(id.clone()), 32_000).is_err());
        c.on_command(Command::Disarm, 33_000).unwrap();
        c.on_command(Command::Reset, 34_000).unwrap();
        assert!(c.recorder().laps().is_empty());

        c.on_command(Command::Restore(id.clone()), 35_000).unwrap();
        assert_eq!(c.recorder().laps().len(), 1);

        c.on_command(Command::Delete(id.clone()), 36_000).unwrap();
        assert!(matches!(
            c.on_command(Command::Delete(id), 37_000),
            Err(LapError::SessionNotFound(_))
        ));
    }

    fn archived_session(gate: Option<Gate>, path: &[i64], laps: &[(i64, i64)]) -> Session {
        Session {
            id: "earlier-run".to_string(),
            created_at: chrono::Utc::now(),
            laps: laps
                .iter()
                .enumerate()
                .map(|(i, &(start, end))| Lap::between(i as u32 + 1, start, end, 30.0).unwrap())
                .collect(),
            path: path.iter().map(|&ts| at_gate(ts)).collect(),
            gate,
        }
    }

    #[test]
    fn test_restore_from_earlier_run_then_arm() {
        let mut archive = MemoryArchive::new();
        archive
            .append(archived_session(
                Some(Gate::new(0.0, 0.0)),
                &[3_600_000, 3_625_000],
                &[(3_600_000, 3_625_000)],
            ))
            .unwrap();
        let mut c = Coordinator::new(
            DetectorSettings::new(25.0, 20).unwrap(),
            AutoModeSettings::default(),
            archive,
        )
        .unwrap();

        c.on_command(Command::Restore("earlier-run".to_string()), 500)
            .unwrap();
        assert_eq!(c.recorder().last_timestamp(), Some(500));
        assert_eq!(c.recorder().laps()[0].time, 25_000);

        c.on_command(Command::Arm, 1_000).unwrap();
        let events = c.on_fix(at_gate(1_000)).unwrap();
        assert_eq!(events, vec![TimerEvent::LapStarted { at: 1_000 }]);

        let laps = completed_laps(&c.on_fix(at_gate(30_000)).unwrap());
        assert_eq!((laps[0].number, laps[0].time), (2, 29_000));
        assert_eq!(c.recorder().laps().len(), 2);
        assert_eq!(c.detector().state(), DetectorState::InLap);
        c.recorder().freeze().unwrap().check_invariants().unwrap();
    }

    #[test]
    fn test_fix_older_than_session_refused_without_mutation() {
        let mut archive = MemoryArchive::new();
        archive
            .append(archived_session(Some(Gate::new(0.0, 0.0)), &[0, 25_000], &[(0, 25_000)]))
            .unwrap();
        let mut c = Coordinator::new(
            DetectorSettings::new(25.0, 20).unwrap(),
            AutoModeSettings::default(),
            archive,
        )
        .unwrap();
        c.on_command(Command::Restore("earlier-run".to_string()), 40_000)
            .unwrap();
        c.on_command(Command::Arm, 40_000).unwrap();

        assert!(matches!(
            c.on_fix(at_gate(10_000)),
            Err(LapError::OutOfOrder { last: 25_000, received: 10_000 })
        ));
        assert_eq!(c.detector().state(), DetectorState::AwaitingFirstCross);
        assert_eq!(c.recorder().path().len(), 2);
        assert!(c.last_fix().is_none());
    }

    #[test]
    fn test_refused_auto_start_leaves_state_untouched() {
        // Gateless session that already has a path: recording can't bootstrap a gate
        let mut archive = MemoryArchive::new();
        archive.append(archived_session(None, &[0], &[])).unwrap();
        let mut c = Coordinator::new(
            DetectorSettings::new(25.0, 20).unwrap(),
            AutoModeSettings::default(),
            archive,
        )
        .unwrap();
        c.on_command(Command::Restore("earlier-run".to_string()), 100)
            .unwrap();
        c.on_command(
            Command::ConfigureAutoMode(AutoModeSettings {
                enabled: true,
                start_speed_kph: 36.0,
                start_sustain_s: 2.0,
                stop_speed_kph: 10.0,
                stop_sustain_s: 4.0,
            }),
            100,
        )
        .unwrap();

        c.on_fix(away(1_000).with_speed(20.0)).unwrap();
        c.on_fix(away(2_000).with_speed(20.0)).unwrap();
        assert!(matches!(
            c.on_fix(away(4_000).with_speed(20.0)),
            Err(LapError::GateLocked)
        ));

        assert!(!c.is_recording());
        assert_eq!(c.auto_state(), AutoState::Armed);
        assert_eq!(c.detector().state(), DetectorState::Idle);
        assert_eq!(c.last_fix().map(|f| f.timestamp), Some(2_000));
        assert_eq!(c.recorder().path().len(), 1);
    }

    struct BrokenArchive;

    impl SessionArchive for BrokenArchive {
        fn append(&mut self, _session: Session) -> Result<()> {
            Err(LapError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }

        fn delete(&mut self, _id: &str) -> Result<bool> {
            Ok(false)
        }

        fn list(&self) -> Result<Vec<Session>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_archive_failure_keeps_session() {
        let mut c = Coordinator::new(
            DetectorSettings::default(),
            AutoModeSettings::default(),
            BrokenArchive,
        )
        .unwrap();
        c.on_command(Command::SetGate(Gate::new(0.0, 0.0)), 0).unwrap();
        c.on_command(Command::Arm, 0).unwrap();
        c.on_fix(at_gate(0)).unwrap();
        c.on_fix(at_gate(30_000)).unwrap();

        assert!(matches!(c.on_command(Command::Archive, 31_000), Err(LapError::Io(_))));
        assert_eq!(c.recorder().laps().len(), 1);
        assert!(c.is_recording());
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let mut c = coordinator();
        c.on_command(Command::SetGate(Gate::new(0.0, 0.0)), 0).unwrap();
        c.on_command(Command::Arm, 0).unwrap();
        c.on_fix(at_gate(0)).unwrap();
        c.on_fix(away(10_000)).unwrap();

        let snap = c.snapshot();
        assert!(snap.recording);
        assert_eq!(snap.lap_start, Some(0));
        assert_eq!(snap.current_lap_number(), Some(1));
        assert_eq!(snap.path.len(), 2);
        let d = snap.distance_to_gate.unwrap();
        assert!((d - 1_111.95).abs() < 1.0);
    }
}
