// src/lib.rs
//! GPS Lap Timer Library
//!
//! Turns a stream of GPS fixes into laps: start/finish gate detection with a
//! debounce, speed-based auto start/stop, session archiving and a projected
//! track map for display.

pub mod archive;
pub mod auto_record;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod display;
pub mod error;
pub mod geo;
pub mod geofence;
pub mod gps;
pub mod monitor;
pub mod projector;
pub mod session;

// Re-export main types for convenience
pub use coordinator::{Command, Coordinator, LiveSnapshot, TimerEvent};
pub use error::{LapError, Result};
pub use gps::{Fix, Gate};
pub use monitor::{FixSource, LapMonitor};
pub use session::{Lap, Session, SessionRecorder};
