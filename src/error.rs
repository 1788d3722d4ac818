// src/error.rs
//! Error types for the lap timer

use std::fmt;

pub type Result<T> = std::result::Result<T, LapError>;

#[derive(Debug)]
pub enum LapError {
    Io(std::io::Error),
    Serial(tokio_serial::Error),
    Json(serde_json::Error),
    Connection(String),
    Parse(String),
    /// Parameter outside its accepted range; the previous value is kept
    InvalidConfig(String),
    /// Gate can't change once recording started or the session has fixes
    GateLocked,
    /// Fix timestamp went backwards
    OutOfOrder { last: i64, received: i64 },
    /// Lap number would break the 1..=n sequence
    LapSequence { expected: u32, received: u32 },
    /// Command not allowed in the current recording state
    Refused(String),
    NothingToArchive,
    SessionNotFound(String),
    UnknownTrack(String),
    Archive(String),
    Other(String),
}

impl LapError {
    /// Refusals leave every piece of state untouched and can simply be reported
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            LapError::InvalidConfig(_)
                | LapError::GateLocked
                | LapError::OutOfOrder { .. }
                | LapError::LapSequence { .. }
                | LapError::Refused(_)
                | LapError::NothingToArchive
                | LapError::UnknownTrack(_)
        )
    }
}

impl fmt::Display for LapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LapError::Io(e) => write!(f, "IO error: {}", e),
            LapError::Serial(e) => write!(f, "Serial error: {}", e),
            LapError::Json(e) => write!(f, "JSON error: {}", e),
            LapError::Connection(msg) => write!(f, "Connection error: {}", msg),
            LapError::Parse(msg) => write!(f, "Parse error: {}", msg),
            LapError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            LapError::GateLocked => write!(f, "Start/finish gate is locked for this session"),
            LapError::OutOfOrder { last, received } => write!(
                f,
                "Out-of-order fix: timestamp {} is older than {}",
                received, last
            ),
            LapError::LapSequence { expected, received } => write!(
                f,
                "Lap sequence broken: expected lap {}, got {}",
                expected, received
            ),
            LapError::Refused(msg) => write!(f, "Refused: {}", msg),
            LapError::NothingToArchive => write!(f, "Session has no laps to archive"),
            LapError::SessionNotFound(id) => write!(f, "Session not found: {}", id),
            LapError::UnknownTrack(id) => write!(f, "Unknown track: {}", id),
            LapError::Archive(msg) => write!(f, "Archive error: {}", msg),
            LapError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for LapError {}

impl From<std::io::Error> for LapError {
    fn from(error: std::io::Error) -> Self {
        LapError::Io(error)
    }
}

impl From<tokio_serial::Error> for LapError {
    fn from(error: tokio_serial::Error) -> Self {
        LapError::Serial(error)
    }
}

impl From<serde_json::Error> for LapError {
    fn from(error: serde_json::Error) -> Self {
        LapError::Json(error)
    }
}

impl From<anyhow::Error> for LapError {
    fn from(error: anyhow::Error) -> Self {
        LapError::Other(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusals_are_classified() {
        assert!(LapError::GateLocked.is_refusal());
        assert!(LapError::OutOfOrder { last: 10, received: 5 }.is_refusal());
        assert!(!LapError::Archive("disk full".to_string()).is_refusal());
    }

    #[test]
    fn test_display_out_of_order() {
        let err = LapError::OutOfOrder { last: 2000, received: 1000 };
        assert_eq!(
            err.to_string(),
            "Out-of-order fix: timestamp 1000 is older than 2000"
        );
    }
}
