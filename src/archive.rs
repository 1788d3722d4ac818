// src/archive.rs
//! Archived session storage

use crate::{
    error::{LapError, Result},
    session::Session,
};
use log::{debug, warn};
use std::path::{Path, PathBuf};

/// Keyed store of immutable sessions, newest first
pub trait SessionArchive {
    fn append(&mut self, session: Session) -> Result<()>;

    /// Remove a session; `Ok(false)` when the id is unknown
    fn delete(&mut self, id: &str) -> Result<bool>;

    fn list(&self) -> Result<Vec<Session>>;

    fn get(&self, id: &str) -> Result<Session> {
        self.list()?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| LapError::SessionNotFound(id.to_string()))
    }
}

/// In-memory archive for tests and throwaway runs
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    sessions: Vec<Session>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionArchive for MemoryArchive {
    fn append(&mut self, session: Session) -> Result<()> {
        self.sessions.insert(0, session);
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        Ok(self.sessions.len() != before)
    }

    fn list(&self) -> Result<Vec<Session>> {
        Ok(self.sessions.clone())
    }
}

/// Sessions kept as one pretty-printed JSON array on disk
#[derive(Debug, Clone)]
pub struct JsonFileArchive {
    path: PathBuf,
}

impl JsonFileArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$HOME/.local/share/gps-laptimer/sessions.json`
    pub fn default_path() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| LapError::Other("HOME environment variable not set".to_string()))?;

        Ok(PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("gps-laptimer")
            .join("sessions.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<Session>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        let sessions: Vec<Session> = serde_json::from_str(&contents).map_err(|e| {
            LapError::Archive(format!(
                "Failed to parse archive {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(sessions)
    }

    fn write_all(&self, sessions: &[Session]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(sessions)?;

        // Write beside the target and rename so a failed write can't truncate the archive
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            warn!("Failed to replace archive {}: {}", self.path.display(), e);
            LapError::Io(e)
        })?;

        debug!("Archive written: {} session(s)", sessions.len());
        Ok(())
    }
}

impl SessionArchive for JsonFileArchive {
    fn append(&mut self, session: Session) -> Result<()> {
        let mut sessions = self.read_all()?;
        if sessions.iter().any(|s| s.id == session.id) {
            return Err(LapError::Archive(format!(
                "Session {} already archived",
                session.id
            )));
        }
        sessions.insert(0, session);
        self.write_all(&sessions)
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        let mut sessions = self.read_all()?;
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        if sessions.len() == before {
            return Ok(false);
        }
        self.write_all(&sessions)?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<Session>> {
        self.read_all()
    }
}
