//! Side-channel checkpoint of in-flight sessions.
//!
//! Unlike the metric log, this file is overwritten in place: it holds only the
//! sessions that are open right now, so that a crash can be turned into closed
//! records on the next start (see [`crate::recovery`]).
//!
//! # File Format
//!
//! ```json
//! {
//!   "activeAiSessions": [{"specId": "auth", "phase": "design", "start": "2025-01-15T10:00:00.000Z"}],
//!   "activeHumanSession": {"specId": "auth", "start": "…", "lastActivity": "…"}
//! }
//! ```
//!
//! Writes go through a temp file + rename so a crash mid-write leaves either
//! the old checkpoint or the new one, never a torn file.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{MetricsError, Result};
use crate::human::ActiveHumanSession;
use crate::schema::{timestamp, Phase};
use crate::storage::MetricsPaths;

/// An AI session that was open when the checkpoint was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointAiSession {
    pub spec_id: String,
    pub phase: Phase,
    #[serde(with = "timestamp")]
    pub start: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTempData {
    #[serde(default)]
    pub active_ai_sessions: Vec<CheckpointAiSession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_human_session: Option<ActiveHumanSession>,
}

impl SessionTempData {
    pub fn is_empty(&self) -> bool {
        self.active_ai_sessions.is_empty() && self.active_human_session.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckpointStore {
    paths: MetricsPaths,
}

impl CheckpointStore {
    pub fn new(paths: MetricsPaths) -> Self {
        Self { paths }
    }

    /// Atomically replaces the project's checkpoint with `data`.
    pub fn save(&self, project_path: &Path, data: &SessionTempData) -> Result<()> {
        let content = serde_json::to_string(data)
            .map_err(|e| MetricsError::json("Failed to serialize session checkpoint", e))?;

        self.paths
            .ensure_metadata_dir(project_path)
            .map_err(|e| MetricsError::io("Failed to create metadata directory", e))?;

        let dir = self.paths.metadata_dir(project_path);
        let mut tmp = NamedTempFile::new_in(&dir)
            .map_err(|e| MetricsError::io("Failed to create temp checkpoint", e))?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| MetricsError::io("Failed to write temp checkpoint", e))?;
        tmp.flush()
            .map_err(|e| MetricsError::io("Failed to flush temp checkpoint", e))?;
        tmp.persist(self.paths.checkpoint_file(project_path))
            .map_err(|e| MetricsError::io("Failed to persist checkpoint", e.error))?;

        Ok(())
    }

    /// Loads the checkpoint.
    ///
    /// Returns `Ok(None)` when the file is absent or blank, and
    /// [`MetricsError::Json`] when it exists but cannot be parsed.
    pub fn load(&self, project_path: &Path) -> Result<Option<SessionTempData>> {
        let content = match fs::read_to_string(self.paths.checkpoint_file(project_path)) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                return Err(MetricsError::json(
                    "Session checkpoint is not UTF-8",
                    serde_json::Error::io(err),
                ))
            }
            Err(err) => return Err(MetricsError::io("Failed to read session checkpoint", err)),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| MetricsError::json("Failed to parse session checkpoint", e))
    }

    /// Removes the checkpoint. An absent file is not an error.
    pub fn delete(&self, project_path: &Path) -> Result<()> {
        match fs::remove_file(self.paths.checkpoint_file(project_path)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(MetricsError::io("Failed to delete session checkpoint", err)),
        }
    }

    /// Moves an unreadable checkpoint aside, replacing any earlier one.
    pub fn quarantine(&self, project_path: &Path) -> Result<()> {
        fs::rename(
            self.paths.checkpoint_file(project_path),
            self.paths.corrupt_checkpoint_file(project_path),
        )
        .map_err(|e| MetricsError::io("Failed to quarantine session checkpoint", e))
    }

    /// Saves `data`, or deletes the file when nothing is in flight.
    pub fn sync(&self, project_path: &Path, data: &SessionTempData) -> Result<()> {
        if data.is_empty() {
            self.delete(project_path)
        } else {
            self.save(project_path, data)
        }
    }
}
