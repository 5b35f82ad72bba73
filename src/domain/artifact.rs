//! Artifacts produced during a run.
//!
//! Artifacts are metadata rows pointing at files inside the owning project's
//! root directory. The ledger never stores file contents.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ParseEnumError;

/// A file registered against a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowArtifact {
    pub id: Uuid,

    /// Owning run
    pub run_id: Uuid,

    /// Display name
    pub name: String,

    /// Kind of file
    pub file_type: ArtifactFileType,

    /// Path relative to the project root
    pub file_path: String,

    pub mime_type: String,

    /// Size in bytes (for tracking)
    pub size_bytes: u64,

    /// Phase the artifact was produced in
    pub phase: Option<String>,

    /// Step that produced this artifact
    pub step_id: Option<Uuid>,

    /// Event that announced this artifact
    pub event_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
}

impl WorkflowArtifact {
    pub fn new(params: NewArtifact, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: params.run_id,
            name: params.name,
            file_type: params.file_type,
            file_path: params.file_path,
            mime_type: params.mime_type,
            size_bytes: params.size_bytes,
            phase: params.phase,
            step_id: params.step_id,
            event_id: params.event_id,
            created_at: now,
        }
    }
}

/// Parameters for registering an artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArtifact {
    pub run_id: Uuid,
    pub name: String,
    pub file_type: ArtifactFileType,
    pub file_path: String,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub step_id: Option<Uuid>,
    #[serde(default)]
    pub event_id: Option<Uuid>,
}

impl NewArtifact {
    pub fn new(
        run_id: Uuid,
        name: impl Into<String>,
        file_type: ArtifactFileType,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            name: name.into(),
            file_type,
            file_path: file_path.into(),
            mime_type: file_type.default_mime_type().to_string(),
            size_bytes: 0,
            phase: None,
            step_id: None,
            event_id: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_step(mut self, step_id: Uuid) -> Self {
        self.step_id = Some(step_id);
        self
    }

    pub fn with_event(mut self, event_id: Uuid) -> Self {
        self.event_id = Some(event_id);
        self
    }
}

/// An artifact together with its validated on-disk location
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedArtifact {
    pub artifact: WorkflowArtifact,
    pub absolute_path: PathBuf,
}

/// Kinds of artifact files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFileType {
    /// Plain text or markdown
    Text,

    /// Arbitrary binary file
    File,

    /// Image (screenshots, diagrams)
    Image,
}

impl ArtifactFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
            Self::Image => "image",
        }
    }

    pub fn default_mime_type(&self) -> &'static str {
        match self {
            Self::Text => "text/plain",
            Self::File => "application/octet-stream",
            Self::Image => "image/png",
        }
    }
}

impl Default for ArtifactFileType {
    fn default() -> Self {
        Self::File
    }
}

impl fmt::Display for ArtifactFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ArtifactFileType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "file" => Ok(Self::File),
            "image" => Ok(Self::Image),
            other => Err(ParseEnumError::new("artifact file type", other)),
        }
    }
}
