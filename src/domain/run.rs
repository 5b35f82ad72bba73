//! Workflow runs and the projects that own them.
//!
//! A run is the root aggregate of the ledger: steps, events and artifacts
//! all belong to exactly one run and are deleted with it.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ParseEnumError;

/// A project whose root directory sandboxes artifact paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Opaque project identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Absolute root directory; artifact paths resolve against it
    pub root_path: PathBuf,

    /// When the project was first registered
    pub created_at: DateTime<Utc>,
}

/// A single execution of a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Workflow definition being executed
    pub workflow_definition_id: String,

    /// Owning project
    pub project_id: String,

    /// User that initiated the run
    pub user_id: String,

    /// Input arguments (opaque to the ledger)
    pub args: serde_json::Value,

    /// Current status of the run
    pub status: RunStatus,

    /// Phase the run is currently in, if any
    pub current_phase: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// Create a pending run from a creation request
    pub fn new(request: NewRun, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_definition_id: request.workflow_definition_id,
            project_id: request.project_id,
            user_id: request.user_id,
            args: request.args,
            status: RunStatus::Pending,
            current_phase: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the run has reached a terminal status
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Request to create a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRun {
    pub workflow_definition_id: String,
    pub project_id: String,
    pub user_id: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl NewRun {
    pub fn new(
        workflow_definition_id: impl Into<String>,
        project_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            workflow_definition_id: workflow_definition_id.into(),
            project_id: project_id.into(),
            user_id: user_id.into(),
            args: serde_json::Value::Null,
        }
    }

    /// Attach input arguments
    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }
}

/// Status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not yet started
    Pending,

    /// Currently executing
    Running,

    /// Suspended; may resume
    Paused,

    /// Finished successfully
    Completed,

    /// Finished with an error
    Failed,

    /// Stopped by a caller
    Cancelled,
}

impl RunStatus {
    pub const ALL: [RunStatus; 6] = [
        Self::Pending,
        Self::Running,
        Self::Paused,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled runs never change status again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a run in this status may move to `next`.
    ///
    /// Status only moves forward (pending, then running/paused, then a
    /// terminal status) except for `paused <-> running`. Re-applying the
    /// current status is accepted so replayed transitions stay harmless.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        if *self == next {
            return true;
        }
        if next == Self::Pending || self.is_terminal() {
            return false;
        }
        true
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("run status", s))
    }
}
