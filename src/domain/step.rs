//! Steps: replay-keyed units of work inside a run.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ParseEnumError;

/// A unit of work inside a run phase.
///
/// `(run_id, external_step_key)` identifies the logical step; replays of the
/// same external call resolve to the same row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunStep {
    pub id: Uuid,

    /// Owning run
    pub run_id: Uuid,

    /// Caller-assigned key, stable across replays
    pub external_step_key: String,

    /// Human-readable name
    pub name: String,

    /// Phase the step belongs to
    pub phase: Option<String>,

    pub status: StepStatus,

    /// Error message if failed
    pub error_message: Option<String>,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Interactive agent session launched by this step
    pub session_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRunStep {
    /// Create a pending step
    pub fn new(
        run_id: Uuid,
        external_step_key: String,
        name: String,
        phase: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            external_step_key,
            name,
            phase,
            status: StepStatus::Pending,
            error_message: None,
            started_at: None,
            completed_at: None,
            session_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet started
    Pending,

    /// Currently executing
    Running,

    /// Completed successfully
    Completed,

    /// Failed (with error)
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ParseEnumError::new("step status", other)),
        }
    }
}

/// Partial update to a step. Only fields that are `Some` are written.
///
/// Timestamps are always supplied by the caller so that replays of the same
/// update write the same values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepUpdate {
    pub status: Option<StepStatus>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
}

impl StepUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self
    }

    pub fn with_completed_at(mut self, completed_at: DateTime<Utc>) -> Self {
        self.completed_at = Some(completed_at);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// True when the update changes nothing
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_step_is_pending() {
        let step = WorkflowRunStep::new(
            Uuid::new_v4(),
            "build-1".to_string(),
            "Build".to_string(),
            Some("build".to_string()),
            Utc::now(),
        );

        assert_eq!(step.status, StepStatus::Pending);
        assert!(step.started_at.is_none());
        assert!(step.completed_at.is_none());
    }

    #[test]
    fn test_step_update_builder() {
        let update = StepUpdate::new()
            .with_status(StepStatus::Failed)
            .with_error("compiler exploded");

        assert_eq!(update.status, Some(StepStatus::Failed));
        assert_eq!(update.error_message.as_deref(), Some("compiler exploded"));
        assert!(update.started_at.is_none());
        assert!(!update.is_empty());
        assert!(StepUpdate::new().is_empty());
    }

    #[test]
    fn test_step_status_serialization() {
        let json = serde_json::to_string(&StepStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        assert_eq!("running".parse::<StepStatus>().unwrap(), StepStatus::Running);
        assert!("skipped".parse::<StepStatus>().is_err());
    }
}
