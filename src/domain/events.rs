//! Event types for the workflow timeline.
//!
//! Events are immutable once written. Each carries a typed payload whose
//! variant determines the event type; every variant shares the
//! `{title, body}` base.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ParseEnumError;

/// A single entry in a run's timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Step the event is attributed to (if any)
    pub step_id: Option<Uuid>,

    /// Replay key used for deduplication, scoped by event type
    pub external_step_key: Option<String>,

    /// Typed payload; also determines the event type
    pub event_data: EventData,

    /// Phase the event belongs to
    pub phase: Option<String>,

    /// Creating user, `None` for system events
    pub created_by: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl WorkflowEvent {
    /// Build an event from creation parameters
    pub fn new(params: NewEvent, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: params.run_id,
            step_id: params.step_id,
            external_step_key: params.external_step_key,
            event_data: params.data,
            phase: params.phase,
            created_by: params.created_by,
            created_at: now,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_data.event_type()
    }

    pub fn title(&self) -> &str {
        &self.event_data.base().title
    }
}

/// Parameters for creating an event
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub run_id: Uuid,
    pub step_id: Option<Uuid>,
    pub external_step_key: Option<String>,
    pub data: EventData,
    pub phase: Option<String>,
    pub created_by: Option<String>,
}

impl NewEvent {
    pub fn new(run_id: Uuid, data: EventData) -> Self {
        Self {
            run_id,
            step_id: None,
            external_step_key: None,
            data,
            phase: None,
            created_by: None,
        }
    }

    pub fn with_step(mut self, step_id: Uuid) -> Self {
        self.step_id = Some(step_id);
        self
    }

    /// Attach a replay key; events with a key are deduplicated per type
    pub fn with_key(mut self, external_step_key: impl Into<String>) -> Self {
        self.external_step_key = Some(external_step_key.into());
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn created_by(mut self, user_id: impl Into<String>) -> Self {
        self.created_by = Some(user_id.into());
        self
    }

    pub fn event_type(&self) -> EventType {
        self.data.event_type()
    }
}

/// Fields shared by every event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBase {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

impl EventBase {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Typed event payload, tagged by event type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventData {
    RunStarted {
        #[serde(flatten)]
        base: EventBase,
    },
    RunPaused {
        #[serde(flatten)]
        base: EventBase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    RunResumed {
        #[serde(flatten)]
        base: EventBase,
    },
    RunCompleted {
        #[serde(flatten)]
        base: EventBase,
    },
    RunFailed {
        #[serde(flatten)]
        base: EventBase,
        error: String,
    },
    RunCancelled {
        #[serde(flatten)]
        base: EventBase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    PhaseStarted {
        #[serde(flatten)]
        base: EventBase,
        phase_name: String,
    },
    PhaseCompleted {
        #[serde(flatten)]
        base: EventBase,
        phase_name: String,
    },
    StepStarted {
        #[serde(flatten)]
        base: EventBase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attempt: Option<u32>,
    },
    StepCompleted {
        #[serde(flatten)]
        base: EventBase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    StepFailed {
        #[serde(flatten)]
        base: EventBase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_name: Option<String>,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attempt: Option<u32>,
    },
    StepRetrying {
        #[serde(flatten)]
        base: EventBase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_name: Option<String>,
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_attempts: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    AgentSessionStarted {
        #[serde(flatten)]
        base: EventBase,
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },
    ApprovalRequested {
        #[serde(flatten)]
        base: EventBase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        approver: Option<String>,
    },
    ArtifactCreated {
        #[serde(flatten)]
        base: EventBase,
        artifact_id: Uuid,
        artifact_name: String,
    },
    AnnotationAdded {
        #[serde(flatten)]
        base: EventBase,
    },
}

impl EventData {
    /// A user annotation with just a title and body
    pub fn annotation(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::AnnotationAdded {
            base: EventBase::new(title, body),
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Self::RunStarted { .. } => EventType::RunStarted,
            Self::RunPaused { .. } => EventType::RunPaused,
            Self::RunResumed { .. } => EventType::RunResumed,
            Self::RunCompleted { .. } => EventType::RunCompleted,
            Self::RunFailed { .. } => EventType::RunFailed,
            Self::RunCancelled { .. } => EventType::RunCancelled,
            Self::PhaseStarted { .. } => EventType::PhaseStarted,
            Self::PhaseCompleted { .. } => EventType::PhaseCompleted,
            Self::StepStarted { .. } => EventType::StepStarted,
            Self::StepCompleted { .. } => EventType::StepCompleted,
            Self::StepFailed { .. } => EventType::StepFailed,
            Self::StepRetrying { .. } => EventType::StepRetrying,
            Self::AgentSessionStarted { .. } => EventType::AgentSessionStarted,
            Self::ApprovalRequested { .. } => EventType::ApprovalRequested,
            Self::ArtifactCreated { .. } => EventType::ArtifactCreated,
            Self::AnnotationAdded { .. } => EventType::AnnotationAdded,
        }
    }

    pub fn base(&self) -> &EventBase {
        match self {
            Self::RunStarted { base }
            | Self::RunPaused { base, .. }
            | Self::RunResumed { base }
            | Self::RunCompleted { base }
            | Self::RunFailed { base, .. }
            | Self::RunCancelled { base, .. }
            | Self::PhaseStarted { base, .. }
            | Self::PhaseCompleted { base, .. }
            | Self::StepStarted { base, .. }
            | Self::StepCompleted { base, .. }
            | Self::StepFailed { base, .. }
            | Self::StepRetrying { base, .. }
            | Self::AgentSessionStarted { base, .. }
            | Self::ApprovalRequested { base, .. }
            | Self::ArtifactCreated { base, .. }
            | Self::AnnotationAdded { base } => base,
        }
    }
}

/// Closed set of event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    RunPaused,
    RunResumed,
    RunCompleted,
    RunFailed,
    RunCancelled,
    PhaseStarted,
    PhaseCompleted,
    StepStarted,
    StepCompleted,
    StepFailed,
    StepRetrying,
    AgentSessionStarted,
    ApprovalRequested,
    ArtifactCreated,
    /// User-authored note on the timeline
    AnnotationAdded,
}

impl EventType {
    pub const ALL: [EventType; 16] = [
        Self::RunStarted,
        Self::RunPaused,
        Self::RunResumed,
        Self::RunCompleted,
        Self::RunFailed,
        Self::RunCancelled,
        Self::PhaseStarted,
        Self::PhaseCompleted,
        Self::StepStarted,
        Self::StepCompleted,
        Self::StepFailed,
        Self::StepRetrying,
        Self::AgentSessionStarted,
        Self::ApprovalRequested,
        Self::ArtifactCreated,
        Self::AnnotationAdded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "run_started",
            Self::RunPaused => "run_paused",
            Self::RunResumed => "run_resumed",
            Self::RunCompleted => "run_completed",
            Self::RunFailed => "run_failed",
            Self::RunCancelled => "run_cancelled",
            Self::PhaseStarted => "phase_started",
            Self::PhaseCompleted => "phase_completed",
            Self::StepStarted => "step_started",
            Self::StepCompleted => "step_completed",
            Self::StepFailed => "step_failed",
            Self::StepRetrying => "step_retrying",
            Self::AgentSessionStarted => "agent_session_started",
            Self::ApprovalRequested => "approval_requested",
            Self::ArtifactCreated => "artifact_created",
            Self::AnnotationAdded => "annotation_added",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("event type", s))
    }
}
