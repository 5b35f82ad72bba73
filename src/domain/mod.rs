//! Domain types for the runledger workflow ledger.
//!
//! This module contains the core data structures:
//! - Run: One execution of a workflow definition, and its owning project
//! - Step: A replay-keyed unit of work inside a run
//! - Events: Immutable, typed timeline entries
//! - Artifact: Files produced during a run

pub mod artifact;
pub mod events;
pub mod run;
pub mod step;

use thiserror::Error;

// Re-export commonly used types
pub use artifact::{ArtifactFileType, NewArtifact, ResolvedArtifact, WorkflowArtifact};
pub use events::{EventBase, EventData, EventType, NewEvent, WorkflowEvent};
pub use run::{NewRun, Project, RunStatus, WorkflowRun};
pub use step::{StepStatus, StepUpdate, WorkflowRunStep};

/// Error returned when a stored or user-supplied enum label is not recognised
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
