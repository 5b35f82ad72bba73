//! runledger - Replay-safe execution ledger for workflow runs
//!
//! Records the lifecycle of workflow runs whose steps are executed (and
//! re-executed) by an external durable-execution engine.
//!
//! # Architecture
//!
//! Replays are expected, so creation is idempotent:
//! - Steps are keyed by a caller-supplied external step key per run
//! - Keyed events are deduplicated per `(run, key, event type)`
//! - Duplicate inserts resolve to the existing row, never to an error
//!
//! Every committed change is fanned out to live subscribers on named
//! channels (`workflow_run:<id>`, `project:<id>`).
//!
//! # Modules
//!
//! - `core`: The `Ledger` and its storage (runs, steps, events, artifacts)
//! - `domain`: Data structures (WorkflowRun, WorkflowRunStep, WorkflowEvent, WorkflowArtifact)
//! - `broadcast`: Channel naming and publish/subscribe gateway
//! - `dispatch`: Webhook triggers that enqueue runs
//! - `config`: Configuration loading
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! runledger project add p1 "My project" ./
//! runledger run create deploy --project p1
//! runledger run transition <run-id> running --phase build
//! runledger events <run-id>
//! ```

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod domain;

// Re-export main types at crate root for convenience
pub use broadcast::{BroadcastGateway, Channel, Delivery};
pub use config::LedgerConfig;
pub use crate::core::{Annotation, Ledger, LedgerError, LedgerMessage, Outcome};
pub use dispatch::{RunLauncher, WebhookTrigger};
pub use domain::{
    EventData, EventType, NewArtifact, NewEvent, NewRun, RunStatus, StepStatus, StepUpdate,
    WorkflowArtifact, WorkflowEvent, WorkflowRun, WorkflowRunStep,
};
