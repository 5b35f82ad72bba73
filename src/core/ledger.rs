//! The ledger facade.
//!
//! Coordinates the run store, step ledger, event log and artifact registry
//! over one database connection, and fans committed changes out through
//! the broadcast gateway. Broadcasting always happens after the write has
//! committed and outside any transaction.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, trace};
use uuid::Uuid;

use crate::broadcast::{BroadcastGateway, Channel, Delivery};
use crate::config::LedgerConfig;
use crate::domain::{WorkflowArtifact, WorkflowEvent, WorkflowRun, WorkflowRunStep};

use super::error::Result;
use super::safety::ArtifactPolicy;
use super::store::Database;

/// Change notifications published after a committed write
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerMessage {
    RunCreated { run: WorkflowRun },
    RunUpdated { run: WorkflowRun },
    RunDeleted { run_id: Uuid, project_id: String },
    StepCreated { step: WorkflowRunStep },
    StepUpdated { step: WorkflowRunStep },
    EventCreated { event: WorkflowEvent },
    ArtifactCreated { artifact: WorkflowArtifact },
}

/// Result of a find-or-create call
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// This call inserted the row
    Created(T),

    /// The row already existed (replay or concurrent duplicate)
    Existing(T),
}

impl<T> Outcome<T> {
    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn get(&self) -> &T {
        match self {
            Self::Created(value) | Self::Existing(value) => value,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Created(value) | Self::Existing(value) => value,
        }
    }
}

/// Workflow execution ledger
pub struct Ledger {
    pub(crate) db: Database,
    pub(crate) gateway: Arc<BroadcastGateway<LedgerMessage>>,
    pub(crate) policy: ArtifactPolicy,
}

impl Ledger {
    /// Open the ledger described by `config`, creating the database if needed
    pub async fn open(config: &LedgerConfig) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = Database::open(&config.database_path, config.busy_timeout).await?;
        info!(path = %config.database_path.display(), "Ledger opened");

        Ok(Self {
            db,
            gateway: Arc::new(BroadcastGateway::new(config.broadcast_capacity)),
            policy: config.artifact_policy.clone(),
        })
    }

    /// A ledger over a private in-memory database with default settings
    pub async fn in_memory() -> Result<Self> {
        Ok(Self {
            db: Database::open_in_memory().await?,
            gateway: Arc::new(BroadcastGateway::default()),
            policy: ArtifactPolicy::default(),
        })
    }

    /// Share a gateway between several ledgers in one process
    pub fn with_gateway(mut self, gateway: Arc<BroadcastGateway<LedgerMessage>>) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_artifact_policy(mut self, policy: ArtifactPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn gateway(&self) -> &Arc<BroadcastGateway<LedgerMessage>> {
        &self.gateway
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Subscribe to changes on a channel
    pub fn subscribe(&self, channel: &Channel) -> broadcast::Receiver<Delivery<LedgerMessage>> {
        self.gateway.subscribe(channel)
    }

    /// Post-commit hook: fan a message out on `channel`
    pub(crate) fn notify(&self, channel: &Channel, message: LedgerMessage) {
        let reached = self.gateway.broadcast(channel, message);
        trace!(%channel, reached, "Broadcast ledger change");
    }

    /// Run-level changes go to the global channel, the run's project channel
    /// and the run's own channel
    pub(crate) fn notify_run(&self, run_id: Uuid, project_id: &str, message: LedgerMessage) {
        self.notify(&Channel::global(), message.clone());
        if let Ok(project_channel) = Channel::project(project_id) {
            self.notify(&project_channel, message.clone());
        }
        self.notify(&Channel::workflow_run(run_id), message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accessors() {
        let created = Outcome::Created(1);
        let existing = Outcome::Existing(2);

        assert!(created.was_created());
        assert!(!existing.was_created());
        assert_eq!(*created.get(), 1);
        assert_eq!(existing.into_inner(), 2);
    }

    #[test]
    fn test_message_tagging() {
        let message = LedgerMessage::RunDeleted {
            run_id: Uuid::nil(),
            project_id: "p1".to_string(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "run_deleted");
        assert_eq!(json["project_id"], "p1");
    }

    #[tokio::test]
    async fn test_in_memory_ledger_has_no_subscribers() {
        let ledger = Ledger::in_memory().await.unwrap();
        assert_eq!(ledger.gateway().channel_count(), 0);
        assert!(ledger.database().path().is_none());
    }
}
