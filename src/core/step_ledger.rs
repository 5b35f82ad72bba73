//! Step ledger: replay-keyed steps within a run.
//!
//! A workflow function may be re-executed any number of times by the
//! durable-execution layer. Each logical step carries a caller-supplied
//! external key, and `(run_id, external_step_key)` is unique in storage, so a
//! replayed `find_or_create_step` resolves to the row the first execution
//! created.

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::broadcast::Channel;
use crate::domain::{StepUpdate, WorkflowRunStep};

use super::error::{LedgerError, Result};
use super::ledger::{Ledger, LedgerMessage, Outcome};
use super::store::{
    is_foreign_key_violation, is_unique_violation, now, opt_millis, opt_time_column,
    parsed_column, time_column, to_millis,
};

const STEP_COLUMNS: &str = "id, run_id, external_step_key, name, phase, status, error_message, \
                            started_at, completed_at, session_id, created_at, updated_at";

/// Derive a stable external step key for callers without a natural one.
///
/// Format: `{step_name}:{hash}` where the hash covers `input`.
pub fn step_key(step_name: &str, input: &str) -> String {
    format!("{}:{}", step_name, hash_input(input))
}

/// First 16 hex chars of the SHA-256 of `input`
pub fn hash_input(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

impl Ledger {
    /// Return the step for `(run_id, external_step_key)`, creating it if needed.
    ///
    /// Safe under replay and concurrency: the insert races on the unique
    /// constraint and the loser reads the winner's row. Name and phase of an
    /// existing row are never modified.
    #[instrument(skip(self, name, phase))]
    pub async fn find_or_create_step(
        &self,
        run_id: Uuid,
        external_step_key: &str,
        name: &str,
        phase: Option<&str>,
    ) -> Result<Outcome<WorkflowRunStep>> {
        let step = WorkflowRunStep::new(
            run_id,
            external_step_key.to_string(),
            name.to_string(),
            phase.map(str::to_string),
            now(),
        );

        let outcome = self
            .db
            .call(move |conn| match insert_step(conn, &step) {
                Ok(()) => Ok(Outcome::Created(step)),
                Err(err) if is_unique_violation(&err) => {
                    fetch_step_by_key(conn, step.run_id, &step.external_step_key)?
                        .map(Outcome::Existing)
                        .ok_or_else(|| LedgerError::not_found("step", &step.external_step_key))
                }
                Err(err) if is_foreign_key_violation(&err) => Err(LedgerError::ForeignKeyViolation {
                    entity: "step",
                    detail: format!("run {} does not exist", step.run_id),
                }),
                Err(err) => Err(err.into()),
            })
            .await?;

        match &outcome {
            Outcome::Created(step) => {
                debug!(step_id = %step.id, "Step created");
                self.notify(
                    &Channel::workflow_run(run_id),
                    LedgerMessage::StepCreated { step: step.clone() },
                );
            }
            Outcome::Existing(step) => {
                debug!(step_id = %step.id, status = %step.status, "Step replayed");
            }
        }

        Ok(outcome)
    }

    /// Apply a partial update; fields left `None` keep their stored value
    #[instrument(skip(self, update))]
    pub async fn update_step(&self, step_id: Uuid, update: StepUpdate) -> Result<WorkflowRunStep> {
        if let Some(status) = update.status {
            if status.is_terminal() && update.completed_at.is_none() {
                warn!(%status, "Step moved to a terminal status without completed_at");
            }
        }

        let step = self
            .db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let changed = tx.execute(
                    "UPDATE workflow_run_steps SET
                         status = COALESCE(?2, status),
                         error_message = COALESCE(?3, error_message),
                         started_at = COALESCE(?4, started_at),
                         completed_at = COALESCE(?5, completed_at),
                         session_id = COALESCE(?6, session_id),
                         updated_at = ?7
                     WHERE id = ?1",
                    params![
                        step_id.to_string(),
                        update.status.map(|s| s.as_str()),
                        update.error_message,
                        opt_millis(update.started_at),
                        opt_millis(update.completed_at),
                        update.session_id,
                        to_millis(now()),
                    ],
                )?;
                if changed == 0 {
                    return Err(LedgerError::not_found("step", step_id));
                }

                let step = fetch_step(&tx, step_id)?
                    .ok_or_else(|| LedgerError::not_found("step", step_id))?;
                tx.commit()?;
                Ok(step)
            })
            .await?;

        debug!(status = %step.status, "Step updated");
        self.notify(
            &Channel::workflow_run(step.run_id),
            LedgerMessage::StepUpdated { step: step.clone() },
        );
        Ok(step)
    }

    pub async fn get_step(&self, step_id: Uuid) -> Result<WorkflowRunStep> {
        self.db
            .call(move |conn| {
                fetch_step(conn, step_id)?.ok_or_else(|| LedgerError::not_found("step", step_id))
            })
            .await
    }

    /// All steps of a run in creation order
    pub async fn list_steps(&self, run_id: Uuid) -> Result<Vec<WorkflowRunStep>> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {STEP_COLUMNS} FROM workflow_run_steps
                     WHERE run_id = ?1 ORDER BY created_at, rowid"
                ))?;
                let steps = stmt
                    .query_map(params![run_id.to_string()], map_step)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(steps)
            })
            .await
    }
}

fn insert_step(conn: &Connection, step: &WorkflowRunStep) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO workflow_run_steps
         (id, run_id, external_step_key, name, phase, status, error_message,
          started_at, completed_at, session_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            step.id.to_string(),
            step.run_id.to_string(),
            step.external_step_key,
            step.name,
            step.phase,
            step.status.as_str(),
            step.error_message,
            opt_millis(step.started_at),
            opt_millis(step.completed_at),
            step.session_id,
            to_millis(step.created_at),
            to_millis(step.updated_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn fetch_step(conn: &Connection, step_id: Uuid) -> Result<Option<WorkflowRunStep>> {
    let step = conn
        .query_row(
            &format!("SELECT {STEP_COLUMNS} FROM workflow_run_steps WHERE id = ?1"),
            params![step_id.to_string()],
            map_step,
        )
        .optional()?;
    Ok(step)
}

fn fetch_step_by_key(
    conn: &Connection,
    run_id: Uuid,
    key: &str,
) -> Result<Option<WorkflowRunStep>> {
    let step = conn
        .query_row(
            &format!(
                "SELECT {STEP_COLUMNS} FROM workflow_run_steps
                 WHERE run_id = ?1 AND external_step_key = ?2"
            ),
            params![run_id.to_string(), key],
            map_step,
        )
        .optional()?;
    Ok(step)
}

fn map_step(row: &Row<'_>) -> rusqlite::Result<WorkflowRunStep> {
    Ok(WorkflowRunStep {
        id: parsed_column(row, 0)?,
        run_id: parsed_column(row, 1)?,
        external_step_key: row.get(2)?,
        name: row.get(3)?,
        phase: row.get(4)?,
        status: parsed_column(row, 5)?,
        error_message: row.get(6)?,
        started_at: opt_time_column(row, 7)?,
        completed_at: opt_time_column(row, 8)?,
        session_id: row.get(9)?,
        created_at: time_column(row, 10)?,
        updated_at: time_column(row, 11)?,
    })
}
