//! Event log: the immutable timeline of a run.
//!
//! Events with an external step key are deduplicated on
//! `(run_id, external_step_key, event_type)`; keyless events always append.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::broadcast::Channel;
use crate::domain::{EventData, EventType, NewEvent, WorkflowEvent};

use super::error::{LedgerError, Result};
use super::ledger::{Ledger, LedgerMessage, Outcome};
use super::run_store::fetch_run;
use super::store::{
    is_foreign_key_violation, is_unique_violation, json_column, now, opt_parsed_column,
    parsed_column, time_column, to_millis,
};

const EVENT_COLUMNS: &str =
    "id, run_id, step_id, external_step_key, event_data, phase, created_by, created_at";

/// A user-authored note on a run's timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Defaults to the run's current phase
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub step_id: Option<Uuid>,
}

impl Ledger {
    /// Append an event.
    ///
    /// A keyed event that already exists for its `(run, key, type)` resolves
    /// to the stored row instead of failing.
    pub async fn create_event(&self, event: NewEvent) -> Result<WorkflowEvent> {
        self.find_or_create_event(event).await.map(Outcome::into_inner)
    }

    /// Append an event, or return the one a previous execution recorded
    #[instrument(
        skip(self, event),
        fields(run_id = %event.run_id, event_type = %event.event_type())
    )]
    pub async fn find_or_create_event(&self, event: NewEvent) -> Result<Outcome<WorkflowEvent>> {
        let event = WorkflowEvent::new(event, now());

        let outcome = self
            .db
            .call(move |conn| {
                check_step_belongs_to_run(conn, &event)?;
                match insert_event(conn, &event) {
                    Ok(()) => Ok(Outcome::Created(event)),
                    Err(LedgerError::Database(err)) if is_unique_violation(&err) => {
                        let key = event.external_step_key.as_deref().unwrap_or_default();
                        fetch_event_by_key(conn, event.run_id, key, event.event_type())?
                            .map(Outcome::Existing)
                            .ok_or_else(|| LedgerError::not_found("event", key))
                    }
                    Err(LedgerError::Database(err)) if is_foreign_key_violation(&err) => {
                        Err(LedgerError::ForeignKeyViolation {
                            entity: "event",
                            detail: format!("run {} does not exist", event.run_id),
                        })
                    }
                    Err(err) => Err(err),
                }
            })
            .await?;

        match &outcome {
            Outcome::Created(event) => {
                debug!(event_id = %event.id, "Event recorded");
                self.notify(
                    &Channel::workflow_run(event.run_id),
                    LedgerMessage::EventCreated {
                        event: event.clone(),
                    },
                );
            }
            Outcome::Existing(event) => debug!(event_id = %event.id, "Event replayed"),
        }

        Ok(outcome)
    }

    /// Events of a run in timeline order, optionally narrowed to one step
    pub async fn list_events(
        &self,
        run_id: Uuid,
        step_id: Option<Uuid>,
    ) -> Result<Vec<WorkflowEvent>> {
        self.db
            .call(move |conn| {
                if fetch_run(conn, run_id)?.is_none() {
                    return Err(LedgerError::not_found("workflow_run", run_id));
                }

                let mut stmt = conn.prepare(&format!(
                    "SELECT {EVENT_COLUMNS} FROM workflow_events
                     WHERE run_id = ?1 AND (?2 IS NULL OR step_id = ?2)
                     ORDER BY created_at, rowid"
                ))?;
                let events = stmt
                    .query_map(
                        params![run_id.to_string(), step_id.map(|id| id.to_string())],
                        map_event,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(events)
            })
            .await
    }

    /// Record a user annotation on a run
    #[instrument(skip(self, annotation), fields(user = %annotation.user_id))]
    pub async fn annotate(&self, run_id: Uuid, annotation: Annotation) -> Result<WorkflowEvent> {
        let run = self.get_run(run_id).await?;

        let data = EventData::annotation(annotation.title, annotation.body);
        let mut event = NewEvent::new(run_id, data).created_by(annotation.user_id);
        if let Some(phase) = annotation.phase.or(run.current_phase) {
            event = event.with_phase(phase);
        }
        if let Some(step_id) = annotation.step_id {
            event = event.with_step(step_id);
        }

        self.create_event(event).await
    }
}

/// An event may only be attributed to a step of its own run
fn check_step_belongs_to_run(conn: &Connection, event: &WorkflowEvent) -> Result<()> {
    let Some(step_id) = event.step_id else {
        return Ok(());
    };

    let owner: Option<String> = conn
        .query_row(
            "SELECT run_id FROM workflow_run_steps WHERE id = ?1",
            params![step_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    match owner {
        Some(run_id) if run_id == event.run_id.to_string() => Ok(()),
        Some(run_id) => Err(LedgerError::ForeignKeyViolation {
            entity: "event",
            detail: format!("step {step_id} belongs to run {run_id}"),
        }),
        None => Err(LedgerError::ForeignKeyViolation {
            entity: "event",
            detail: format!("step {step_id} does not exist"),
        }),
    }
}

fn insert_event(conn: &Connection, event: &WorkflowEvent) -> Result<()> {
    let data = serde_json::to_string(&event.event_data)?;
    conn.execute(
        "INSERT INTO workflow_events
         (id, run_id, step_id, external_step_key, event_type, event_data,
          phase, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.id.to_string(),
            event.run_id.to_string(),
            event.step_id.map(|id| id.to_string()),
            event.external_step_key,
            event.event_type().as_str(),
            data,
            event.phase,
            event.created_by,
            to_millis(event.created_at),
        ],
    )?;
    Ok(())
}

fn fetch_event_by_key(
    conn: &Connection,
    run_id: Uuid,
    key: &str,
    event_type: EventType,
) -> Result<Option<WorkflowEvent>> {
    let event = conn
        .query_row(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM workflow_events
                 WHERE run_id = ?1 AND external_step_key = ?2 AND event_type = ?3"
            ),
            params![run_id.to_string(), key, event_type.as_str()],
            map_event,
        )
        .optional()?;
    Ok(event)
}

fn map_event(row: &Row<'_>) -> rusqlite::Result<WorkflowEvent> {
    Ok(WorkflowEvent {
        id: parsed_column(row, 0)?,
        run_id: parsed_column(row, 1)?,
        step_id: opt_parsed_column(row, 2)?,
        external_step_key: row.get(3)?,
        event_data: json_column(row, 4)?,
        phase: row.get(5)?,
        created_by: row.get(6)?,
        created_at: time_column(row, 7)?,
    })
}
