//! Run store: projects and workflow runs.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{NewRun, Project, RunStatus, WorkflowRun};

use super::error::{LedgerError, Result};
use super::ledger::{Ledger, LedgerMessage};
use super::safety::absolute_root;
use super::store::{
    is_foreign_key_violation, json_column, now, parsed_column, time_column, to_millis,
};

const RUN_COLUMNS: &str = "id, workflow_definition_id, project_id, user_id, args, status, \
                           current_phase, created_at, updated_at";

impl Ledger {
    /// Register a project, or update its name and root if it already exists.
    ///
    /// The root must be absolute; relative roots fail with `InvalidProjectRoot`.
    #[instrument(skip(self, name, root_path))]
    pub async fn register_project(
        &self,
        project_id: &str,
        name: &str,
        root_path: &Path,
    ) -> Result<Project> {
        let project_id = project_id.to_string();
        let name = name.to_string();
        let root = absolute_root(root_path)?;
        let created_at = now();

        let project = self
            .db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO projects (id, name, root_path, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE
                     SET name = excluded.name, root_path = excluded.root_path",
                    params![project_id, name, root.to_string_lossy(), to_millis(created_at)],
                )?;
                fetch_project(conn, &project_id)?
                    .ok_or_else(|| LedgerError::not_found("project", &project_id))
            })
            .await?;

        info!(root = %project.root_path.display(), "Project registered");
        Ok(project)
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Project> {
        let project_id = project_id.to_string();
        self.db
            .call(move |conn| {
                fetch_project(conn, &project_id)?
                    .ok_or_else(|| LedgerError::not_found("project", &project_id))
            })
            .await
    }

    /// Create a pending run.
    ///
    /// Fails with `ForeignKeyViolation` when the project does not exist.
    #[instrument(
        skip(self, request),
        fields(project = %request.project_id, definition = %request.workflow_definition_id)
    )]
    pub async fn create_run(&self, request: NewRun) -> Result<WorkflowRun> {
        let run = WorkflowRun::new(request, now());
        let row = run.clone();

        self.db
            .call(move |conn| {
                let args = serde_json::to_string(&row.args)?;
                conn.execute(
                    "INSERT INTO workflow_runs
                     (id, workflow_definition_id, project_id, user_id, args, status,
                      current_phase, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        row.id.to_string(),
                        row.workflow_definition_id,
                        row.project_id,
                        row.user_id,
                        args,
                        row.status.as_str(),
                        row.current_phase,
                        to_millis(row.created_at),
                        to_millis(row.updated_at),
                    ],
                )
                .map_err(|err| {
                    if is_foreign_key_violation(&err) {
                        LedgerError::ForeignKeyViolation {
                            entity: "workflow_run",
                            detail: format!("project {} does not exist", row.project_id),
                        }
                    } else {
                        err.into()
                    }
                })?;
                Ok(())
            })
            .await?;

        info!(run_id = %run.id, "Run created");
        self.notify_run(
            run.id,
            &run.project_id,
            LedgerMessage::RunCreated { run: run.clone() },
        );
        Ok(run)
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<WorkflowRun> {
        self.db
            .call(move |conn| {
                fetch_run(conn, run_id)?
                    .ok_or_else(|| LedgerError::not_found("workflow_run", run_id))
            })
            .await
    }

    /// Move a run to `status`, optionally entering a new phase.
    ///
    /// The check and the write share one immediate transaction so concurrent
    /// transitions cannot interleave. `current_phase` of `None` keeps the
    /// existing phase.
    #[instrument(skip(self))]
    pub async fn transition_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        current_phase: Option<&str>,
    ) -> Result<WorkflowRun> {
        let current_phase = current_phase.map(str::to_string);

        let run = self
            .db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let existing = fetch_run(&tx, run_id)?
                    .ok_or_else(|| LedgerError::not_found("workflow_run", run_id))?;

                if !existing.status.can_transition_to(status) {
                    return Err(LedgerError::InvalidTransition {
                        from: existing.status,
                        to: status,
                    });
                }

                tx.execute(
                    "UPDATE workflow_runs
                     SET status = ?2, current_phase = COALESCE(?3, current_phase), updated_at = ?4
                     WHERE id = ?1",
                    params![run_id.to_string(), status.as_str(), current_phase, to_millis(now())],
                )?;

                let updated = fetch_run(&tx, run_id)?
                    .ok_or_else(|| LedgerError::not_found("workflow_run", run_id))?;
                tx.commit()?;
                Ok(updated)
            })
            .await?;

        info!(status = %run.status, phase = ?run.current_phase, "Run transitioned");
        self.notify_run(
            run.id,
            &run.project_id,
            LedgerMessage::RunUpdated { run: run.clone() },
        );
        Ok(run)
    }

    /// List runs, most recent first
    pub async fn list_runs(
        &self,
        project_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WorkflowRun>> {
        let project_id = project_id.map(str::to_string);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM workflow_runs
                     WHERE ?1 IS NULL OR project_id = ?1
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?2"
                ))?;
                let runs = stmt
                    .query_map(params![project_id, limit], map_run)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(runs)
            })
            .await
    }

    /// Delete a run together with its steps, events and artifacts
    #[instrument(skip(self))]
    pub async fn delete_run(&self, run_id: Uuid) -> Result<()> {
        let project_id = self
            .db
            .call(move |conn| {
                let project_id: Option<String> = conn
                    .query_row(
                        "SELECT project_id FROM workflow_runs WHERE id = ?1",
                        params![run_id.to_string()],
                        |row| row.get(0),
                    )
                    .optional()?;
                let project_id =
                    project_id.ok_or_else(|| LedgerError::not_found("workflow_run", run_id))?;
                conn.execute(
                    "DELETE FROM workflow_runs WHERE id = ?1",
                    params![run_id.to_string()],
                )?;
                Ok(project_id)
            })
            .await?;

        debug!("Run deleted");
        self.notify_run(
            run_id,
            &project_id,
            LedgerMessage::RunDeleted {
                run_id,
                project_id: project_id.clone(),
            },
        );
        Ok(())
    }
}

pub(crate) fn fetch_run(conn: &Connection, run_id: Uuid) -> Result<Option<WorkflowRun>> {
    let run = conn
        .query_row(
            &format!("SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = ?1"),
            params![run_id.to_string()],
            map_run,
        )
        .optional()?;
    Ok(run)
}

pub(crate) fn fetch_project(conn: &Connection, project_id: &str) -> Result<Option<Project>> {
    let project = conn
        .query_row(
            "SELECT id, name, root_path, created_at FROM projects WHERE id = ?1",
            params![project_id],
            |row| {
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    root_path: row.get::<_, String>(2)?.into(),
                    created_at: time_column(row, 3)?,
                })
            },
        )
        .optional()?;
    Ok(project)
}

fn map_run(row: &Row<'_>) -> rusqlite::Result<WorkflowRun> {
    Ok(WorkflowRun {
        id: parsed_column(row, 0)?,
        workflow_definition_id: row.get(1)?,
        project_id: row.get(2)?,
        user_id: row.get(3)?,
        args: json_column(row, 4)?,
        status: parsed_column(row, 5)?,
        current_phase: row.get(6)?,
        created_at: time_column(row, 7)?,
        updated_at: time_column(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn ledger_with_project() -> Ledger {
        let ledger = Ledger::in_memory().await.unwrap();
        ledger
            .register_project("p1", "Project One", Path::new("/projects/p1"))
            .await
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_create_and_get_run() {
        let ledger = ledger_with_project().await;
        let run = ledger
            .create_run(NewRun::new("wf", "p1", "u1").with_args(json!({"branch": "main"})))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Pending);
        let fetched = ledger.get_run(run.id).await.unwrap();
        assert_eq!(fetched, run);
        assert_eq!(fetched.args["branch"], "main");
    }

    #[tokio::test]
    async fn test_run_for_missing_project_is_foreign_key_violation() {
        let ledger = Ledger::in_memory().await.unwrap();
        let result = ledger.create_run(NewRun::new("wf", "ghost", "u1")).await;
        assert!(matches!(result, Err(LedgerError::ForeignKeyViolation { .. })));
    }

    #[tokio::test]
    async fn test_get_missing_run() {
        let ledger = Ledger::in_memory().await.unwrap();
        let err = ledger.get_run(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_transition_updates_phase() {
        let ledger = ledger_with_project().await;
        let run = ledger.create_run(NewRun::new("wf", "p1", "u1")).await.unwrap();

        let run = ledger
            .transition_run(run.id, RunStatus::Running, Some("build"))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.current_phase.as_deref(), Some("build"));

        // No phase keeps the current one
        let run = ledger.transition_run(run.id, RunStatus::Paused, None).await.unwrap();
        assert_eq!(run.current_phase.as_deref(), Some("build"));
    }

    #[tokio::test]
    async fn test_completed_run_rejects_running() {
        let ledger = ledger_with_project().await;
        let run = ledger.create_run(NewRun::new("wf", "p1", "u1")).await.unwrap();
        ledger.transition_run(run.id, RunStatus::Completed, None).await.unwrap();

        let result = ledger.transition_run(run.id, RunStatus::Running, None).await;
        assert!(matches!(
            result,
            Err(LedgerError::InvalidTransition {
                from: RunStatus::Completed,
                to: RunStatus::Running
            })
        ));
        assert_eq!(ledger.get_run(run.id).await.unwrap().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_transition_missing_run() {
        let ledger = Ledger::in_memory().await.unwrap();
        let err = ledger
            .transition_run(Uuid::new_v4(), RunStatus::Running, None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_runs_filters_by_project() {
        let ledger = ledger_with_project().await;
        ledger
            .register_project("p2", "Project Two", Path::new("/projects/p2"))
            .await
            .unwrap();

        ledger.create_run(NewRun::new("wf", "p1", "u1")).await.unwrap();
        ledger.create_run(NewRun::new("wf", "p1", "u1")).await.unwrap();
        ledger.create_run(NewRun::new("wf", "p2", "u1")).await.unwrap();

        assert_eq!(ledger.list_runs(Some("p1"), 10).await.unwrap().len(), 2);
        assert_eq!(ledger.list_runs(None, 10).await.unwrap().len(), 3);
        assert_eq!(ledger.list_runs(None, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_project_updates_root() {
        let ledger = ledger_with_project().await;
        let project = ledger
            .register_project("p1", "Renamed", Path::new("/srv/p1/./"))
            .await
            .unwrap();

        assert_eq!(project.name, "Renamed");
        assert_eq!(project.root_path, Path::new("/srv/p1"));
        assert_eq!(ledger.get_project("p1").await.unwrap(), project);
    }

    #[tokio::test]
    async fn test_register_project_requires_absolute_root() {
        let ledger = Ledger::in_memory().await.unwrap();

        for root in [".", "./", "", "projects/p1"] {
            let result = ledger.register_project("p1", "Project", Path::new(root)).await;
            assert!(
                matches!(result, Err(LedgerError::InvalidProjectRoot { .. })),
                "root {root:?} should be refused, got {result:?}"
            );
        }
        assert!(ledger.get_project("p1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_run() {
        let ledger = ledger_with_project().await;
        let run = ledger.create_run(NewRun::new("wf", "p1", "u1")).await.unwrap();

        ledger.delete_run(run.id).await.unwrap();
        assert!(ledger.get_run(run.id).await.unwrap_err().is_not_found());
        assert!(ledger.delete_run(run.id).await.unwrap_err().is_not_found());
    }
}
