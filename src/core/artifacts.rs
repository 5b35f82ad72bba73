//! Artifact registry: files produced by a run, sandboxed to the project root.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::broadcast::Channel;
use crate::domain::{NewArtifact, ResolvedArtifact, WorkflowArtifact};

use super::error::{LedgerError, Result};
use super::ledger::{Ledger, LedgerMessage};
use super::safety::{normalize_lexically, resolve_within_root, verify_on_disk, SafetyViolation};
use super::store::{
    is_foreign_key_violation, now, opt_parsed_column, parsed_column, time_column, to_millis,
};

const ARTIFACT_COLUMNS: &str = "a.id, a.run_id, a.name, a.file_type, a.file_path, a.mime_type, \
                                a.size_bytes, a.phase, a.step_id, a.event_id, a.created_at";

impl Ledger {
    /// Register an artifact produced by a run.
    ///
    /// The path is checked against the policy and the project root before
    /// anything is stored, and is persisted in normalized relative form.
    /// Registration never deduplicates: the same name may be registered twice.
    #[instrument(
        skip(self, artifact),
        fields(run_id = %artifact.run_id, path = %artifact.file_path)
    )]
    pub async fn register_artifact(&self, artifact: NewArtifact) -> Result<WorkflowArtifact> {
        self.policy.validate(&artifact.file_path, artifact.size_bytes)?;

        let artifact = WorkflowArtifact::new(artifact, now());

        let artifact = self
            .db
            .call(move |conn| {
                let root = project_root_for_run(conn, artifact.run_id)?.ok_or_else(|| {
                    LedgerError::ForeignKeyViolation {
                        entity: "artifact",
                        detail: format!("run {} does not exist", artifact.run_id),
                    }
                })?;

                let resolved = resolve_within_root(&root, &artifact.file_path)?;
                let relative = resolved
                    .strip_prefix(normalize_lexically(&root))
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|_| PathBuf::from(&artifact.file_path));

                let artifact = WorkflowArtifact {
                    file_path: relative.to_string_lossy().into_owned(),
                    ..artifact
                };
                insert_artifact(conn, &artifact)?;
                Ok(artifact)
            })
            .await?;

        info!(artifact_id = %artifact.id, "Artifact registered");
        self.notify(
            &Channel::workflow_run(artifact.run_id),
            LedgerMessage::ArtifactCreated {
                artifact: artifact.clone(),
            },
        );
        Ok(artifact)
    }

    /// Resolve an artifact to an absolute path for download.
    ///
    /// The stored path is re-checked lexically and, where it exists, against
    /// the filesystem. A path outside the project root is refused.
    #[instrument(skip(self))]
    pub async fn resolve_for_download(&self, artifact_id: Uuid) -> Result<ResolvedArtifact> {
        let (artifact, root) = self
            .db
            .call(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {ARTIFACT_COLUMNS}, p.root_path
                         FROM workflow_artifacts a
                         JOIN workflow_runs r ON r.id = a.run_id
                         JOIN projects p ON p.id = r.project_id
                         WHERE a.id = ?1"
                    ),
                    params![artifact_id.to_string()],
                    |row| Ok((map_artifact(row)?, PathBuf::from(row.get::<_, String>(11)?))),
                )
                .optional()?
                .ok_or_else(|| LedgerError::not_found("artifact", artifact_id))
            })
            .await?;

        let checked = tokio::task::spawn_blocking(move || {
            let resolved = resolve_within_root(&root, &artifact.file_path)?;
            verify_on_disk(&root, &resolved, &artifact.file_path)?;
            Ok::<_, SafetyViolation>(ResolvedArtifact {
                artifact,
                absolute_path: resolved,
            })
        })
        .await?;

        checked.map_err(|violation| {
            warn!(%violation, "Refused artifact download outside project root");
            LedgerError::from(violation)
        })
    }

    /// Artifacts of a run in registration order, optionally for one phase
    pub async fn list_artifacts(
        &self,
        run_id: Uuid,
        phase: Option<&str>,
    ) -> Result<Vec<WorkflowArtifact>> {
        let phase = phase.map(str::to_string);
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ARTIFACT_COLUMNS} FROM workflow_artifacts a
                     WHERE a.run_id = ?1 AND (?2 IS NULL OR a.phase = ?2)
                     ORDER BY a.created_at, a.rowid"
                ))?;
                let artifacts = stmt
                    .query_map(params![run_id.to_string(), phase], map_artifact)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(artifacts)
            })
            .await
    }
}

fn project_root_for_run(conn: &Connection, run_id: Uuid) -> Result<Option<PathBuf>> {
    let root = conn
        .query_row(
            "SELECT p.root_path FROM workflow_runs r
             JOIN projects p ON p.id = r.project_id
             WHERE r.id = ?1",
            params![run_id.to_string()],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(root.map(PathBuf::from))
}

fn insert_artifact(conn: &Connection, artifact: &WorkflowArtifact) -> Result<()> {
    let size = i64::try_from(artifact.size_bytes).unwrap_or(i64::MAX);
    conn.execute(
        "INSERT INTO workflow_artifacts
         (id, run_id, name, file_type, file_path, mime_type, size_bytes,
          phase, step_id, event_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            artifact.id.to_string(),
            artifact.run_id.to_string(),
            artifact.name,
            artifact.file_type.as_str(),
            artifact.file_path,
            artifact.mime_type,
            size,
            artifact.phase,
            artifact.step_id.map(|id| id.to_string()),
            artifact.event_id.map(|id| id.to_string()),
            to_millis(artifact.created_at),
        ],
    )
    .map_err(|err| {
        if is_foreign_key_violation(&err) {
            LedgerError::ForeignKeyViolation {
                entity: "artifact",
                detail: "referenced step or event does not exist".to_string(),
            }
        } else {
            err.into()
        }
    })?;
    Ok(())
}

fn map_artifact(row: &Row<'_>) -> rusqlite::Result<WorkflowArtifact> {
    Ok(WorkflowArtifact {
        id: parsed_column(row, 0)?,
        run_id: parsed_column(row, 1)?,
        name: row.get(2)?,
        file_type: parsed_column(row, 3)?,
        file_path: row.get(4)?,
        mime_type: row.get(5)?,
        size_bytes: row.get::<_, i64>(6)?.max(0) as u64,
        phase: row.get(7)?,
        step_id: opt_parsed_column(row, 8)?,
        event_id: opt_parsed_column(row, 9)?,
        created_at: time_column(row, 10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArtifactFileType, NewRun};

    async fn setup(root: &Path) -> (Ledger, Uuid) {
        let ledger = Ledger::in_memory().await.unwrap();
        ledger.register_project("p1", "P1", root).await.unwrap();
        let run = ledger.create_run(NewRun::new("wf", "p1", "u1")).await.unwrap();
        (ledger, run.id)
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let (ledger, run_id) = setup(Path::new("/projects/p1")).await;

        let artifact = ledger
            .register_artifact(
                NewArtifact::new(run_id, "Report", ArtifactFileType::Text, "out/./report.md")
                    .with_phase("review")
                    .with_size(42),
            )
            .await
            .unwrap();
        assert_eq!(artifact.file_path, "out/report.md");
        assert_eq!(artifact.mime_type, "text/plain");

        let resolved = ledger.resolve_for_download(artifact.id).await.unwrap();
        assert_eq!(resolved.absolute_path, Path::new("/projects/p1/out/report.md"));
        assert_eq!(resolved.artifact, artifact);
    }

    #[tokio::test]
    async fn test_escaping_path_is_never_stored() {
        let (ledger, run_id) = setup(Path::new("/projects/p1")).await;

        let result = ledger
            .register_artifact(NewArtifact::new(
                run_id,
                "passwd",
                ArtifactFileType::File,
                "../../etc/passwd",
            ))
            .await;

        assert!(matches!(result, Err(LedgerError::PathEscape { .. })));
        assert!(ledger.list_artifacts(run_id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_denylisted_and_oversized_paths() {
        let (ledger, run_id) = setup(Path::new("/projects/p1")).await;

        let denied = ledger
            .register_artifact(NewArtifact::new(
                run_id,
                "env",
                ArtifactFileType::Text,
                "config/.env",
            ))
            .await;
        assert!(matches!(denied, Err(LedgerError::DeniedPath { .. })));

        let huge = ledger
            .register_artifact(
                NewArtifact::new(run_id, "big", ArtifactFileType::File, "big.bin")
                    .with_size(u64::MAX),
            )
            .await;
        assert!(matches!(huge, Err(LedgerError::ArtifactTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_same_name_registers_twice() {
        let (ledger, run_id) = setup(Path::new("/projects/p1")).await;

        for _ in 0..2 {
            ledger
                .register_artifact(
                    NewArtifact::new(run_id, "plan", ArtifactFileType::Text, "plan.md")
                        .with_phase("plan"),
                )
                .await
                .unwrap();
        }
        ledger
            .register_artifact(NewArtifact::new(
                run_id,
                "shot",
                ArtifactFileType::Image,
                "shot.png",
            ))
            .await
            .unwrap();

        assert_eq!(ledger.list_artifacts(run_id, Some("plan")).await.unwrap().len(), 2);
        assert_eq!(ledger.list_artifacts(run_id, None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_artifact_for_missing_run() {
        let ledger = Ledger::in_memory().await.unwrap();
        let result = ledger
            .register_artifact(NewArtifact::new(
                Uuid::new_v4(),
                "x",
                ArtifactFileType::Text,
                "x.md",
            ))
            .await;
        assert!(matches!(result, Err(LedgerError::ForeignKeyViolation { .. })));
    }

    #[tokio::test]
    async fn test_resolve_missing_artifact() {
        let ledger = Ledger::in_memory().await.unwrap();
        let err = ledger.resolve_for_download(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
