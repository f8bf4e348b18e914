//! SQLite persistence for workflows, executions, and settings.
//!
//! The store keeps JSON blobs (graphs, logs) as TEXT columns and decodes
//! them on read. Timestamps are RFC 3339 TEXT. Embedded migrations run on
//! connect; the schema lives under `migrations/`.
//!
//! Each caller runs short, independent statements — no long transactions —
//! so concurrent executions each opening their own calls are safe on a
//! shared pool.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::instrument;

use super::records::{AppSettings, ExecutionStatus, LogEntry, Workflow, WorkflowExecution};

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("database error: {0}")]
    #[diagnostic(
        code(tradeweave::store::backend),
        help("Check the database URL and that the file is writable.")
    )]
    Backend(#[from] sqlx::Error),

    #[error("corrupt persisted value: {what}")]
    #[diagnostic(code(tradeweave::store::corrupt))]
    Corrupt { what: &'static str },

    #[error("migration failure: {0}")]
    #[diagnostic(code(tradeweave::store::migrate))]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Patch for `PUT /workflows/{id}`; `None` fields keep their value.
#[derive(Debug, Default)]
pub struct WorkflowUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub nodes: Option<Value>,
    pub edges: Option<Value>,
}

#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect (creating the database file if needed) and run migrations.
    /// Example URL: `sqlite://tradeweave.db`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        // SQLite will not create a missing file through the pool; do it
        // here so first run works from an empty directory.
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.trim();
            if !path.is_empty() && path != ":memory:" {
                let p = std::path::Path::new(path);
                if let Some(parent) = p.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if !p.exists() {
                    let _ = std::fs::File::create_new(p);
                }
            }
        }
        let pool = SqlitePool::connect(database_url).await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    // ----- Settings -----

    /// Load the settings singleton, creating the default row on first use.
    pub async fn settings(&self) -> Result<AppSettings> {
        if let Some(row) = sqlx::query("SELECT * FROM app_settings WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?
        {
            return settings_from_row(&row);
        }
        let defaults = AppSettings::default();
        sqlx::query(
            "INSERT INTO app_settings (id, is_setup_complete, gateway_host, gateway_ws_url, updated_at)
             VALUES (1, 0, ?, ?, ?)",
        )
        .bind(&defaults.gateway_host)
        .bind(&defaults.gateway_ws_url)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(defaults)
    }

    pub async fn set_admin_password(&self, password_hash: &str) -> Result<()> {
        self.settings().await?;
        sqlx::query(
            "UPDATE app_settings SET admin_password_hash = ?, is_setup_complete = 1, updated_at = ? WHERE id = 1",
        )
        .bind(password_hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update gateway settings. `api_key` is the already-sealed value;
    /// `None` keeps the stored key.
    pub async fn update_gateway_settings(
        &self,
        api_key: Option<&str>,
        host: &str,
        ws_url: &str,
    ) -> Result<AppSettings> {
        self.settings().await?;
        if let Some(api_key) = api_key {
            sqlx::query(
                "UPDATE app_settings SET gateway_api_key = ?, gateway_host = ?, gateway_ws_url = ?, updated_at = ? WHERE id = 1",
            )
            .bind(api_key)
            .bind(host)
            .bind(ws_url)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE app_settings SET gateway_host = ?, gateway_ws_url = ?, updated_at = ? WHERE id = 1",
            )
            .bind(host)
            .bind(ws_url)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        }
        self.settings().await
    }

    // ----- Workflows -----

    pub async fn create_workflow(
        &self,
        name: &str,
        description: Option<&str>,
        nodes: &Value,
        edges: &Value,
    ) -> Result<Workflow> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO workflows (name, description, nodes_json, edges_json, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(nodes.to_string())
        .bind(edges.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        let id = result.last_insert_rowid();
        self.get_workflow(id)
            .await?
            .ok_or(StoreError::Corrupt { what: "workflow" })
    }

    pub async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let rows = sqlx::query("SELECT * FROM workflows ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(workflow_from_row).collect()
    }

    pub async fn active_workflows(&self) -> Result<Vec<Workflow>> {
        let rows = sqlx::query("SELECT * FROM workflows WHERE is_active = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(workflow_from_row).collect()
    }

    pub async fn get_workflow(&self, id: i64) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(workflow_from_row).transpose()
    }

    pub async fn update_workflow(&self, id: i64, update: WorkflowUpdate) -> Result<Option<Workflow>> {
        let Some(existing) = self.get_workflow(id).await? else {
            return Ok(None);
        };
        let name = update.name.unwrap_or(existing.name);
        let description = update.description.or(existing.description);
        let nodes = update.nodes.unwrap_or(existing.nodes);
        let edges = update.edges.unwrap_or(existing.edges);
        sqlx::query(
            "UPDATE workflows SET name = ?, description = ?, nodes_json = ?, edges_json = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&name)
        .bind(&description)
        .bind(nodes.to_string())
        .bind(edges.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_workflow(id).await
    }

    pub async fn delete_workflow(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flip activation and record (or clear) the schedule job id.
    pub async fn set_workflow_activation(
        &self,
        id: i64,
        is_active: bool,
        schedule_job_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE workflows SET is_active = ?, schedule_job_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(is_active)
        .bind(schedule_job_id)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ----- Executions -----

    /// Create a new execution row in `running` state.
    pub async fn create_execution(&self, workflow_id: i64) -> Result<WorkflowExecution> {
        let started_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO workflow_executions (workflow_id, status, started_at, logs_json)
             VALUES (?, 'running', ?, '[]')",
        )
        .bind(workflow_id)
        .bind(started_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(WorkflowExecution {
            id: result.last_insert_rowid(),
            workflow_id,
            status: ExecutionStatus::Running,
            started_at,
            completed_at: None,
            error: None,
            logs: Vec::new(),
        })
    }

    /// Move an execution to its terminal status. Called exactly once per
    /// run.
    pub async fn finish_execution(
        &self,
        id: i64,
        status: ExecutionStatus,
        error: Option<&str>,
        logs: &[LogEntry],
    ) -> Result<()> {
        sqlx::query(
            "UPDATE workflow_executions SET status = ?, completed_at = ?, error = ?, logs_json = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(error)
        .bind(serde_json::to_string(logs).unwrap_or_else(|_| "[]".to_string()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_execution(&self, id: i64) -> Result<Option<WorkflowExecution>> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(execution_from_row).transpose()
    }

    /// Execution history for one workflow, newest first.
    pub async fn list_executions(
        &self,
        workflow_id: i64,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_executions WHERE workflow_id = ?
             ORDER BY started_at DESC, id DESC LIMIT ?",
        )
        .bind(workflow_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(execution_from_row).collect()
    }

    /// Count of executions currently in `running` state for a workflow.
    pub async fn running_execution_count(&self, workflow_id: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM workflow_executions WHERE workflow_id = ? AND status = 'running'",
        )
        .bind(workflow_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }
}

fn parse_timestamp(raw: String, what: &'static str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt { what })
}

fn parse_json(raw: String, what: &'static str) -> Result<Value> {
    serde_json::from_str(&raw).map_err(|_| StoreError::Corrupt { what })
}

fn workflow_from_row(row: &SqliteRow) -> Result<Workflow> {
    Ok(Workflow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        nodes: parse_json(row.try_get("nodes_json")?, "workflow nodes")?,
        edges: parse_json(row.try_get("edges_json")?, "workflow edges")?,
        is_active: row.try_get("is_active")?,
        schedule_job_id: row.try_get("schedule_job_id")?,
        created_at: parse_timestamp(row.try_get("created_at")?, "workflow created_at")?,
        updated_at: parse_timestamp(row.try_get("updated_at")?, "workflow updated_at")?,
    })
}

fn execution_from_row(row: &SqliteRow) -> Result<WorkflowExecution> {
    let status: String = row.try_get("status")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    let logs_raw: String = row.try_get("logs_json")?;
    Ok(WorkflowExecution {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        status: ExecutionStatus::parse(&status).ok_or(StoreError::Corrupt {
            what: "execution status",
        })?,
        started_at: parse_timestamp(row.try_get("started_at")?, "execution started_at")?,
        completed_at: completed_at
            .map(|raw| parse_timestamp(raw, "execution completed_at"))
            .transpose()?,
        error: row.try_get("error")?,
        logs: serde_json::from_str(&logs_raw).map_err(|_| StoreError::Corrupt {
            what: "execution logs",
        })?,
    })
}

fn settings_from_row(row: &SqliteRow) -> Result<AppSettings> {
    Ok(AppSettings {
        admin_password_hash: row.try_get("admin_password_hash")?,
        is_setup_complete: row.try_get("is_setup_complete")?,
        gateway_api_key: row.try_get("gateway_api_key")?,
        gateway_host: row.try_get("gateway_host")?,
        gateway_ws_url: row.try_get("gateway_ws_url")?,
        updated_at: parse_timestamp(row.try_get("updated_at")?, "settings updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // A fresh file-backed database per test; `:memory:` would give every
    // pooled connection its own database.
    async fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let store = Store::connect(&url).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn settings_singleton_bootstraps() {
        let (store, _dir) = test_store().await;
        let settings = store.settings().await.unwrap();
        assert!(!settings.is_setup_complete);
        assert!(settings.gateway_api_key.is_none());

        store.set_admin_password("hash").await.unwrap();
        let settings = store.settings().await.unwrap();
        assert!(settings.is_setup_complete);
        assert_eq!(settings.admin_password_hash.as_deref(), Some("hash"));
    }

    #[tokio::test]
    async fn gateway_settings_keep_key_when_absent() {
        let (store, _dir) = test_store().await;
        store
            .update_gateway_settings(Some("sealed:abc"), "http://gw", "ws://gw")
            .await
            .unwrap();
        let settings = store
            .update_gateway_settings(None, "http://gw2", "ws://gw2")
            .await
            .unwrap();
        assert_eq!(settings.gateway_api_key.as_deref(), Some("sealed:abc"));
        assert_eq!(settings.gateway_host, "http://gw2");
    }

    #[tokio::test]
    async fn workflow_crud_round_trip() {
        let (store, _dir) = test_store().await;
        let nodes = json!([{"id": "1", "type": "start", "data": {}}]);
        let workflow = store
            .create_workflow("demo", Some("desc"), &nodes, &json!([]))
            .await
            .unwrap();
        assert!(!workflow.is_active);
        assert_eq!(workflow.nodes, nodes);

        let updated = store
            .update_workflow(
                workflow.id,
                WorkflowUpdate {
                    name: Some("renamed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.nodes, nodes);

        assert_eq!(store.list_workflows().await.unwrap().len(), 1);
        assert!(store.delete_workflow(workflow.id).await.unwrap());
        assert!(store.get_workflow(workflow.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn execution_lifecycle_single_terminal_transition() {
        let (store, _dir) = test_store().await;
        let workflow = store
            .create_workflow("w", None, &json!([]), &json!([]))
            .await
            .unwrap();
        let execution = store.create_execution(workflow.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(
            store.running_execution_count(workflow.id).await.unwrap(),
            1
        );

        store
            .finish_execution(
                execution.id,
                ExecutionStatus::Failed,
                Some("boom"),
                &[LogEntry::error("boom")],
            )
            .await
            .unwrap();
        let stored = store.get_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("boom"));
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.logs.len(), 1);
        assert_eq!(
            store.running_execution_count(workflow.id).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn executions_list_newest_first_with_limit() {
        let (store, _dir) = test_store().await;
        let workflow = store
            .create_workflow("w", None, &json!([]), &json!([]))
            .await
            .unwrap();
        for _ in 0..3 {
            let execution = store.create_execution(workflow.id).await.unwrap();
            store
                .finish_execution(execution.id, ExecutionStatus::Completed, None, &[])
                .await
                .unwrap();
        }
        let executions = store.list_executions(workflow.id, 2).await.unwrap();
        assert_eq!(executions.len(), 2);
        assert!(executions[0].id > executions[1].id);
    }

    #[tokio::test]
    async fn activation_records_job_id() {
        let (store, _dir) = test_store().await;
        let workflow = store
            .create_workflow("w", None, &json!([]), &json!([]))
            .await
            .unwrap();
        store
            .set_workflow_activation(workflow.id, true, Some("job-1"))
            .await
            .unwrap();
        let stored = store.get_workflow(workflow.id).await.unwrap().unwrap();
        assert!(stored.is_active);
        assert_eq!(stored.schedule_job_id.as_deref(), Some("job-1"));
    }
}
