//! SQLite 执行记录存储
//!
//! 表 executions：id 主键、status、playbook_code、payload（完整记录 JSON）、created_at、updated_at。
//! rusqlite 是同步接口，所有操作经 spawn_blocking 执行。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::core::EngineError;
use crate::execution::{Execution, ExecutionStatus, ExecutionStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS executions (
    id            TEXT PRIMARY KEY,
    status        TEXT NOT NULL,
    playbook_code TEXT NOT NULL,
    payload       TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status);
";

pub struct SqliteExecutionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteExecutionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, EngineError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, EngineError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, EngineError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| EngineError::Storage("sqlite connection poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| EngineError::Storage(format!("sqlite task failed: {e}")))?
    }
}

#[async_trait]
impl ExecutionStore for SqliteExecutionStore {
    async fn insert(&self, execution: &Execution) -> Result<(), EngineError> {
        let payload = serde_json::to_string(execution)?;
        let id = execution.execution_id.clone();
        let status = execution.status.as_str();
        let code = execution.playbook_code.clone();
        let created = execution.created_at.to_rfc3339();
        let updated = execution.updated_at.to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO executions (id, status, playbook_code, payload, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, status, code, payload, created, updated],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, execution_id: &str) -> Result<Option<Execution>, EngineError> {
        let id = execution_id.to_string();
        let payload: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT payload FROM executions WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(EngineError::from))
            .transpose()
    }

    async fn update(&self, execution: &Execution) -> Result<(), EngineError> {
        let payload = serde_json::to_string(execution)?;
        let id = execution.execution_id.clone();
        let status = execution.status.as_str();
        let updated = execution.updated_at.to_rfc3339();
        let changed = self
            .with_conn({
                let id = id.clone();
                move |conn| {
                    Ok(conn.execute(
                        "UPDATE executions SET status = ?2, payload = ?3, updated_at = ?4 WHERE id = ?1",
                        params![id, status, payload, updated],
                    )?)
                }
            })
            .await?;
        if changed == 0 {
            return Err(EngineError::ExecutionNotFound(id));
        }
        Ok(())
    }

    async fn list(&self, status: Option<ExecutionStatus>) -> Result<Vec<Execution>, EngineError> {
        let status = status.map(|s| s.as_str());
        let payloads: Vec<String> = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT payload FROM executions
                     WHERE ?1 IS NULL OR status = ?1
                     ORDER BY created_at",
                )?;
                let rows = stmt.query_map(params![status], |row| row.get::<_, String>(0))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await?;
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(EngineError::from))
            .collect()
    }
}
