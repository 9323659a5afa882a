//! 执行记录存储
//!
//! 一行（一条记录）对应一个 execution_id。引擎只通过 ExecutionStore 读写，读出的是副本，
//! 修改后必须 update 回去。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::EngineError;
use crate::execution::{Execution, ExecutionStatus};

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// 新建记录；id 已存在时报 Storage 错误
    async fn insert(&self, execution: &Execution) -> Result<(), EngineError>;

    async fn get(&self, execution_id: &str) -> Result<Option<Execution>, EngineError>;

    /// 覆盖已有记录；不存在时报 ExecutionNotFound
    async fn update(&self, execution: &Execution) -> Result<(), EngineError>;

    /// 按状态列出（None 为全部），按创建时间排序
    async fn list(&self, status: Option<ExecutionStatus>) -> Result<Vec<Execution>, EngineError>;
}

/// 内存存储（测试与单进程部署）
#[derive(Default)]
pub struct InMemoryExecutionStore {
    records: RwLock<HashMap<String, Execution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn insert(&self, execution: &Execution) -> Result<(), EngineError> {
        let mut records = self.records.write().await;
        if records.contains_key(&execution.execution_id) {
            return Err(EngineError::Storage(format!(
                "execution {} already exists",
                execution.execution_id
            )));
        }
        records.insert(execution.execution_id.clone(), execution.clone());
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<Execution>, EngineError> {
        Ok(self.records.read().await.get(execution_id).cloned())
    }

    async fn update(&self, execution: &Execution) -> Result<(), EngineError> {
        let mut records = self.records.write().await;
        match records.get_mut(&execution.execution_id) {
            Some(slot) => {
                *slot = execution.clone();
                Ok(())
            }
            None => Err(EngineError::ExecutionNotFound(execution.execution_id.clone())),
        }
    }

    async fn list(&self, status: Option<ExecutionStatus>) -> Result<Vec<Execution>, EngineError> {
        let mut out: Vec<Execution> = self
            .records
            .read()
            .await
            .values()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|e| e.created_at);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionBackend;

    #[tokio::test]
    async fn test_insert_get_update() {
        let store = InMemoryExecutionStore::new();
        let mut exec = Execution::new("brief", "ws", "user", ExecutionBackend::InProcess, "en");
        store.insert(&exec).await.unwrap();
        assert!(store.insert(&exec).await.is_err());

        exec.transition(ExecutionStatus::Running).unwrap();
        store.update(&exec).await.unwrap();
        let loaded = store.get(&exec.execution_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Running);

        assert_eq!(store.list(Some(ExecutionStatus::Running)).await.unwrap().len(), 1);
        assert!(store.list(Some(ExecutionStatus::Paused)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_missing() {
        let store = InMemoryExecutionStore::new();
        let exec = Execution::new("brief", "ws", "user", ExecutionBackend::InProcess, "en");
        assert!(matches!(
            store.update(&exec).await,
            Err(EngineError::ExecutionNotFound(_))
        ));
        assert!(store.get("nope").await.unwrap().is_none());
    }
}
