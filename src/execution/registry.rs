//! 执行任务注册表
//!
//! execution_id -> 正在运行的后台任务句柄（取消 token + 可选 AbortHandle）。
//! 注入式服务，不是全局单例。cancel 只发信号，从不改执行状态。

use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// 运行句柄
#[derive(Debug, Clone)]
pub struct TaskHandle {
    token: CancellationToken,
    abort: Option<AbortHandle>,
}

impl TaskHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token, abort: None }
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// 协作式取消；不主动 abort，任务在下一个边界自行退出并收尾
    fn signal(&self) {
        self.token.cancel();
    }

    /// 强制终止（仅关闭时用于收尾超时的任务）
    pub fn abort(&self) {
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.abort.as_ref().is_some_and(|a| a.is_finished())
    }
}

#[derive(Debug, Default)]
pub struct ExecutionTaskRegistry {
    handles: RwLock<HashMap<String, TaskHandle>>,
}

impl ExecutionTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册句柄；同一 id 已有句柄时替换（旧句柄被取消）
    pub async fn register(&self, execution_id: impl Into<String>, handle: TaskHandle) {
        let execution_id = execution_id.into();
        let previous = self
            .handles
            .write()
            .await
            .insert(execution_id.clone(), handle);
        if let Some(previous) = previous {
            tracing::warn!(execution_id = %execution_id, "replacing registered run handle");
            previous.signal();
        }
    }

    /// 给已登记的句柄补上 abort 句柄（任务在登记之后才 spawn）；未登记返回 false
    pub async fn attach_abort(&self, execution_id: &str, abort: AbortHandle) -> bool {
        match self.handles.write().await.get_mut(execution_id) {
            Some(handle) => {
                handle.abort = Some(abort);
                true
            }
            None => false,
        }
    }

    pub async fn unregister(&self, execution_id: &str) -> Option<TaskHandle> {
        self.handles.write().await.remove(execution_id)
    }

    /// 向运行中的任务发取消信号；没有注册返回 false
    pub async fn cancel(&self, execution_id: &str) -> bool {
        match self.handles.read().await.get(execution_id) {
            Some(handle) => {
                handle.signal();
                tracing::info!(execution_id = %execution_id, "cancellation signalled");
                true
            }
            None => false,
        }
    }

    pub async fn has(&self, execution_id: &str) -> bool {
        self.handles.read().await.contains_key(execution_id)
    }

    /// 取消全部（关闭时），返回发出信号的数量
    pub async fn cancel_all(&self) -> usize {
        let handles = self.handles.read().await;
        for handle in handles.values() {
            handle.signal();
        }
        handles.len()
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }
}
