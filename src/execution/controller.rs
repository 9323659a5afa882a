//! 断点与恢复控制
//!
//! 负责 running <-> paused 以及 cancel / reject 进入终态。每个读-改-写都持有该执行的异步互斥锁，
//! 同一执行上的并发 Resume / Cancel / 工作流收尾因此串行；收尾时若执行已离开 running，则不覆盖。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

use crate::core::EngineError;
use crate::execution::{
    Checkpoint, Execution, ExecutionBackend, ExecutionStatus, ExecutionStore,
    ExecutionTaskRegistry, TaskHandle,
};
use crate::workflow::{GateAction, GateDecision, WorkflowOutcome};

/// 按 execution_id 分配的异步锁
#[derive(Debug, Default)]
pub struct ExecutionLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ExecutionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, execution_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            // 没有其他持有者的锁顺手清理
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(execution_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// 闸门上的人工动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeAction {
    Approve,
    Reject,
}

/// Resume 的结果；approve 时带回检查点供路由重新派发
#[derive(Debug, Clone)]
pub struct ResumeOutcome {
    pub execution: Execution,
    pub checkpoint: Option<Checkpoint>,
    /// 工作流执行 approve 后已登记到注册表的令牌；续跑必须用它
    pub run_token: Option<CancellationToken>,
}

pub struct CheckpointController {
    store: Arc<dyn ExecutionStore>,
    registry: Arc<ExecutionTaskRegistry>,
    locks: ExecutionLocks,
}

impl CheckpointController {
    pub fn new(store: Arc<dyn ExecutionStore>, registry: Arc<ExecutionTaskRegistry>) -> Self {
        Self {
            store,
            registry,
            locks: ExecutionLocks::new(),
        }
    }

    pub fn locks(&self) -> &ExecutionLocks {
        &self.locks
    }

    async fn load(&self, execution_id: &str) -> Result<Execution, EngineError> {
        self.store
            .get(execution_id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))
    }

    /// running -> paused，记录检查点（保留此前的闸门决定）与当前生效的输入
    pub async fn pause(
        &self,
        execution_id: &str,
        paused_step_id: &str,
        step_outputs: Map<String, Value>,
        inputs: Map<String, Value>,
    ) -> Result<Execution, EngineError> {
        if paused_step_id.trim().is_empty() {
            return Err(EngineError::InvalidRequest(
                "pause requires a paused_step_id".to_string(),
            ));
        }
        let _guard = self.locks.lock(execution_id).await;
        let mut execution = self.load(execution_id).await?;
        pause_in_place(&mut execution, paused_step_id, step_outputs, Some(inputs))?;
        self.store.update(&execution).await?;
        Ok(execution)
    }

    pub async fn resume(
        &self,
        execution_id: &str,
        action: ResumeAction,
        step_id: Option<&str>,
        comment: Option<String>,
    ) -> Result<ResumeOutcome, EngineError> {
        let _guard = self.locks.lock(execution_id).await;
        let mut execution = self.load(execution_id).await?;

        let target = match action {
            ResumeAction::Approve => ExecutionStatus::Running,
            ResumeAction::Reject => ExecutionStatus::Failed,
        };
        let checkpoint = match (&execution.status, &execution.checkpoint) {
            (ExecutionStatus::Paused, Some(checkpoint)) => checkpoint.clone(),
            _ => {
                return Err(EngineError::InvalidTransition {
                    execution_id: execution_id.to_string(),
                    from: execution.status,
                    to: target,
                })
            }
        };
        if let Some(step_id) = step_id {
            if step_id != checkpoint.paused_step_id {
                return Err(EngineError::GateMismatch {
                    execution_id: execution_id.to_string(),
                    expected: checkpoint.paused_step_id,
                    actual: step_id.to_string(),
                });
            }
        }

        let gate = checkpoint.paused_step_id.clone();
        match action {
            ResumeAction::Reject => {
                let reason = comment
                    .clone()
                    .unwrap_or_else(|| format!("rejected at gate {gate}"));
                execution.gate_decisions.insert(
                    gate.clone(),
                    GateDecision {
                        action: GateAction::Rejected,
                        comment,
                        decided_at: chrono::Utc::now(),
                    },
                );
                execution.error = Some(reason);
                execution.transition(ExecutionStatus::Failed)?;
                self.store.update(&execution).await?;
                tracing::info!(execution_id = %execution_id, gate = %gate, "gate rejected");
                Ok(ResumeOutcome {
                    execution,
                    checkpoint: None,
                    run_token: None,
                })
            }
            ResumeAction::Approve => {
                let decision = GateDecision::approved(comment);
                let mut checkpoint = checkpoint;
                checkpoint.gate_decisions.insert(gate.clone(), decision.clone());
                execution.gate_decisions.insert(gate.clone(), decision);
                execution.transition(ExecutionStatus::Running)?;
                // 状态变为 running 与令牌登记在同一把锁内，之后的 Cancel 一定能发出信号
                let run_token = (execution.backend == ExecutionBackend::Runner).then(|| {
                    let token = CancellationToken::new();
                    (token.clone(), TaskHandle::new(token))
                });
                if let Some((_, handle)) = &run_token {
                    self.registry.register(execution_id, handle.clone()).await;
                }
                if let Err(e) = self.store.update(&execution).await {
                    if run_token.is_some() {
                        self.registry.unregister(execution_id).await;
                    }
                    return Err(e);
                }
                tracing::info!(execution_id = %execution_id, gate = %gate, "gate approved");
                Ok(ResumeOutcome {
                    execution,
                    checkpoint: Some(checkpoint),
                    run_token: run_token.map(|(token, _)| token),
                })
            }
        }
    }

    /// 终态上是无操作成功，返回当前状态；否则通知注册表（尽力而为）并进入 cancelled
    pub async fn cancel(
        &self,
        execution_id: &str,
        reason: Option<String>,
    ) -> Result<ExecutionStatus, EngineError> {
        let _guard = self.locks.lock(execution_id).await;
        let mut execution = self.load(execution_id).await?;
        if execution.status.is_terminal() {
            tracing::debug!(execution_id = %execution_id, status = %execution.status, "cancel on terminal execution is a no-op");
            return Ok(execution.status);
        }

        if !self.registry.cancel(execution_id).await {
            tracing::debug!(execution_id = %execution_id, "no registered run to signal");
        }
        execution.transition(ExecutionStatus::Cancelled)?;
        execution.cancel_reason = reason;
        self.store.update(&execution).await?;
        Ok(execution.status)
    }

    /// 把一次工作流运行的结果写回；执行已不在 running 时丢弃
    pub async fn apply_workflow_outcome(
        &self,
        execution_id: &str,
        outcome: WorkflowOutcome,
    ) -> Result<Execution, EngineError> {
        let _guard = self.locks.lock(execution_id).await;
        let mut execution = self.load(execution_id).await?;
        if execution.status != ExecutionStatus::Running {
            tracing::info!(
                execution_id = %execution_id,
                status = %execution.status,
                "execution left running while workflow ran; discarding outcome"
            );
            return Ok(execution);
        }

        execution.workflow_result = Some(outcome.summary());
        match outcome {
            WorkflowOutcome::Paused {
                step_id,
                step_outputs,
            } => {
                pause_in_place(&mut execution, &step_id, step_outputs, None)?;
            }
            WorkflowOutcome::Completed { step_outputs } => {
                execution.outputs = step_outputs.clone();
                execution.step_outputs = step_outputs;
                execution.transition(ExecutionStatus::Completed)?;
            }
            WorkflowOutcome::Failed {
                error,
                step_outputs,
                ..
            } => {
                execution.step_outputs = step_outputs;
                execution.error = Some(error);
                execution.transition(ExecutionStatus::Failed)?;
            }
            WorkflowOutcome::Cancelled { step_outputs } => {
                execution.step_outputs = step_outputs;
                execution.transition(ExecutionStatus::Cancelled)?;
            }
        }
        self.store.update(&execution).await?;
        Ok(execution)
    }
}

fn pause_in_place(
    execution: &mut Execution,
    paused_step_id: &str,
    step_outputs: Map<String, Value>,
    inputs: Option<Map<String, Value>>,
) -> Result<(), EngineError> {
    execution.transition(ExecutionStatus::Paused)?;
    execution.checkpoint = Some(Checkpoint {
        paused_step_id: paused_step_id.to_string(),
        gate_decisions: execution.gate_decisions.clone(),
    });
    execution.step_outputs = step_outputs;
    if let Some(inputs) = inputs {
        execution.inputs = inputs;
    }
    Ok(())
}
